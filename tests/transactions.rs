//! Transaction atomicity and the test utilities.
//! Run the second half with `cargo test --features test-util`.

use annals::{
    Aggregate, AggregateRoot, Apply, ConflictKind, Payload,
    store::{CommitError, RecordFilter, RecordStore, inmemory},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Payload)]
struct Ticked;

#[derive(Debug, Default, Aggregate)]
#[aggregate(error = String, events(Ticked), derives(Debug, PartialEq))]
struct Clock {
    ticks: u32,
}

impl Apply<Ticked> for Clock {
    fn apply(&mut self, _event: &Ticked) {
        self.ticks += 1;
    }
}

async fn stream_len(store: &inmemory::Store, id: Uuid) -> usize {
    store
        .load_events(&RecordFilter::for_aggregate(Uuid::nil(), Clock::TYPE, id))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn failing_action_rolls_back_the_whole_transaction() {
    let store = inmemory::Store::new();
    let mut clock = AggregateRoot::<Clock>::create();
    clock.record(Ticked).record(Ticked);
    let other = Uuid::new_v4();

    let mut tx = store.begin(Uuid::nil());
    tx.add_events(clock.uncommitted()).unwrap();
    tx.delete_snapshot(other, 3).unwrap();
    let err = tx.commit().await.unwrap_err();

    let CommitError::Conflict(conflict) = err else {
        panic!("expected a conflict");
    };
    assert_eq!(conflict.kind, ConflictKind::MissingSnapshot);
    assert_eq!(conflict.aggregate_id, other);
    assert_eq!(stream_len(&store, clock.id()).await, 0);
}

#[tokio::test]
async fn dropped_transaction_writes_nothing() {
    let store = inmemory::Store::new();
    let mut clock = AggregateRoot::<Clock>::create();
    clock.record(Ticked);

    {
        let mut tx = store.begin(Uuid::nil());
        tx.add_events(clock.uncommitted()).unwrap();
    }
    assert_eq!(stream_len(&store, clock.id()).await, 0);
}

#[tokio::test]
async fn range_delete_requires_the_exact_stream_length() {
    let store = inmemory::Store::new();
    let mut clock = AggregateRoot::<Clock>::create();
    clock.record(Ticked).record(Ticked).record(Ticked);
    let mut tx = store.begin(Uuid::nil());
    tx.add_events(clock.uncommitted()).unwrap();
    tx.commit().await.unwrap();

    let mut short = store.begin(Uuid::nil());
    short.delete_all_events(clock.id(), 2).unwrap();
    assert!(matches!(
        short.commit().await,
        Err(CommitError::Conflict(conflict)) if conflict.kind == ConflictKind::StreamChanged
    ));
    assert_eq!(stream_len(&store, clock.id()).await, 3);

    let mut exact = store.begin(Uuid::nil());
    exact.delete_all_events(clock.id(), 3).unwrap();
    exact.commit().await.unwrap();
    assert_eq!(stream_len(&store, clock.id()).await, 0);
}

#[cfg(feature = "test-util")]
mod with_test_util {
    use annals::{
        AggregateService, PersistError,
        test::{StoreTestExt, TestFramework},
    };

    use super::*;

    struct Tick;

    impl annals::Handle<Tick> for Clock {
        fn handle(&self, _command: &Tick) -> Result<Vec<ClockEvent>, String> {
            if self.ticks >= 3 {
                return Err("clock is wound down".to_string());
            }
            Ok(vec![Ticked.into()])
        }
    }

    #[test]
    fn handler_emits_tick() {
        TestFramework::<Clock>::given(&[])
            .when(&Tick)
            .then_expect_events(&[ClockEvent::Ticked(Ticked)]);
    }

    #[test]
    fn handler_refuses_after_three_ticks() {
        TestFramework::<Clock>::given(&[Ticked.into(), Ticked.into()])
            .and(&[Ticked.into()])
            .when(&Tick)
            .then_expect_error_message("wound down");
    }

    #[tokio::test]
    async fn injected_write_makes_loaded_root_stale() {
        let service = AggregateService::new(inmemory::Store::new());
        let id = Uuid::new_v4();
        service
            .store()
            .seed_events::<Clock>(Uuid::nil(), id, vec![Ticked.into()])
            .await
            .unwrap();

        let mut clock = service
            .rehydrate::<Clock>(Uuid::nil(), id)
            .await
            .unwrap()
            .unwrap();
        service
            .store()
            .inject_concurrent_event::<Clock>(Uuid::nil(), id, Ticked.into())
            .await
            .unwrap();

        clock.execute(&Tick).unwrap();
        let err = service.persist(&mut clock).await.unwrap_err();
        assert!(matches!(err, PersistError::Conflict(_)));
    }
}
