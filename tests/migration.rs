//! Records written in old shapes are upgraded while they are read.

use std::sync::Arc;

use annals::{
    Aggregate, AggregateRoot, AggregateService, Apply, LoadError, Migrator, Payload, RecordKind,
    RecordRegistry, RegistryError,
    payload::DecodeError,
    store::inmemory,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Shapes of the same event over time.

#[derive(Clone, Debug, Serialize, Deserialize, Payload)]
#[payload(name = "CustomerRenamed")]
struct RenamedV1 {
    name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Payload)]
#[payload(name = "CustomerRenamed.v2")]
struct RenamedV2 {
    first: String,
    last: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Payload)]
#[payload(name = "CustomerRenamed.v3")]
struct RenamedV3 {
    first: String,
    last: String,
    display: String,
}

struct SplitName;

impl Migrator for SplitName {
    type Source = RenamedV1;
    type Target = RenamedV2;

    fn migrate(source: RenamedV1) -> RenamedV2 {
        let (first, last) = source
            .name
            .split_once(' ')
            .unwrap_or((source.name.as_str(), ""));
        RenamedV2 {
            first: first.to_string(),
            last: last.to_string(),
        }
    }
}

struct AddDisplayName;

impl Migrator for AddDisplayName {
    type Source = RenamedV2;
    type Target = RenamedV3;

    fn migrate(source: RenamedV2) -> RenamedV3 {
        RenamedV3 {
            display: format!("{}, {}", source.last, source.first),
            first: source.first,
            last: source.last,
        }
    }
}

/// The customer aggregate as deployed before any migration existed.
#[derive(Default, Aggregate)]
#[aggregate(name = "Customer", error = String, events(RenamedV1))]
struct LegacyCustomer;

impl Apply<RenamedV1> for LegacyCustomer {
    fn apply(&mut self, _event: &RenamedV1) {}
}

#[derive(Debug, Default, PartialEq, Eq, Aggregate)]
#[aggregate(error = String, events(RenamedV3))]
struct Customer {
    display: String,
    renames: u32,
}

impl Apply<RenamedV3> for Customer {
    fn apply(&mut self, event: &RenamedV3) {
        self.display.clone_from(&event.display);
        self.renames += 1;
    }
}

async fn seed_legacy(store: &inmemory::Store) -> Uuid {
    let legacy = AggregateService::new(store.clone());
    let mut customer = AggregateRoot::<LegacyCustomer>::create();
    customer
        .record(RenamedV1 {
            name: "Ada Lovelace".to_string(),
        })
        .record(RenamedV1 {
            name: "Grace Hopper".to_string(),
        });
    legacy.persist(&mut customer).await.unwrap();
    customer.id()
}

fn registry() -> Arc<RecordRegistry> {
    Arc::new(
        RecordRegistry::builder()
            .aggregate::<Customer>()
            .migrator::<SplitName>()
            .migrator::<AddDisplayName>()
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn old_events_replay_through_the_migrator_chain() {
    let store = inmemory::Store::new();
    let id = seed_legacy(&store).await;

    let service = AggregateService::new(store).with_registry(registry());
    let customer = service
        .rehydrate::<Customer>(Uuid::nil(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(customer.state().display, "Hopper, Grace");
    assert_eq!(customer.state().renames, 2);
    assert_eq!(customer.version(), 2);
}

#[tokio::test]
async fn migrated_stream_accepts_new_shape_appends() {
    let store = inmemory::Store::new();
    let id = seed_legacy(&store).await;
    let service = AggregateService::new(store).with_registry(registry());

    let mut customer = service
        .rehydrate::<Customer>(Uuid::nil(), id)
        .await
        .unwrap()
        .unwrap();
    customer.record(RenamedV3 {
        first: "Alan".to_string(),
        last: "Turing".to_string(),
        display: "Turing, Alan".to_string(),
    });
    service.persist(&mut customer).await.unwrap();

    let reloaded = service
        .rehydrate::<Customer>(Uuid::nil(), id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.state().display, "Turing, Alan");
    assert_eq!(reloaded.version(), 3);
}

#[tokio::test]
async fn without_migrators_old_shapes_are_unknown() {
    let store = inmemory::Store::new();
    let id = seed_legacy(&store).await;
    let service = AggregateService::new(store);

    let err = service
        .rehydrate::<Customer>(Uuid::nil(), id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Decode {
            kind: RecordKind::Event,
            error: DecodeError::UnknownType { .. },
            ..
        }
    ));
}

struct Revert;

impl Migrator for Revert {
    type Source = RenamedV3;
    type Target = RenamedV1;

    fn migrate(source: RenamedV3) -> RenamedV1 {
        RenamedV1 {
            name: source.display,
        }
    }
}

#[test]
fn migrator_cycle_fails_registry_build() {
    let err = RecordRegistry::builder()
        .migrator::<SplitName>()
        .migrator::<AddDisplayName>()
        .migrator::<Revert>()
        .build()
        .unwrap_err();
    let chain = match err {
        RegistryError::MigratorCycle { chain } => chain,
        other => panic!("expected a cycle, got {other:?}"),
    };
    assert_eq!(chain.first(), chain.last());
    assert_eq!(chain.len(), 4);
}
