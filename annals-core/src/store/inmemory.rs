//! In-memory record store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`RecordStore`](super::RecordStore) suitable for unit tests and examples.
//!
//! # Example
//!
//! ```
//! use annals_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! ```

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;
use uuid::Uuid;

use crate::{
    concurrency::{ConcurrencyConflict, ConflictKind},
    record::StoredRecord,
    store::{Action, CommitError, LoadResult, Order, ProjectionFilter, RecordFilter, RecordStore},
};

/// Records of one partition, keyed for ordered range access.
#[derive(Clone, Debug, Default)]
struct Partition {
    events: BTreeMap<(Uuid, i64), StoredRecord>,
    snapshots: BTreeMap<(Uuid, i64), StoredRecord>,
    projections: BTreeMap<(Uuid, String), StoredRecord>,
}

/// In-memory record store that keeps each partition in an ordered map.
///
/// A commit works on a copy of the target partition and swaps it in only
/// after every action succeeded, so a rejected transaction leaves no trace.
#[derive(Clone, Debug, Default)]
pub struct Store {
    inner: Arc<RwLock<BTreeMap<Uuid, Partition>>>,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Error type for in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("record {record_id} belongs to partition {actual}, not {expected}")]
    ForeignRecord {
        record_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },
    #[error("record {record_id} is stored under the wrong kind")]
    WrongKind { record_id: Uuid },
}

impl Partition {
    fn apply(&mut self, partition_id: Uuid, action: Action) -> Result<(), CommitError<InMemoryError>> {
        let conflict = |aggregate_id, index, kind| {
            CommitError::Conflict(ConcurrencyConflict::new(partition_id, aggregate_id, index, kind))
        };

        match action {
            Action::AddEvents(batch) => {
                let aggregate_id = batch.head.header.aggregate_id;
                let first = batch.head.header.index;
                if first > 0 && !self.events.contains_key(&(aggregate_id, first - 1)) {
                    return Err(conflict(aggregate_id, first - 1, ConflictKind::MissingPredecessor));
                }
                for record in batch {
                    check_owner(&record, partition_id)?;
                    let key = (record.header.aggregate_id, record.header.index);
                    if self.events.contains_key(&key) {
                        return Err(conflict(key.0, key.1, ConflictKind::IndexTaken));
                    }
                    self.events.insert(key, record);
                }
            }
            Action::AddSnapshot(record) => {
                check_owner(&record, partition_id)?;
                let key = (record.header.aggregate_id, record.header.index);
                if !self.events.contains_key(&key) {
                    return Err(conflict(key.0, key.1, ConflictKind::MissingEvent));
                }
                if self.snapshots.contains_key(&key) {
                    return Err(conflict(key.0, key.1, ConflictKind::IndexTaken));
                }
                self.snapshots.insert(key, record);
            }
            Action::UpsertProjection(record) => {
                check_owner(&record, partition_id)?;
                let Some(projection_type) = record.projection_type().map(str::to_owned) else {
                    return Err(CommitError::Store(InMemoryError::WrongKind {
                        record_id: record.header.record_id,
                    }));
                };
                self.projections
                    .insert((record.header.aggregate_id, projection_type), record);
            }
            Action::DeleteAllEvents {
                aggregate_id,
                version,
            } => {
                if self.events.contains_key(&(aggregate_id, version)) {
                    return Err(conflict(aggregate_id, version, ConflictKind::StreamChanged));
                }
                let present = self
                    .events
                    .range((aggregate_id, 0)..(aggregate_id, version))
                    .count();
                if i64::try_from(present).ok() != Some(version) {
                    return Err(conflict(aggregate_id, version, ConflictKind::StreamChanged));
                }
                self.events.retain(|(id, _), _| *id != aggregate_id);
                self.snapshots.retain(|(id, _), _| *id != aggregate_id);
            }
            Action::DeleteSnapshot {
                aggregate_id,
                index,
            } => {
                if self.snapshots.remove(&(aggregate_id, index)).is_none() {
                    return Err(conflict(aggregate_id, index, ConflictKind::MissingSnapshot));
                }
            }
            Action::DeleteProjection {
                aggregate_id,
                projection_type,
            } => {
                self.projections.remove(&(aggregate_id, projection_type));
            }
        }
        Ok(())
    }
}

fn check_owner(record: &StoredRecord, partition_id: Uuid) -> Result<(), CommitError<InMemoryError>> {
    if record.header.partition_id == partition_id {
        Ok(())
    } else {
        Err(CommitError::Store(InMemoryError::ForeignRecord {
            record_id: record.header.record_id,
            expected: partition_id,
            actual: record.header.partition_id,
        }))
    }
}

fn select<'r>(
    records: impl Iterator<Item = &'r StoredRecord>,
    filter: &RecordFilter,
) -> Vec<StoredRecord> {
    let mut selected: Vec<StoredRecord> =
        records.filter(|r| filter.matches(r)).cloned().collect();
    selected.sort_by_key(|r| r.header.index);
    if filter.order == Order::Descending {
        selected.reverse();
    }
    if let Some(limit) = filter.limit {
        selected.truncate(limit);
    }
    selected
}

impl RecordStore for Store {
    type Error = InMemoryError;

    #[tracing::instrument(skip(self, filter), fields(aggregate_id = ?filter.aggregate_id))]
    fn load_events<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> impl Future<Output = LoadResult<Self::Error>> + Send + 'a {
        let result = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            select(
                inner
                    .iter()
                    .filter(|(id, _)| filter.partition_id.is_none_or(|p| p == **id))
                    .flat_map(|(_, partition)| partition.events.values()),
                filter,
            )
        };
        tracing::debug!(events_loaded = result.len(), "loaded events from store");
        std::future::ready(Ok(result))
    }

    #[tracing::instrument(skip(self, filter), fields(aggregate_id = ?filter.aggregate_id))]
    fn load_snapshots<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> impl Future<Output = LoadResult<Self::Error>> + Send + 'a {
        let result = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            select(
                inner
                    .iter()
                    .filter(|(id, _)| filter.partition_id.is_none_or(|p| p == **id))
                    .flat_map(|(_, partition)| partition.snapshots.values()),
                filter,
            )
        };
        tracing::debug!(snapshots_loaded = result.len(), "loaded snapshots from store");
        std::future::ready(Ok(result))
    }

    #[tracing::instrument(skip(self, filter), fields(projection_type = %filter.projection_type))]
    fn load_projections<'a>(
        &'a self,
        filter: &'a ProjectionFilter,
    ) -> impl Future<Output = LoadResult<Self::Error>> + Send + 'a {
        let result: Vec<StoredRecord> = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            let matching = inner
                .iter()
                .filter(|(id, _)| filter.partition_id.is_none_or(|p| p == **id))
                .flat_map(|(_, partition)| partition.projections.values())
                .filter(|r| filter.matches(r))
                .cloned();
            match filter.limit {
                Some(limit) => matching.take(limit).collect(),
                None => matching.collect(),
            }
        };
        tracing::debug!(projections_loaded = result.len(), "loaded projections from store");
        std::future::ready(Ok(result))
    }

    #[tracing::instrument(skip(self, actions), fields(action_count = actions.len()))]
    fn commit<'a>(
        &'a self,
        partition_id: Uuid,
        actions: NonEmpty<Action>,
    ) -> impl Future<Output = Result<(), CommitError<Self::Error>>> + Send + 'a {
        let result = {
            let mut inner = self.inner.write().expect("in-memory store lock poisoned");
            let mut staged = inner.get(&partition_id).cloned().unwrap_or_default();
            let applied = actions
                .into_iter()
                .try_for_each(|action| staged.apply(partition_id, action));
            match applied {
                Ok(()) => {
                    inner.insert(partition_id, staged);
                    tracing::debug!("transaction committed");
                    Ok(())
                }
                Err(err) => {
                    tracing::debug!(error = %err, "transaction rejected");
                    Err(err)
                }
            }
        };
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::record::{RecordHeader, StoredKind};

    fn header(aggregate_id: Uuid, index: i64) -> RecordHeader {
        RecordHeader {
            partition_id: Uuid::nil(),
            aggregate_id,
            record_id: Uuid::new_v4(),
            aggregate_type: "Counter".to_string(),
            record_type: "ValueAdded".to_string(),
            timestamp: Utc::now(),
            index,
        }
    }

    fn event(aggregate_id: Uuid, index: i64) -> StoredRecord {
        StoredRecord {
            header: header(aggregate_id, index),
            kind: StoredKind::Event,
            data: serde_json::json!({ "amount": index }),
        }
    }

    fn snapshot(aggregate_id: Uuid, index: i64) -> StoredRecord {
        StoredRecord {
            kind: StoredKind::Snapshot,
            ..event(aggregate_id, index)
        }
    }

    fn projection(aggregate_id: Uuid, hash: &str) -> StoredRecord {
        StoredRecord {
            kind: StoredKind::Projection {
                projection_type: "CounterView".to_string(),
                hash: hash.to_string(),
            },
            ..event(aggregate_id, 0)
        }
    }

    fn add(records: Vec<StoredRecord>) -> NonEmpty<Action> {
        NonEmpty::singleton(Action::AddEvents(NonEmpty::from_vec(records).unwrap()))
    }

    async fn indices(store: &Store, aggregate_id: Uuid) -> Vec<i64> {
        store
            .load_events(&RecordFilter::for_aggregate(Uuid::nil(), "Counter", aggregate_id))
            .await
            .unwrap()
            .iter()
            .map(|r| r.header.index)
            .collect()
    }

    #[test]
    fn new_has_no_partitions() {
        let store = Store::new();
        let inner = store.inner.read().unwrap();
        assert!(inner.is_empty());
        drop(inner);
    }

    #[tokio::test]
    async fn append_then_load_in_index_order() {
        let store = Store::new();
        let id = Uuid::new_v4();
        store
            .commit(Uuid::nil(), add(vec![event(id, 0), event(id, 1)]))
            .await
            .unwrap();
        store
            .commit(Uuid::nil(), add(vec![event(id, 2)]))
            .await
            .unwrap();
        assert_eq!(indices(&store, id).await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn append_to_taken_index_conflicts() {
        let store = Store::new();
        let id = Uuid::new_v4();
        store.commit(Uuid::nil(), add(vec![event(id, 0)])).await.unwrap();

        let err = store
            .commit(Uuid::nil(), add(vec![event(id, 0)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict(ConcurrencyConflict {
                index: 0,
                kind: ConflictKind::IndexTaken,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn append_without_predecessor_conflicts() {
        let store = Store::new();
        let id = Uuid::new_v4();
        let err = store
            .commit(Uuid::nil(), add(vec![event(id, 3)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict(ConcurrencyConflict {
                index: 2,
                kind: ConflictKind::MissingPredecessor,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn failed_action_rolls_back_whole_commit() {
        let store = Store::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let actions = NonEmpty::from((
            Action::AddEvents(NonEmpty::singleton(event(a, 0))),
            vec![Action::DeleteAllEvents {
                aggregate_id: b,
                version: 1,
            }],
        ));

        let err = store.commit(Uuid::nil(), actions).await.unwrap_err();
        assert!(matches!(err, CommitError::Conflict(_)));
        assert!(indices(&store, a).await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_requires_matching_event() {
        let store = Store::new();
        let id = Uuid::new_v4();
        let err = store
            .commit(Uuid::nil(), NonEmpty::singleton(Action::AddSnapshot(snapshot(id, 0))))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict(ConcurrencyConflict {
                kind: ConflictKind::MissingEvent,
                ..
            })
        ));

        store.commit(Uuid::nil(), add(vec![event(id, 0)])).await.unwrap();
        store
            .commit(Uuid::nil(), NonEmpty::singleton(Action::AddSnapshot(snapshot(id, 0))))
            .await
            .unwrap();
        let loaded = store
            .load_snapshots(&RecordFilter::for_aggregate(Uuid::nil(), "Counter", id))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn delete_all_events_checks_version_and_cascades() {
        let store = Store::new();
        let id = Uuid::new_v4();
        store
            .commit(Uuid::nil(), add(vec![event(id, 0), event(id, 1)]))
            .await
            .unwrap();
        store
            .commit(Uuid::nil(), NonEmpty::singleton(Action::AddSnapshot(snapshot(id, 1))))
            .await
            .unwrap();

        for stale in [1, 3] {
            let err = store
                .commit(
                    Uuid::nil(),
                    NonEmpty::singleton(Action::DeleteAllEvents {
                        aggregate_id: id,
                        version: stale,
                    }),
                )
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                CommitError::Conflict(ConcurrencyConflict {
                    kind: ConflictKind::StreamChanged,
                    ..
                })
            ));
        }

        store
            .commit(
                Uuid::nil(),
                NonEmpty::singleton(Action::DeleteAllEvents {
                    aggregate_id: id,
                    version: 2,
                }),
            )
            .await
            .unwrap();
        assert!(indices(&store, id).await.is_empty());
        let snapshots = store
            .load_snapshots(&RecordFilter::for_aggregate(Uuid::nil(), "Counter", id))
            .await
            .unwrap();
        assert!(snapshots.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_snapshot_conflicts() {
        let store = Store::new();
        let err = store
            .commit(
                Uuid::nil(),
                NonEmpty::singleton(Action::DeleteSnapshot {
                    aggregate_id: Uuid::new_v4(),
                    index: 0,
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Conflict(ConcurrencyConflict {
                kind: ConflictKind::MissingSnapshot,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn projections_upsert_replace_and_delete() {
        let store = Store::new();
        let id = Uuid::new_v4();
        for hash in ["v1", "v2"] {
            store
                .commit(
                    Uuid::nil(),
                    NonEmpty::singleton(Action::UpsertProjection(projection(id, hash))),
                )
                .await
                .unwrap();
        }
        let filter = ProjectionFilter::for_type("CounterView");
        let loaded = store.load_projections(&filter).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].hash(), Some("v2"));

        let delete = || {
            NonEmpty::singleton(Action::DeleteProjection {
                aggregate_id: id,
                projection_type: "CounterView".to_string(),
            })
        };
        store.commit(Uuid::nil(), delete()).await.unwrap();
        store.commit(Uuid::nil(), delete()).await.unwrap();
        assert!(store.load_projections(&filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn descending_limit_returns_latest() {
        let store = Store::new();
        let id = Uuid::new_v4();
        store
            .commit(
                Uuid::nil(),
                add(vec![event(id, 0), event(id, 1), event(id, 2)]),
            )
            .await
            .unwrap();
        let latest = store
            .load_events(
                &RecordFilter::for_aggregate(Uuid::nil(), "Counter", id)
                    .descending()
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].header.index, 2);
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let store = Store::new();
        let id = Uuid::new_v4();
        store.commit(Uuid::nil(), add(vec![event(id, 0)])).await.unwrap();
        let other = Uuid::new_v4();
        let loaded = store
            .load_events(&RecordFilter::for_aggregate(other, "Counter", id))
            .await
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn foreign_partition_record_is_rejected() {
        let store = Store::new();
        let err = store
            .commit(Uuid::new_v4(), add(vec![event(Uuid::new_v4(), 0)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommitError::Store(InMemoryError::ForeignRecord { .. })
        ));
    }
}
