//! Persistence layer abstractions.
//!
//! This module describes the backend contract ([`RecordStore`]), the read
//! filters, the queued write operations ([`Action`]) and the partition-scoped
//! [`RecordTransaction`] builder. A reference in-memory backend lives in
//! [`inmemory`].
use std::future::Future;

use chrono::{DateTime, Utc};
pub use nonempty::NonEmpty;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    concurrency::ConcurrencyConflict,
    payload::{Payload, PayloadSet},
    record::{Event, Projection, RecordKind, Snapshot, StoredRecord},
    validation::{self, ValidationError},
};

pub mod inmemory;

/// Convenience alias for record batches loaded from a store.
pub type LoadResult<Err> = Result<Vec<StoredRecord>, Err>;

/// Sort order of a query, by index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Filter describing which events or snapshots should be loaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub partition_id: Option<Uuid>,
    pub aggregate_id: Option<Uuid>,
    pub aggregate_type: Option<String>,
    /// Restrict to these discriminators. `None` loads every type.
    pub record_types: Option<Vec<String>>,
    /// Only load records with index strictly greater than this value.
    pub after_index: Option<i64>,
    /// Only load records with a timestamp at or before this instant.
    pub until: Option<DateTime<Utc>>,
    pub order: Order,
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Load records of one aggregate type across every partition.
    #[must_use]
    pub fn for_type(aggregate_type: impl Into<String>) -> Self {
        Self {
            aggregate_type: Some(aggregate_type.into()),
            ..Self::default()
        }
    }

    /// Load the records of a single aggregate instance.
    #[must_use]
    pub fn for_aggregate(
        partition_id: Uuid,
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
    ) -> Self {
        Self {
            partition_id: Some(partition_id),
            aggregate_id: Some(aggregate_id),
            aggregate_type: Some(aggregate_type.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn in_partition(mut self, partition_id: Uuid) -> Self {
        self.partition_id = Some(partition_id);
        self
    }

    /// Only load records with index strictly greater than `index`.
    ///
    /// Used for snapshot-based loading: load a snapshot at index N, then the
    /// events `after(N)`.
    #[must_use]
    pub const fn after(mut self, index: i64) -> Self {
        self.after_index = Some(index);
        self
    }

    /// Only load records written at or before `timestamp`.
    #[must_use]
    pub const fn until(mut self, timestamp: DateTime<Utc>) -> Self {
        self.until = Some(timestamp);
        self
    }

    #[must_use]
    pub fn with_record_types(mut self, record_types: &[&str]) -> Self {
        self.record_types = Some(record_types.iter().map(ToString::to_string).collect());
        self
    }

    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.order = Order::Descending;
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes every predicate except ordering and limit.
    #[must_use]
    pub fn matches(&self, record: &StoredRecord) -> bool {
        let header = &record.header;
        self.partition_id.is_none_or(|p| header.partition_id == p)
            && self.aggregate_id.is_none_or(|a| header.aggregate_id == a)
            && self
                .aggregate_type
                .as_ref()
                .is_none_or(|t| &header.aggregate_type == t)
            && self
                .record_types
                .as_ref()
                .is_none_or(|types| types.contains(&header.record_type))
            && self.after_index.is_none_or(|after| header.index > after)
            && self.until.is_none_or(|until| header.timestamp <= until)
    }
}

/// Filter describing which projections should be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectionFilter {
    /// Base projection type; always required.
    pub projection_type: String,
    pub partition_id: Option<Uuid>,
    pub aggregate_id: Option<Uuid>,
    /// Restrict to these variant discriminators.
    pub record_types: Option<Vec<String>>,
    /// Only load projections whose fingerprint differs from this value.
    pub hash_not: Option<String>,
    pub limit: Option<usize>,
}

impl ProjectionFilter {
    #[must_use]
    pub fn for_type(projection_type: impl Into<String>) -> Self {
        Self {
            projection_type: projection_type.into(),
            partition_id: None,
            aggregate_id: None,
            record_types: None,
            hash_not: None,
            limit: None,
        }
    }

    #[must_use]
    pub const fn in_partition(mut self, partition_id: Uuid) -> Self {
        self.partition_id = Some(partition_id);
        self
    }

    #[must_use]
    pub const fn for_aggregate(mut self, aggregate_id: Uuid) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    /// Narrow to the variants of payload set `P`.
    #[must_use]
    pub fn variant<P: PayloadSet>(mut self) -> Self {
        self.record_types = Some(P::TYPES.iter().map(ToString::to_string).collect());
        self
    }

    /// Only load rows not produced by `fingerprint`.
    #[must_use]
    pub fn stale(mut self, fingerprint: impl Into<String>) -> Self {
        self.hash_not = Some(fingerprint.into());
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn matches(&self, record: &StoredRecord) -> bool {
        let header = &record.header;
        record.projection_type() == Some(self.projection_type.as_str())
            && self.partition_id.is_none_or(|p| header.partition_id == p)
            && self.aggregate_id.is_none_or(|a| header.aggregate_id == a)
            && self
                .record_types
                .as_ref()
                .is_none_or(|types| types.contains(&header.record_type))
            && self
                .hash_not
                .as_ref()
                .is_none_or(|hash| record.hash() != Some(hash.as_str()))
    }
}

/// One queued write. A backend applies a whole list atomically.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Append consecutive events of one stream, sorted by index. A batch
    /// starting above zero requires the event at `first - 1` to exist.
    AddEvents(NonEmpty<StoredRecord>),
    /// Store a snapshot. The event at the same index must exist.
    AddSnapshot(StoredRecord),
    /// Insert or replace the projection keyed by aggregate and projection type.
    UpsertProjection(StoredRecord),
    /// Delete events `0..version` and every snapshot of the stream. Rejected
    /// if an event at `version` exists or any index below it is missing.
    DeleteAllEvents { aggregate_id: Uuid, version: i64 },
    DeleteSnapshot { aggregate_id: Uuid, index: i64 },
    /// Delete a projection; absent rows are ignored.
    DeleteProjection {
        aggregate_id: Uuid,
        projection_type: String,
    },
}

impl Action {
    /// Aggregate the action targets.
    #[must_use]
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            Self::AddEvents(events) => events.head.header.aggregate_id,
            Self::AddSnapshot(record) | Self::UpsertProjection(record) => {
                record.header.aggregate_id
            }
            Self::DeleteAllEvents { aggregate_id, .. }
            | Self::DeleteSnapshot { aggregate_id, .. }
            | Self::DeleteProjection { aggregate_id, .. } => *aggregate_id,
        }
    }
}

/// Error from staging an action on a [`RecordTransaction`].
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to encode {kind} `{record_type}`: {source}")]
    Encode {
        kind: RecordKind,
        record_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error from committing a transaction. Nothing was applied.
#[derive(Debug, Error)]
pub enum CommitError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// A conditional check failed because the stream changed concurrently.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Underlying store error.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Abstraction over the persistence layer for records.
///
/// Three logical collections (events, snapshots, projections) with
/// uniqueness on `(partition, aggregate, index)` for the first two and on
/// `(partition, aggregate, projection type)` for projections. Reads are
/// plain filtered queries; writes go through [`RecordTransaction`] and
/// arrive at [`commit`](RecordStore::commit) as one list of actions.
// ANCHOR: record_store_trait
pub trait RecordStore: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load events matching `filter`, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load_events<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> impl Future<Output = LoadResult<Self::Error>> + Send + 'a;

    /// Load snapshots matching `filter`, ordered by index.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load_snapshots<'a>(
        &'a self,
        filter: &'a RecordFilter,
    ) -> impl Future<Output = LoadResult<Self::Error>> + Send + 'a;

    /// Load projections matching `filter`, ordered by partition then
    /// aggregate id.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when loading fails.
    fn load_projections<'a>(
        &'a self,
        filter: &'a ProjectionFilter,
    ) -> impl Future<Output = LoadResult<Self::Error>> + Send + 'a;

    /// Apply `actions` in order as one atomic unit within `partition_id`.
    ///
    /// Implementations must apply all actions or none, and must perform the
    /// conditional checks documented on [`Action`] as part of the same
    /// atomic operation.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] when a conditional check fails and
    /// [`CommitError::Store`] for backend failures.
    fn commit<'a>(
        &'a self,
        partition_id: Uuid,
        actions: NonEmpty<Action>,
    ) -> impl Future<Output = Result<(), CommitError<Self::Error>>> + Send + 'a;

    /// Begin a transaction scoped to one partition.
    fn begin(&self, partition_id: Uuid) -> RecordTransaction<'_, Self>
    where
        Self: Sized,
    {
        RecordTransaction::new(self, partition_id)
    }
}
// ANCHOR_END: record_store_trait

/// Partition-scoped batch of record actions.
///
/// Each builder method validates its input immediately and returns the
/// transaction for chaining, so a malformed call is never queued. Actions are
/// sent to the store in one piece by [`commit`](Self::commit). If the
/// transaction is dropped without committing, the queued actions are
/// discarded.
#[derive(Debug)]
pub struct RecordTransaction<'a, S: RecordStore> {
    store: &'a S,
    partition_id: Uuid,
    actions: Vec<Action>,
    committed: bool,
}

impl<'a, S: RecordStore> RecordTransaction<'a, S> {
    pub const fn new(store: &'a S, partition_id: Uuid) -> Self {
        Self {
            store,
            partition_id,
            actions: Vec::new(),
            committed: false,
        }
    }

    #[must_use]
    pub const fn partition_id(&self) -> Uuid {
        self.partition_id
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Queue consecutive events of one stream.
    ///
    /// An empty slice queues nothing. Calling this twice for the same
    /// aggregate extends the earlier batch, which requires the new events to
    /// continue directly after it.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Validation`] if the events break any batch
    /// invariant or belong to another partition, and
    /// [`TransactionError::Encode`] if a payload cannot be encoded.
    pub fn add_events<E: PayloadSet>(
        &mut self,
        events: &[Event<E>],
    ) -> Result<&mut Self, TransactionError> {
        let Some(first) = events.first() else {
            return Ok(self);
        };
        for event in events {
            validation::validate_type(&event.header, event.data.record_type())?;
        }
        validation::validate_event_batch(events.iter().map(|e| &e.header))?;
        validation::validate_partition(&first.header, self.partition_id)?;

        let mut staged = events
            .iter()
            .map(|event| {
                event.to_stored().map_err(|source| TransactionError::Encode {
                    kind: RecordKind::Event,
                    record_type: event.header.record_type.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        staged.sort_by_key(|record| record.header.index);

        let aggregate_id = first.header.aggregate_id;
        let queued = self.actions.iter_mut().find_map(|action| match action {
            Action::AddEvents(batch) if batch.head.header.aggregate_id == aggregate_id => {
                Some(batch)
            }
            _ => None,
        });

        match queued {
            Some(batch) => {
                let expected = batch.last().header.index + 1;
                let actual = staged[0].header.index;
                if actual != expected {
                    return Err(ValidationError::UnexpectedIndex { expected, actual }.into());
                }
                validation::validate_timestamp(
                    &staged[0].header,
                    Some(batch.last().header.timestamp),
                )?;
                batch.extend(staged);
            }
            None => {
                if let Some(batch) = NonEmpty::from_vec(staged) {
                    self.push(Action::AddEvents(batch));
                }
            }
        }
        tracing::trace!(
            %aggregate_id,
            event_count = events.len(),
            "events staged in transaction"
        );
        Ok(self)
    }

    /// Queue a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Validation`] for an invalid header or a
    /// foreign partition, and [`TransactionError::Encode`] if the payload
    /// cannot be encoded.
    pub fn add_snapshot<T>(&mut self, snapshot: &Snapshot<T>) -> Result<&mut Self, TransactionError>
    where
        T: Payload + Serialize,
    {
        let record = stage_snapshot(snapshot, self.partition_id)?;
        tracing::trace!(
            aggregate_id = %record.header.aggregate_id,
            index = record.header.index,
            "snapshot staged in transaction"
        );
        self.push(Action::AddSnapshot(record));
        Ok(self)
    }

    /// Queue an insert-or-replace of a projection.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Validation`] for an invalid header or a
    /// foreign partition, and [`TransactionError::Encode`] if the payload
    /// cannot be encoded.
    pub fn upsert_projection<P: PayloadSet>(
        &mut self,
        projection: &Projection<P>,
    ) -> Result<&mut Self, TransactionError> {
        let record = stage_projection(projection, self.partition_id)?;
        self.push_projection(record);
        Ok(self)
    }

    /// Queue deletion of every event below `version` (and, by cascade, every
    /// snapshot) of one stream. `version == 0` queues nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Validation`] for a nil aggregate id or a
    /// negative version.
    pub fn delete_all_events(
        &mut self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<&mut Self, TransactionError> {
        if aggregate_id.is_nil() {
            return Err(ValidationError::NilTargetAggregate.into());
        }
        if version < 0 {
            return Err(ValidationError::NegativeVersion { version }.into());
        }
        if version > 0 {
            self.push(Action::DeleteAllEvents {
                aggregate_id,
                version,
            });
        }
        Ok(self)
    }

    /// Queue deletion of the snapshot at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Validation`] for a nil aggregate id or a
    /// negative index.
    pub fn delete_snapshot(
        &mut self,
        aggregate_id: Uuid,
        index: i64,
    ) -> Result<&mut Self, TransactionError> {
        if aggregate_id.is_nil() {
            return Err(ValidationError::NilTargetAggregate.into());
        }
        if index < 0 {
            return Err(ValidationError::NegativeVersion { version: index }.into());
        }
        self.push(Action::DeleteSnapshot {
            aggregate_id,
            index,
        });
        Ok(self)
    }

    /// Queue deletion of a projection.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Validation`] for a nil aggregate id or an
    /// empty projection type.
    pub fn delete_projection(
        &mut self,
        aggregate_id: Uuid,
        projection_type: &str,
    ) -> Result<&mut Self, TransactionError> {
        if aggregate_id.is_nil() {
            return Err(ValidationError::NilTargetAggregate.into());
        }
        if projection_type.is_empty() {
            return Err(ValidationError::EmptyProjectionType { aggregate_id }.into());
        }
        self.push(Action::DeleteProjection {
            aggregate_id,
            projection_type: projection_type.to_string(),
        });
        Ok(self)
    }

    /// Queue an already validated projection row, replacing any earlier
    /// upsert of the same key in this transaction.
    pub(crate) fn push_projection(&mut self, record: StoredRecord) {
        let key = (record.header.aggregate_id, record.projection_type().map(str::to_owned));
        self.actions.retain(|action| match action {
            Action::UpsertProjection(queued) => {
                (queued.header.aggregate_id, queued.projection_type().map(str::to_owned)) != key
            }
            _ => true,
        });
        tracing::trace!(
            aggregate_id = %record.header.aggregate_id,
            projection_type = ?record.projection_type(),
            "projection staged in transaction"
        );
        self.push(Action::UpsertProjection(record));
    }

    fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Commit every queued action atomically.
    ///
    /// Committing an empty transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] if another writer changed a touched
    /// stream, or [`CommitError::Store`] if persistence fails. In both cases
    /// none of the actions were applied.
    pub async fn commit(mut self) -> Result<(), CommitError<S::Error>> {
        self.committed = true;
        let actions = std::mem::take(&mut self.actions);
        let Some(actions) = NonEmpty::from_vec(actions) else {
            tracing::trace!(partition_id = %self.partition_id, "empty transaction, nothing to commit");
            return Ok(());
        };
        tracing::debug!(
            partition_id = %self.partition_id,
            action_count = actions.len(),
            "committing transaction"
        );
        self.store.commit(self.partition_id, actions).await
    }
}

impl<S: RecordStore> Drop for RecordTransaction<'_, S> {
    fn drop(&mut self) {
        if !self.committed && !self.actions.is_empty() {
            tracing::trace!(
                partition_id = %self.partition_id,
                action_count = self.actions.len(),
                "transaction dropped without commit; discarding queued actions"
            );
        }
    }
}

/// Validate and encode a snapshot for `partition_id`.
pub(crate) fn stage_snapshot<T>(
    snapshot: &Snapshot<T>,
    partition_id: Uuid,
) -> Result<StoredRecord, TransactionError>
where
    T: Payload + Serialize,
{
    validation::validate_header(&snapshot.header)?;
    validation::validate_type(&snapshot.header, T::TYPE)?;
    validation::validate_partition(&snapshot.header, partition_id)?;
    snapshot
        .to_stored()
        .map_err(|source| TransactionError::Encode {
            kind: RecordKind::Snapshot,
            record_type: T::TYPE.to_string(),
            source,
        })
}

/// Validate and encode a projection for `partition_id`.
pub(crate) fn stage_projection<P: PayloadSet>(
    projection: &Projection<P>,
    partition_id: Uuid,
) -> Result<StoredRecord, TransactionError> {
    validation::validate_header(&projection.header)?;
    validation::validate_type(&projection.header, projection.data.record_type())?;
    validation::validate_partition(&projection.header, partition_id)?;
    if projection.projection_type.is_empty() {
        return Err(ValidationError::EmptyProjectionType {
            aggregate_id: projection.header.aggregate_id,
        }
        .into());
    }
    projection
        .to_stored()
        .map_err(|source| TransactionError::Encode {
            kind: RecordKind::Projection,
            record_type: projection.header.record_type.clone(),
            source,
        })
}
