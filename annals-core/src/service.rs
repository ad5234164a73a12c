//! Application service orchestration.
//!
//! [`AggregateService`] rehydrates aggregates from snapshots and events, and
//! persists them: new events, any snapshot the interval calls for, and every
//! registered projection go to the store in one transaction.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, AggregateRoot, Handle},
    concurrency::ConcurrencyConflict,
    payload::{DecodeError, PayloadSet},
    projection::{ProjectionFactory, ProjectionUpdate, Projectors, Staged},
    record::{Projection, RecordKind, StoredRecord},
    registry::RecordRegistry,
    store::{CommitError, ProjectionFilter, RecordFilter, RecordStore, TransactionError},
    validation::ValidationError,
};

/// Error returned when aggregates or projections cannot be read back.
#[derive(Debug, Error)]
pub enum LoadError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error("failed to load records: {0}")]
    Store(#[source] StoreError),
    #[error("failed to decode {kind} {record_id}: {error}")]
    Decode {
        kind: RecordKind,
        record_id: Uuid,
        #[source]
        error: DecodeError,
    },
    /// Stored records do not form a valid stream for this aggregate.
    #[error("failed to replay stored records: {0}")]
    Replay(#[source] ValidationError),
}

/// Error returned by [`AggregateService::persist`]. Nothing was written.
#[derive(Debug, Error)]
pub enum PersistError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error("failed to stage records: {0}")]
    Stage(#[from] TransactionError),
    #[error(transparent)]
    Conflict(ConcurrencyConflict),
    #[error("failed to persist records: {0}")]
    Store(#[source] StoreError),
}

impl<StoreError> From<CommitError<StoreError>> for PersistError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    fn from(error: CommitError<StoreError>) -> Self {
        match error {
            CommitError::Conflict(conflict) => Self::Conflict(conflict),
            CommitError::Store(error) => Self::Store(error),
        }
    }
}

/// Error type for [`AggregateService::execute`].
#[derive(Debug, Error)]
pub enum CommandError<AggregateError, StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error("aggregate rejected command: {0}")]
    Aggregate(AggregateError),
    #[error(transparent)]
    Load(#[from] LoadError<StoreError>),
    #[error(transparent)]
    Persist(#[from] PersistError<StoreError>),
}

/// Error type for [`AggregateService::update_projections`].
#[derive(Debug, Error)]
pub enum UpdateError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    #[error("no factory registered for projection `{projection_type}`")]
    UnregisteredFactory { projection_type: &'static str },
    #[error(transparent)]
    Load(#[from] LoadError<StoreError>),
    #[error(transparent)]
    Persist(#[from] PersistError<StoreError>),
}

/// Rehydrates and persists aggregates on top of a [`RecordStore`].
///
/// Configure once at startup and share by reference; the service holds no
/// per-request state.
///
/// ```ignore
/// let service = AggregateService::new(inmemory::Store::new())
///     .with_registry(Arc::new(registry))
///     .with_projection(BalanceView);
///
/// let mut account = AggregateRoot::<Account>::create();
/// account.execute(&Deposit { amount: 10 })?;
/// service.persist(&mut account).await?;
/// ```
pub struct AggregateService<S> {
    store: S,
    registry: Arc<RecordRegistry>,
    projectors: Projectors,
}

impl<S: std::fmt::Debug> std::fmt::Debug for AggregateService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateService")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("projectors", &self.projectors)
            .finish()
    }
}

impl<S> AggregateService<S>
where
    S: RecordStore,
{
    /// Service with an empty registry (no migrators) and no projections.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: Arc::new(RecordRegistry::default()),
            projectors: Projectors::default(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<RecordRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Maintain `factory`'s projection on every persist of its aggregate.
    #[must_use]
    pub fn with_projection<F: ProjectionFactory>(mut self, factory: F) -> Self {
        self.projectors.insert(factory);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &RecordRegistry {
        &self.registry
    }

    /// Load the current state of an aggregate.
    ///
    /// Returns `Ok(None)` if no record of it exists.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the store fails, a record cannot be decoded,
    /// or the stored stream is not consecutive.
    pub async fn rehydrate<A: Aggregate>(
        &self,
        partition_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AggregateRoot<A>>, LoadError<S::Error>> {
        self.load(partition_id, id, None).await
    }

    /// Load an aggregate as it was at `as_of`, ignoring later records.
    ///
    /// Returns `Ok(None)` if the aggregate had no records yet at that time.
    ///
    /// # Errors
    ///
    /// Same as [`rehydrate`](Self::rehydrate).
    pub async fn rehydrate_as_of<A: Aggregate>(
        &self,
        partition_id: Uuid,
        id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<Option<AggregateRoot<A>>, LoadError<S::Error>> {
        self.load(partition_id, id, Some(as_of)).await
    }

    #[tracing::instrument(skip(self), fields(aggregate_type = A::TYPE))]
    async fn load<A: Aggregate>(
        &self,
        partition_id: Uuid,
        id: Uuid,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Option<AggregateRoot<A>>, LoadError<S::Error>> {
        let mut root = AggregateRoot::<A>::new(partition_id, id);
        let mut filter = RecordFilter::for_aggregate(partition_id, A::TYPE, id);
        if let Some(as_of) = as_of {
            filter = filter.until(as_of);
        }

        if A::SNAPSHOT_INTERVAL > 0 {
            let latest = self
                .store
                .load_snapshots(&filter.clone().descending().limit(1))
                .await
                .map_err(LoadError::Store)?;
            if let Some(record) = latest.into_iter().next() {
                let snapshot = decode(record, RecordKind::Snapshot, |r| {
                    self.registry.decode_snapshot::<A::Snapshot>(r)
                })?;
                tracing::trace!(index = snapshot.header.index, "restoring from snapshot");
                root.apply_snapshot(snapshot).map_err(LoadError::Replay)?;
            }
        }

        if root.version() > 0 {
            filter = filter.after(root.version() - 1);
        }
        let events = self
            .store
            .load_events(&filter)
            .await
            .map_err(LoadError::Store)?;
        let replayed = events.len();
        for record in events {
            let event = decode(record, RecordKind::Event, |r| {
                self.registry.decode_event::<A::Event>(r)
            })?;
            root.replay(&event).map_err(LoadError::Replay)?;
        }

        if root.version() == 0 {
            tracing::trace!("aggregate not found");
            return Ok(None);
        }
        root.finish(as_of.unwrap_or_else(Utc::now));
        tracing::debug!(
            version = root.version(),
            events_replayed = replayed,
            "aggregate rehydrated"
        );
        Ok(Some(root))
    }

    /// Write an aggregate's uncommitted events, plus any snapshot and
    /// projections they trigger, in one transaction.
    ///
    /// A clean aggregate is a no-op. On failure the uncommitted events stay
    /// buffered; after a conflict the caller should rehydrate and retry.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Conflict`] if another writer changed the
    /// stream, and other variants for staging or store failures.
    #[tracing::instrument(
        skip(self, root),
        fields(
            aggregate_type = A::TYPE,
            aggregate_id = %root.id(),
            event_count = root.uncommitted().len()
        )
    )]
    pub async fn persist<A: Aggregate>(
        &self,
        root: &mut AggregateRoot<A>,
    ) -> Result<(), PersistError<S::Error>> {
        if !root.is_dirty() {
            tracing::trace!("nothing to persist");
            return Ok(());
        }

        let mut tx = self.store.begin(root.partition_id());
        tx.add_events(root.uncommitted())?;

        let snapshot = if root.snapshot_interval_exceeded() {
            root.take_snapshot()
        } else {
            None
        };
        if let Some(snapshot) = &snapshot {
            tx.add_snapshot(snapshot)?;
        }

        for factory in self.projectors.for_aggregate::<A>() {
            match factory.stage(root)? {
                Staged::Upsert(record) => tx.push_projection(record),
                Staged::Delete {
                    aggregate_id,
                    projection_type,
                } => {
                    tx.delete_projection(aggregate_id, projection_type)?;
                }
            }
        }

        tx.commit().await?;
        root.mark_committed();
        tracing::debug!(
            version = root.version(),
            snapshot = snapshot.is_some(),
            "aggregate persisted"
        );
        Ok(())
    }

    /// Rehydrate (or start) an aggregate, run `command`, and persist the
    /// result. Returns the persisted aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Aggregate`] if the command is rejected, and
    /// the load or persist error otherwise.
    pub async fn execute<A, C>(
        &self,
        partition_id: Uuid,
        id: Uuid,
        command: &C,
    ) -> Result<AggregateRoot<A>, CommandError<A::Error, S::Error>>
    where
        A: Handle<C>,
        C: Sync,
    {
        let mut root = self
            .rehydrate::<A>(partition_id, id)
            .await?
            .unwrap_or_else(|| AggregateRoot::new(partition_id, id));
        root.execute(command).map_err(CommandError::Aggregate)?;
        self.persist(&mut root).await?;
        Ok(root)
    }

    /// Delete every event and snapshot of an aggregate, and its registered
    /// projections. Returns `false` if the aggregate did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Persist`] wrapping a conflict if events were
    /// appended since the stream length was read.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::TYPE))]
    pub async fn delete<A: Aggregate>(
        &self,
        partition_id: Uuid,
        id: Uuid,
    ) -> Result<bool, UpdateError<S::Error>> {
        let latest = self
            .store
            .load_events(
                &RecordFilter::for_aggregate(partition_id, A::TYPE, id)
                    .descending()
                    .limit(1),
            )
            .await
            .map_err(LoadError::Store)?;
        let Some(last) = latest.first() else {
            return Ok(false);
        };

        let mut tx = self.store.begin(partition_id);
        tx.delete_all_events(id, last.header.index + 1)
            .map_err(PersistError::Stage)?;
        for factory in self.projectors.for_aggregate::<A>() {
            tx.delete_projection(id, factory.projection_type())
                .map_err(PersistError::Stage)?;
        }
        tx.commit().await.map_err(PersistError::from)?;
        tracing::debug!(events_deleted = last.header.index + 1, "aggregate deleted");
        Ok(true)
    }

    /// The stored projection `F` of one aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the store fails or the row cannot be decoded.
    pub async fn projection<F: ProjectionFactory>(
        &self,
        partition_id: Uuid,
        aggregate_id: Uuid,
    ) -> Result<Option<Projection<F::Projection>>, LoadError<S::Error>> {
        let filter = ProjectionFilter::for_type(F::PROJECTION_TYPE)
            .in_partition(partition_id)
            .for_aggregate(aggregate_id)
            .limit(1);
        Ok(self.projections::<F::Projection>(&filter).await?.pop())
    }

    /// Projections matching `filter`, decoded as `P`.
    ///
    /// `P` may be the full variant set of a projection type or a single
    /// variant; narrow `filter` with
    /// [`ProjectionFilter::variant`] in the latter case.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the store fails or a row cannot be decoded.
    pub async fn projections<P: PayloadSet>(
        &self,
        filter: &ProjectionFilter,
    ) -> Result<Vec<Projection<P>>, LoadError<S::Error>> {
        self.store
            .load_projections(filter)
            .await
            .map_err(LoadError::Store)?
            .into_iter()
            .map(|record| {
                decode(record, RecordKind::Projection, |r| {
                    self.registry.decode_projection::<P>(r)
                })
            })
            .collect()
    }

    /// Rebuild every stored projection of `F` produced by older logic.
    ///
    /// Each stale row is recomputed from its rehydrated aggregate and written
    /// in its own transaction. Rows whose aggregate no longer exists are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::UnregisteredFactory`] if `F` was not added with
    /// [`with_projection`](Self::with_projection); otherwise the first load
    /// or persist failure. Rows processed before the failure stay updated.
    #[tracing::instrument(skip(self), fields(projection_type = F::PROJECTION_TYPE))]
    pub async fn update_projections<F: ProjectionFactory>(
        &self,
    ) -> Result<ProjectionUpdate, UpdateError<S::Error>> {
        let materializer =
            self.projectors
                .factory::<F>()
                .ok_or(UpdateError::UnregisteredFactory {
                    projection_type: F::PROJECTION_TYPE,
                })?;

        let stale = self
            .store
            .load_projections(
                &ProjectionFilter::for_type(F::PROJECTION_TYPE).stale(materializer.fingerprint()),
            )
            .await
            .map_err(LoadError::Store)?;

        let mut update = ProjectionUpdate::default();
        for row in stale {
            let partition_id = row.header.partition_id;
            let aggregate_id = row.header.aggregate_id;
            let Some(root) = self
                .rehydrate::<F::Aggregate>(partition_id, aggregate_id)
                .await?
            else {
                tracing::warn!(%aggregate_id, "stale projection has no aggregate; skipping");
                update.skipped += 1;
                continue;
            };

            let mut tx = self.store.begin(partition_id);
            if let Some(projection) = materializer.materialize(&root) {
                tx.upsert_projection(&projection)
                    .map_err(PersistError::Stage)?;
                update.updated += 1;
            } else {
                tx.delete_projection(aggregate_id, F::PROJECTION_TYPE)
                    .map_err(PersistError::Stage)?;
                update.deleted += 1;
            }
            tx.commit().await.map_err(PersistError::from)?;
        }

        tracing::info!(
            updated = update.updated,
            deleted = update.deleted,
            skipped = update.skipped,
            "stale projections rebuilt"
        );
        Ok(update)
    }

    /// Number of registered projection factories.
    #[must_use]
    pub fn projection_count(&self) -> usize {
        self.projectors.len()
    }
}

fn decode<T, StoreError>(
    record: StoredRecord,
    kind: RecordKind,
    decoder: impl FnOnce(StoredRecord) -> Result<T, DecodeError>,
) -> Result<T, LoadError<StoreError>>
where
    StoreError: std::error::Error + 'static,
{
    let record_id = record.header.record_id;
    decoder(record).map_err(|error| LoadError::Decode {
        kind,
        record_id,
        error,
    })
}
