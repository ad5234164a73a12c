//! Read-side primitives.
//!
//! A [`ProjectionFactory`] derives one read model from one aggregate. The
//! service re-runs every factory registered for an aggregate type on each
//! persist and writes the result in the same transaction as the events, so
//! projections never lag the log they were built from.
//!
//! Every stored projection carries the [`fingerprint`] of the logic that
//! produced it. Changing either the aggregate's or the factory's `VERSION`
//! changes the fingerprint, which lets
//! [`AggregateService::update_projections`](crate::service::AggregateService::update_projections)
//! find and rebuild only the rows built by older logic.
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    aggregate::{Aggregate, AggregateRoot},
    payload::PayloadSet,
    record::{Projection, RecordHeader, StoredRecord},
    store::{self, TransactionError},
};

/// Builds a read model from an aggregate's current state.
///
/// Returning `None` means the aggregate should have no projection of this
/// type; any previously stored row is deleted.
///
/// ```ignore
/// struct BalanceView;
///
/// impl ProjectionFactory for BalanceView {
///     type Aggregate = Account;
///     type Projection = Balance;
///     const PROJECTION_TYPE: &'static str = "Balance";
///
///     fn project(&self, root: &AggregateRoot<Account>) -> Option<Balance> {
///         Some(Balance { amount: root.state().balance })
///     }
/// }
/// ```
// ANCHOR: projection_factory_trait
pub trait ProjectionFactory: Send + Sync + 'static {
    type Aggregate: Aggregate;
    /// Payload set of the projection's variants.
    type Projection: PayloadSet + Send + Sync + 'static;

    /// Key under which rows of this projection are stored.
    const PROJECTION_TYPE: &'static str;

    /// Tag for the projection logic. Bump it to mark existing rows stale.
    const VERSION: &'static str = "1";

    fn project(&self, root: &AggregateRoot<Self::Aggregate>) -> Option<Self::Projection>;
}
// ANCHOR_END: projection_factory_trait

/// Fingerprint of the aggregate replay logic plus the factory logic.
///
/// A lowercase hex SHA-256 over both type names and both version tags. It is
/// stable across processes and deploys.
#[must_use]
pub fn fingerprint<F: ProjectionFactory>() -> String {
    let mut hasher = Sha256::new();
    for part in [
        <F::Aggregate as Aggregate>::TYPE,
        <F::Aggregate as Aggregate>::VERSION,
        F::PROJECTION_TYPE,
        F::VERSION,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    format!("{:x}", hasher.finalize())
}

/// Counts reported by a bulk projection update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProjectionUpdate {
    /// Rows rewritten with the current logic.
    pub updated: usize,
    /// Rows removed because the factory no longer produces a projection.
    pub deleted: usize,
    /// Rows left alone because their aggregate no longer exists.
    pub skipped: usize,
}

/// What a factory decided for one aggregate.
pub(crate) enum Staged {
    Upsert(StoredRecord),
    Delete {
        aggregate_id: Uuid,
        projection_type: &'static str,
    },
}

/// Object-safe view of a factory for one aggregate type.
pub(crate) trait DynFactory<A: Aggregate>: Send + Sync {
    fn projection_type(&self) -> &'static str;

    /// [`TypeId`] of the concrete factory.
    fn factory_type(&self) -> TypeId;

    fn stage(&self, root: &AggregateRoot<A>) -> Result<Staged, TransactionError>;
}

/// A factory together with its precomputed fingerprint.
pub(crate) struct Materializer<F> {
    factory: Arc<F>,
    fingerprint: String,
}

impl<F: ProjectionFactory> Materializer<F> {
    fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            fingerprint: fingerprint::<F>(),
        }
    }

    pub(crate) fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Run the factory. The projection's index is the last folded event.
    pub(crate) fn materialize(
        &self,
        root: &AggregateRoot<F::Aggregate>,
    ) -> Option<Projection<F::Projection>> {
        let data = self.factory.project(root)?;
        Some(Projection {
            header: RecordHeader {
                partition_id: root.partition_id(),
                aggregate_id: root.id(),
                record_id: Uuid::new_v4(),
                aggregate_type: <F::Aggregate as Aggregate>::TYPE.to_string(),
                record_type: data.record_type().to_string(),
                timestamp: Utc::now(),
                index: (root.version() - 1).max(0),
            },
            projection_type: F::PROJECTION_TYPE.to_string(),
            hash: self.fingerprint.clone(),
            data,
        })
    }
}

impl<F: ProjectionFactory> DynFactory<F::Aggregate> for Materializer<F> {
    fn projection_type(&self) -> &'static str {
        F::PROJECTION_TYPE
    }

    fn factory_type(&self) -> TypeId {
        TypeId::of::<F>()
    }

    fn stage(&self, root: &AggregateRoot<F::Aggregate>) -> Result<Staged, TransactionError> {
        match self.materialize(root) {
            Some(projection) => {
                store::stage_projection(&projection, root.partition_id()).map(Staged::Upsert)
            }
            None => Ok(Staged::Delete {
                aggregate_id: root.id(),
                projection_type: F::PROJECTION_TYPE,
            }),
        }
    }
}

/// Factories registered on a service, looked up two ways: every factory of
/// one aggregate type (for persist), and one factory by its own type (for
/// bulk updates).
///
/// Both maps hold type-erased values keyed by [`TypeId`]; each entry is only
/// ever inserted under the key of the type it holds.
#[derive(Default)]
pub(crate) struct Projectors {
    by_aggregate: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    by_factory: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

type FactoryList<A> = Vec<Arc<dyn DynFactory<A>>>;

impl Projectors {
    /// Register `factory`. A factory already registered for the same
    /// aggregate type and projection type is dropped from both maps.
    pub(crate) fn insert<F: ProjectionFactory>(&mut self, factory: F) {
        let materializer = Arc::new(Materializer::new(Arc::new(factory)));

        let list = self
            .by_aggregate
            .entry(TypeId::of::<F::Aggregate>())
            .or_insert_with(|| Box::new(FactoryList::<F::Aggregate>::new()));
        let mut displaced = Vec::new();
        if let Some(list) = list.downcast_mut::<FactoryList<F::Aggregate>>() {
            list.retain(|existing| {
                let keep = existing.projection_type() != F::PROJECTION_TYPE;
                if !keep {
                    displaced.push(existing.factory_type());
                }
                keep
            });
            list.push(materializer.clone());
        }
        for factory_type in displaced {
            self.by_factory.remove(&factory_type);
        }

        self.by_factory
            .insert(TypeId::of::<F>(), Box::new(materializer));
        tracing::debug!(
            aggregate_type = <F::Aggregate as Aggregate>::TYPE,
            projection_type = F::PROJECTION_TYPE,
            "projection factory registered"
        );
    }

    /// Every factory registered for aggregate type `A`.
    pub(crate) fn for_aggregate<A: Aggregate>(&self) -> &[Arc<dyn DynFactory<A>>] {
        self.by_aggregate
            .get(&TypeId::of::<A>())
            .and_then(|boxed| boxed.downcast_ref::<FactoryList<A>>())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The registered instance of factory type `F`.
    pub(crate) fn factory<F: ProjectionFactory>(&self) -> Option<Arc<Materializer<F>>> {
        self.by_factory
            .get(&TypeId::of::<F>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<Materializer<F>>>())
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_factory.len()
    }
}

impl std::fmt::Debug for Projectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projectors")
            .field("factories", &self.by_factory.len())
            .finish()
    }
}
