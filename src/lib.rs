#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use annals_core::test;
#[doc(hidden)]
pub use annals_core::__private;
pub use annals_core::{
    aggregate,
    aggregate::{Aggregate, AggregateRoot, Apply, Checkpoint, Handle},
    concurrency,
    concurrency::{ConcurrencyConflict, ConflictKind},
    migration,
    migration::Migrator,
    payload,
    payload::{NoSnapshot, Payload, PayloadSet},
    projection,
    projection::{ProjectionFactory, ProjectionUpdate},
    record,
    record::{Event, Projection, RecordHeader, RecordKind, Snapshot, StoredRecord},
    registry,
    registry::{RecordRegistry, RegistryError},
    service,
    service::{AggregateService, CommandError, LoadError, PersistError, UpdateError},
    validation,
    validation::ValidationError,
};
// Re-export proc macro derives so consumers only depend on `annals`.
#[cfg(feature = "derive")]
pub use annals_macros::{Aggregate, Payload, PayloadSet};

pub mod store {
    pub use annals_core::store::{
        Action, CommitError, LoadResult, NonEmpty, Order, ProjectionFilter, RecordFilter,
        RecordStore, RecordTransaction, TransactionError, inmemory,
    };
}

pub mod snapshot {
    pub use annals_core::snapshot::interval_exceeded;
}
