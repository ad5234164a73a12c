//! Startup-time registry of record types and migrators.
//!
//! Applications list their aggregates, projection factories and migrators
//! once, call [`RecordRegistryBuilder::build`], and share the resulting
//! [`RecordRegistry`] read-only for the life of the process. Configuration
//! mistakes (a migrator cycle, two migrators for one type, one discriminator
//! used by two record families) fail `build` instead of surfacing at read
//! time.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    aggregate::Aggregate,
    migration::{self, MigrationError, MigrationStep, Migrator},
    payload::{DecodeError, Payload, PayloadSet},
    projection::ProjectionFactory,
    record::{Event, Projection, RecordKind, Snapshot, StoredKind, StoredRecord},
};

/// Fatal configuration error detected by [`RecordRegistryBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("migrator chain forms a cycle: {}", chain.join(" -> "))]
    MigratorCycle { chain: Vec<&'static str> },
    #[error("more than one migrator upgrades `{record_type}`")]
    DuplicateMigrator { record_type: &'static str },
    #[error("record type `{record_type}` is registered as both {first} and {second}")]
    ConflictingType {
        record_type: &'static str,
        first: RecordKind,
        second: RecordKind,
    },
    #[error("aggregate type `{aggregate_type}` is registered with versions `{first}` and `{second}`")]
    ConflictingAggregate {
        aggregate_type: &'static str,
        first: &'static str,
        second: &'static str,
    },
}

/// Collects registrations before they are frozen into a [`RecordRegistry`].
#[derive(Debug, Default)]
pub struct RecordRegistryBuilder {
    types: Vec<(&'static str, RecordKind)>,
    aggregates: Vec<(&'static str, &'static str)>,
    migrators: Vec<MigrationStep>,
}

impl RecordRegistryBuilder {
    /// Register an aggregate's event types and, if it snapshots, its
    /// snapshot type.
    #[must_use]
    pub fn aggregate<A: Aggregate>(mut self) -> Self {
        self.aggregates.push((A::TYPE, A::VERSION));
        self.types.extend(
            <A::Event as PayloadSet>::TYPES
                .iter()
                .map(|record_type| (*record_type, RecordKind::Event)),
        );
        if A::SNAPSHOT_INTERVAL > 0 {
            self.types
                .push((<A::Snapshot as Payload>::TYPE, RecordKind::Snapshot));
        }
        self
    }

    /// Register a projection factory's variant types, and its aggregate.
    #[must_use]
    pub fn projection<F: ProjectionFactory>(mut self) -> Self {
        self.types.extend(
            <F::Projection as PayloadSet>::TYPES
                .iter()
                .map(|record_type| (*record_type, RecordKind::Projection)),
        );
        self.aggregate::<F::Aggregate>()
    }

    #[must_use]
    pub fn migrator<M: Migrator>(mut self) -> Self {
        self.migrators.push(MigrationStep::of::<M>());
        self
    }

    /// Freeze the registrations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for any registration conflict or migrator
    /// cycle. These are configuration bugs and should abort startup.
    pub fn build(self) -> Result<RecordRegistry, RegistryError> {
        let mut types: HashMap<&'static str, RecordKind> = HashMap::new();
        for (record_type, kind) in self.types {
            match types.insert(record_type, kind) {
                Some(first) if first != kind => {
                    return Err(RegistryError::ConflictingType {
                        record_type,
                        first,
                        second: kind,
                    });
                }
                _ => {}
            }
        }

        let mut aggregates: HashMap<&'static str, &'static str> = HashMap::new();
        for (aggregate_type, version) in self.aggregates {
            match aggregates.insert(aggregate_type, version) {
                Some(first) if first != version => {
                    return Err(RegistryError::ConflictingAggregate {
                        aggregate_type,
                        first,
                        second: version,
                    });
                }
                _ => {}
            }
        }

        let mut migrations: HashMap<&'static str, MigrationStep> = HashMap::new();
        for step in self.migrators {
            if migrations.insert(step.from, step).is_some() {
                return Err(RegistryError::DuplicateMigrator {
                    record_type: step.from,
                });
            }
        }
        let edges: HashMap<&'static str, &'static str> = migrations
            .iter()
            .map(|(from, step)| (*from, step.to))
            .collect();
        if let Some(chain) = migration::find_cycle(&edges) {
            return Err(RegistryError::MigratorCycle { chain });
        }

        tracing::debug!(
            record_types = types.len(),
            aggregates = aggregates.len(),
            migrators = migrations.len(),
            "record registry built"
        );
        Ok(RecordRegistry {
            types,
            aggregates,
            migrations,
        })
    }
}

/// Immutable lookup tables for decoding stored records.
#[derive(Debug, Default)]
pub struct RecordRegistry {
    types: HashMap<&'static str, RecordKind>,
    aggregates: HashMap<&'static str, &'static str>,
    migrations: HashMap<&'static str, MigrationStep>,
}

impl RecordRegistry {
    #[must_use]
    pub fn builder() -> RecordRegistryBuilder {
        RecordRegistryBuilder::default()
    }

    /// Family a discriminator was registered under.
    #[must_use]
    pub fn kind_of(&self, record_type: &str) -> Option<RecordKind> {
        self.types.get(record_type).copied()
    }

    /// Replay-logic tag an aggregate type was registered with.
    #[must_use]
    pub fn aggregate_version(&self, aggregate_type: &str) -> Option<&'static str> {
        self.aggregates.get(aggregate_type).copied()
    }

    /// Run a stored record through every migrator that applies to it.
    ///
    /// Only the payload body and `record_type` change.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if a migrator cannot read the body.
    pub fn upgrade(&self, mut record: StoredRecord) -> Result<StoredRecord, MigrationError> {
        while let Some(step) = self.migrations.get(record.header.record_type.as_str()) {
            record.data = step.apply(std::mem::take(&mut record.data))?;
            tracing::trace!(
                record_id = %record.header.record_id,
                from = step.from,
                to = step.to,
                "record migrated"
            );
            record.header.record_type = step.to.to_string();
        }
        Ok(record)
    }

    /// Upgrade and decode an event row.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the row is not an event, a migrator fails,
    /// or the final shape is not a member of `E`.
    pub fn decode_event<E: PayloadSet>(&self, record: StoredRecord) -> Result<Event<E>, DecodeError> {
        expect_kind(&record, RecordKind::Event)?;
        let StoredRecord { header, data, .. } = self.upgrade(record)?;
        let data = E::decode(&header.record_type, data)?;
        Ok(Event { header, data })
    }

    /// Upgrade and decode a snapshot row.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the row is not a snapshot, a migrator
    /// fails, or the final shape is not a member of `S`.
    pub fn decode_snapshot<S: PayloadSet>(
        &self,
        record: StoredRecord,
    ) -> Result<Snapshot<S>, DecodeError> {
        expect_kind(&record, RecordKind::Snapshot)?;
        let StoredRecord { header, data, .. } = self.upgrade(record)?;
        let data = S::decode(&header.record_type, data)?;
        Ok(Snapshot { header, data })
    }

    /// Upgrade and decode a projection row.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the row is not a projection, a migrator
    /// fails, or the final shape is not a member of `P`.
    pub fn decode_projection<P: PayloadSet>(
        &self,
        record: StoredRecord,
    ) -> Result<Projection<P>, DecodeError> {
        expect_kind(&record, RecordKind::Projection)?;
        let StoredRecord { header, kind, data } = self.upgrade(record)?;
        let (projection_type, hash) = match kind {
            StoredKind::Projection {
                projection_type,
                hash,
            } => (projection_type, hash),
            other => {
                return Err(DecodeError::Kind {
                    expected: RecordKind::Projection,
                    actual: other.kind(),
                });
            }
        };
        let data = P::decode(&header.record_type, data)?;
        Ok(Projection {
            header,
            projection_type,
            hash,
            data,
        })
    }
}

fn expect_kind(record: &StoredRecord, expected: RecordKind) -> Result<(), DecodeError> {
    let actual = record.record_kind();
    if actual == expected {
        Ok(())
    } else {
        Err(DecodeError::Kind { expected, actual })
    }
}
