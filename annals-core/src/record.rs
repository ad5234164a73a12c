//! The record data model.
//!
//! Events, snapshots and projections are all records: they share one header
//! ([`RecordHeader`]) and differ only in what their `index` means and which
//! extra fields they carry. Typed records ([`Event`], [`Snapshot`],
//! [`Projection`]) are what application code handles; [`StoredRecord`] is
//! the backend-neutral row a [`RecordStore`](crate::store::RecordStore)
//! reads and writes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::{Payload, PayloadSet};

/// Fields shared by every persisted record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Tenant/shard key. Transactions never span partitions.
    pub partition_id: Uuid,
    /// Owning aggregate.
    pub aggregate_id: Uuid,
    /// Globally unique identity of this record.
    pub record_id: Uuid,
    /// Name of the owning aggregate's type (`Aggregate::TYPE`).
    pub aggregate_type: String,
    /// Discriminator of the concrete payload shape.
    pub record_type: String,
    pub timestamp: DateTime<Utc>,
    /// Ordinal position in the owning stream; see the record kinds.
    pub index: i64,
}

/// The three record families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Event,
    Snapshot,
    Projection,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Event => "event",
            Self::Snapshot => "snapshot",
            Self::Projection => "projection",
        })
    }
}

/// Immutable fact at position `header.index` of an aggregate stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Event<E> {
    pub header: RecordHeader,
    pub data: E,
}

/// Aggregate state as of the event at `header.index`.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<S> {
    pub header: RecordHeader,
    pub data: S,
}

/// Read model derived from an aggregate.
///
/// Keyed by `(partition_id, aggregate_id, projection_type)`. `header.record_type`
/// names the concrete variant, which differs from `projection_type` when
/// a projection has several shapes. `hash` fingerprints the logic that
/// produced the row and is used only for staleness detection.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection<P> {
    pub header: RecordHeader,
    pub projection_type: String,
    pub hash: String,
    pub data: P,
}

impl<P> Projection<P> {
    /// Whether this row was produced by logic other than `fingerprint`.
    #[must_use]
    pub fn is_stale(&self, fingerprint: &str) -> bool {
        self.hash != fingerprint
    }
}

/// Kind-specific part of a [`StoredRecord`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StoredKind {
    Event,
    Snapshot,
    Projection {
        projection_type: String,
        hash: String,
    },
}

impl StoredKind {
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Event => RecordKind::Event,
            Self::Snapshot => RecordKind::Snapshot,
            Self::Projection { .. } => RecordKind::Projection,
        }
    }
}

/// A record as held by a backend: header, kind and JSON payload body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(flatten)]
    pub kind: StoredKind,
    pub data: serde_json::Value,
}

impl StoredRecord {
    #[must_use]
    pub const fn record_kind(&self) -> RecordKind {
        self.kind.kind()
    }

    /// Projection type for projection rows, `None` otherwise.
    #[must_use]
    pub fn projection_type(&self) -> Option<&str> {
        match &self.kind {
            StoredKind::Projection {
                projection_type, ..
            } => Some(projection_type),
            _ => None,
        }
    }

    /// Fingerprint for projection rows, `None` otherwise.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        match &self.kind {
            StoredKind::Projection { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

impl<E: PayloadSet> Event<E> {
    /// Encode into the backend-neutral form.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredRecord, serde_json::Error> {
        Ok(StoredRecord {
            header: self.header.clone(),
            kind: StoredKind::Event,
            data: self.data.encode()?,
        })
    }
}

impl<S> Snapshot<S>
where
    S: Payload + Serialize,
{
    /// Encode into the backend-neutral form.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredRecord, serde_json::Error> {
        Ok(StoredRecord {
            header: self.header.clone(),
            kind: StoredKind::Snapshot,
            data: serde_json::to_value(&self.data)?,
        })
    }
}

impl<P: PayloadSet> Projection<P> {
    /// Encode into the backend-neutral form.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredRecord, serde_json::Error> {
        Ok(StoredRecord {
            header: self.header.clone(),
            kind: StoredKind::Projection {
                projection_type: self.projection_type.clone(),
                hash: self.hash.clone(),
            },
            data: self.data.encode()?,
        })
    }
}
