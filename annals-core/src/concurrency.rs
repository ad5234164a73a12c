//! Write conflicts reported by a backend.
//!
//! The library does no in-process locking. Two writers racing on the same
//! stream both build a transaction, and the backend's conditional write lets
//! exactly one of them through. The loser's whole transaction is rejected
//! with a [`ConcurrencyConflict`]; the caller decides whether to rehydrate
//! and retry.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Which conditional check rejected the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Another writer already stored a record at this index.
    IndexTaken,
    /// An append starting above zero found no event at `index - 1`.
    MissingPredecessor,
    /// A snapshot referenced an event index that is not stored.
    MissingEvent,
    /// A range delete found the stream longer or shorter than expected.
    StreamChanged,
    /// A snapshot delete targeted a snapshot that is not stored.
    MissingSnapshot,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IndexTaken => "index already taken",
            Self::MissingPredecessor => "previous event missing",
            Self::MissingEvent => "referenced event missing",
            Self::StreamChanged => "stream changed",
            Self::MissingSnapshot => "snapshot missing",
        })
    }
}

/// A transaction lost a race on one stream and was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", format_conflict(self))]
pub struct ConcurrencyConflict {
    pub partition_id: Uuid,
    pub aggregate_id: Uuid,
    /// Index the failed check was made against.
    pub index: i64,
    pub kind: ConflictKind,
}

impl ConcurrencyConflict {
    #[must_use]
    pub const fn new(partition_id: Uuid, aggregate_id: Uuid, index: i64, kind: ConflictKind) -> Self {
        Self {
            partition_id,
            aggregate_id,
            index,
            kind,
        }
    }
}

/// Build a human-readable message for a [`ConcurrencyConflict`], including an
/// actionable hint for the caller.
fn format_conflict(conflict: &ConcurrencyConflict) -> String {
    let ConcurrencyConflict {
        partition_id,
        aggregate_id,
        index,
        kind,
    } = conflict;
    let hint = match kind {
        ConflictKind::IndexTaken | ConflictKind::MissingPredecessor | ConflictKind::StreamChanged => {
            "stream was modified; rehydrate and retry"
        }
        ConflictKind::MissingEvent | ConflictKind::MissingSnapshot => {
            "records were deleted; rehydrate before writing"
        }
    };
    format!(
        "concurrency conflict on aggregate {aggregate_id} in partition {partition_id} at index \
         {index}: {kind} (hint: {hint})"
    )
}
