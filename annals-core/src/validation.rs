//! Pure record checks run before any I/O.
//!
//! Every builder method on
//! [`RecordTransaction`](crate::store::RecordTransaction) and every replay step
//! on [`AggregateRoot`](crate::aggregate::AggregateRoot) goes through these
//! functions, so a malformed record never reaches a backend.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::record::RecordHeader;

/// A record or batch violates the data-model invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record {record_id} has a nil aggregate id")]
    NilAggregateId { record_id: Uuid },
    #[error("record for aggregate {aggregate_id} has a nil record id")]
    NilRecordId { aggregate_id: Uuid },
    #[error("record {record_id} has negative index {index}")]
    NegativeIndex { record_id: Uuid, index: i64 },
    #[error("record {record_id} has an empty aggregate type")]
    EmptyAggregateType { record_id: Uuid },
    #[error("record {record_id} is typed `{actual}` but its payload is `{expected}`")]
    TypeMismatch {
        record_id: Uuid,
        expected: String,
        actual: String,
    },
    #[error("record {record_id} belongs to partition {actual}, expected {expected}")]
    PartitionMismatch {
        record_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },
    #[error("record {record_id} belongs to aggregate {actual}, expected {expected}")]
    AggregateMismatch {
        record_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },
    #[error("record {record_id} belongs to aggregate type `{actual}`, expected `{expected}`")]
    AggregateTypeMismatch {
        record_id: Uuid,
        expected: String,
        actual: String,
    },
    #[error("event indices are not consecutive: {previous} is followed by {next}")]
    NonConsecutiveIndex { previous: i64, next: i64 },
    #[error("event at index {actual} cannot follow version {expected}")]
    UnexpectedIndex { expected: i64, actual: i64 },
    #[error("record {record_id} is timestamped {timestamp}, before the previous record at {previous}")]
    TimestampRegression {
        record_id: Uuid,
        previous: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    #[error("snapshot at index {index} is older than version {version}")]
    StaleSnapshot { index: i64, version: i64 },
    #[error("aggregate {aggregate_id} has {pending} uncommitted events; persist them before restoring a snapshot")]
    UncommittedEvents { aggregate_id: Uuid, pending: usize },
    #[error("record id {record_id} appears more than once")]
    DuplicateRecordId { record_id: Uuid },
    #[error("delete target has a nil aggregate id")]
    NilTargetAggregate,
    #[error("version {version} is negative")]
    NegativeVersion { version: i64 },
    #[error("projection for aggregate {aggregate_id} has an empty projection type")]
    EmptyProjectionType { aggregate_id: Uuid },
}

/// Identity fields are set and the index is non-negative.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate_header(header: &RecordHeader) -> Result<(), ValidationError> {
    if header.record_id.is_nil() {
        return Err(ValidationError::NilRecordId {
            aggregate_id: header.aggregate_id,
        });
    }
    if header.aggregate_id.is_nil() {
        return Err(ValidationError::NilAggregateId {
            record_id: header.record_id,
        });
    }
    if header.index < 0 {
        return Err(ValidationError::NegativeIndex {
            record_id: header.record_id,
            index: header.index,
        });
    }
    if header.aggregate_type.is_empty() {
        return Err(ValidationError::EmptyAggregateType {
            record_id: header.record_id,
        });
    }
    Ok(())
}

/// The header's discriminator matches the payload it is attached to.
///
/// # Errors
///
/// Returns [`ValidationError::TypeMismatch`] on a hand-built record whose
/// `record_type` was not taken from its payload.
pub fn validate_type(header: &RecordHeader, expected: &str) -> Result<(), ValidationError> {
    if header.record_type == expected {
        Ok(())
    } else {
        Err(ValidationError::TypeMismatch {
            record_id: header.record_id,
            expected: expected.to_string(),
            actual: header.record_type.clone(),
        })
    }
}

/// The header is not older than the record before it in the same stream.
///
/// # Errors
///
/// Returns [`ValidationError::TimestampRegression`].
pub fn validate_timestamp(
    header: &RecordHeader,
    previous: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match previous {
        Some(previous) if header.timestamp < previous => Err(ValidationError::TimestampRegression {
            record_id: header.record_id,
            previous,
            timestamp: header.timestamp,
        }),
        _ => Ok(()),
    }
}

/// The header belongs to the given partition.
///
/// # Errors
///
/// Returns [`ValidationError::PartitionMismatch`].
pub fn validate_partition(header: &RecordHeader, partition_id: Uuid) -> Result<(), ValidationError> {
    if header.partition_id == partition_id {
        Ok(())
    } else {
        Err(ValidationError::PartitionMismatch {
            record_id: header.record_id,
            expected: partition_id,
            actual: header.partition_id,
        })
    }
}

/// The header belongs to one specific aggregate instance.
///
/// # Errors
///
/// Returns the first mismatching identity field.
pub fn validate_binding(
    header: &RecordHeader,
    partition_id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: &str,
) -> Result<(), ValidationError> {
    if header.aggregate_id != aggregate_id {
        return Err(ValidationError::AggregateMismatch {
            record_id: header.record_id,
            expected: aggregate_id,
            actual: header.aggregate_id,
        });
    }
    if header.aggregate_type != aggregate_type {
        return Err(ValidationError::AggregateTypeMismatch {
            record_id: header.record_id,
            expected: aggregate_type.to_string(),
            actual: header.aggregate_type.clone(),
        });
    }
    validate_partition(header, partition_id)
}

/// A batch of events forms one consecutive slice of one stream.
///
/// Checks each header, then that all share the first header's partition,
/// aggregate and aggregate type, that record ids are unique, and that the
/// indices (sorted) step by exactly one with timestamps that never decrease.
/// An empty batch is valid.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate_event_batch<'a, I>(headers: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a RecordHeader>,
{
    let headers: Vec<&RecordHeader> = headers.into_iter().collect();
    let Some(first) = headers.first() else {
        return Ok(());
    };

    let mut seen = HashSet::with_capacity(headers.len());
    for header in &headers {
        validate_header(header)?;
        validate_binding(
            header,
            first.partition_id,
            first.aggregate_id,
            &first.aggregate_type,
        )?;
        if !seen.insert(header.record_id) {
            return Err(ValidationError::DuplicateRecordId {
                record_id: header.record_id,
            });
        }
    }

    let mut ordered = headers;
    ordered.sort_unstable_by_key(|h| h.index);
    for pair in ordered.windows(2) {
        let (previous, next) = (pair[0], pair[1]);
        if next.index - previous.index != 1 {
            return Err(ValidationError::NonConsecutiveIndex {
                previous: previous.index,
                next: next.index,
            });
        }
        validate_timestamp(next, Some(previous.timestamp))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn header(aggregate_id: Uuid, index: i64) -> RecordHeader {
        RecordHeader {
            partition_id: Uuid::nil(),
            aggregate_id,
            record_id: Uuid::new_v4(),
            aggregate_type: "Counter".to_string(),
            record_type: "ValueAdded".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000 + index, 0).unwrap(),
            index,
        }
    }

    #[test]
    fn header_rejects_nil_ids_and_negative_index() {
        let id = Uuid::new_v4();

        let mut h = header(Uuid::nil(), 0);
        assert!(matches!(
            validate_header(&h),
            Err(ValidationError::NilAggregateId { .. })
        ));

        h = header(id, 0);
        h.record_id = Uuid::nil();
        assert!(matches!(
            validate_header(&h),
            Err(ValidationError::NilRecordId { .. })
        ));

        h = header(id, -1);
        assert_eq!(
            validate_header(&h),
            Err(ValidationError::NegativeIndex {
                record_id: h.record_id,
                index: -1
            })
        );

        assert!(validate_header(&header(id, 0)).is_ok());
    }

    #[test]
    fn type_must_match_payload_discriminator() {
        let h = header(Uuid::new_v4(), 0);
        assert!(validate_type(&h, "ValueAdded").is_ok());
        let err = validate_type(&h, "ValueRemoved").unwrap_err();
        assert!(err.to_string().contains("ValueRemoved"));
    }

    #[test]
    fn batch_accepts_unsorted_consecutive_indices() {
        let id = Uuid::new_v4();
        let batch = [header(id, 4), header(id, 2), header(id, 3)];
        assert!(validate_event_batch(&batch).is_ok());
    }

    #[test]
    fn batch_rejects_gaps_and_repeats() {
        let id = Uuid::new_v4();
        let gap = [header(id, 0), header(id, 2)];
        assert_eq!(
            validate_event_batch(&gap),
            Err(ValidationError::NonConsecutiveIndex {
                previous: 0,
                next: 2
            })
        );

        let repeat = [header(id, 1), header(id, 1)];
        assert!(matches!(
            validate_event_batch(&repeat),
            Err(ValidationError::NonConsecutiveIndex { .. })
        ));
    }

    #[test]
    fn batch_rejects_mixed_aggregates() {
        let batch = [header(Uuid::new_v4(), 0), header(Uuid::new_v4(), 1)];
        assert!(matches!(
            validate_event_batch(&batch),
            Err(ValidationError::AggregateMismatch { .. })
        ));
    }

    #[test]
    fn batch_rejects_mixed_partitions() {
        let id = Uuid::new_v4();
        let mut second = header(id, 1);
        second.partition_id = Uuid::new_v4();
        let batch = [header(id, 0), second];
        assert!(matches!(
            validate_event_batch(&batch),
            Err(ValidationError::PartitionMismatch { .. })
        ));
    }

    #[test]
    fn batch_rejects_duplicate_record_ids() {
        let id = Uuid::new_v4();
        let first = header(id, 0);
        let mut second = header(id, 1);
        second.record_id = first.record_id;
        assert_eq!(
            validate_event_batch([&first, &second]),
            Err(ValidationError::DuplicateRecordId {
                record_id: first.record_id
            })
        );
    }

    #[test]
    fn batch_rejects_timestamps_going_backwards() {
        let id = Uuid::new_v4();
        let first = header(id, 0);
        let mut second = header(id, 1);
        second.timestamp = first.timestamp - Duration::seconds(1);
        assert_eq!(
            validate_event_batch([&second, &first]),
            Err(ValidationError::TimestampRegression {
                record_id: second.record_id,
                previous: first.timestamp,
                timestamp: second.timestamp,
            })
        );

        second.timestamp = first.timestamp;
        assert!(validate_event_batch([&first, &second]).is_ok());
    }

    #[test]
    fn timestamp_without_predecessor_is_valid() {
        let h = header(Uuid::new_v4(), 0);
        assert!(validate_timestamp(&h, None).is_ok());
        assert!(validate_timestamp(&h, Some(h.timestamp)).is_ok());
    }

    #[test]
    fn empty_batch_is_valid() {
        assert!(validate_event_batch(&[] as &[RecordHeader]).is_ok());
    }

    #[test]
    fn binding_checks_aggregate_type() {
        let h = header(Uuid::new_v4(), 0);
        assert!(validate_binding(&h, Uuid::nil(), h.aggregate_id, "Counter").is_ok());
        assert!(matches!(
            validate_binding(&h, Uuid::nil(), h.aggregate_id, "Account"),
            Err(ValidationError::AggregateTypeMismatch { .. })
        ));
    }
}
