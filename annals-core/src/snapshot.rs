//! Snapshot policy.
//!
//! An aggregate type opts into snapshots by setting a non-zero
//! [`Aggregate::SNAPSHOT_INTERVAL`](crate::aggregate::Aggregate::SNAPSHOT_INTERVAL).
//! A snapshot is taken whenever a persisted batch finishes on, or crosses, a
//! multiple of the interval. Crossing several boundaries at once still yields
//! a single snapshot, taken at the batch's last event.

/// Whether a batch spanning indices `first..=last` crosses a snapshot
/// boundary.
///
/// Compares `first / interval` with `(last + 1) / interval`, so a batch that
/// makes the stream length an exact multiple counts as crossing. The length
/// saturates at `i64::MAX`. Returns `false` when `interval` is 0 or the range
/// is empty.
///
/// ```
/// use annals_core::snapshot::interval_exceeded;
///
/// assert!(interval_exceeded(10, 0, 9));
/// assert!(!interval_exceeded(10, 0, 8));
/// assert!(interval_exceeded(10, 9, 9));
/// assert!(!interval_exceeded(10, 10, 10));
/// ```
#[must_use]
pub const fn interval_exceeded(interval: u64, first: i64, last: i64) -> bool {
    if interval == 0 || first < 0 || last < first {
        return false;
    }
    #[allow(clippy::cast_possible_wrap)]
    let interval = if interval > i64::MAX as u64 {
        i64::MAX
    } else {
        interval as i64
    };
    first / interval != last.saturating_add(1) / interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_interval_never_snapshots() {
        assert!(!interval_exceeded(0, 0, 100));
    }

    #[test]
    fn exact_interval_in_one_batch_snapshots_once() {
        assert!(interval_exceeded(10, 0, 9));
    }

    #[test]
    fn one_short_of_interval_does_not_snapshot() {
        assert!(!interval_exceeded(10, 0, 8));
    }

    #[test]
    fn crossing_two_boundaries_is_still_one_decision() {
        assert!(interval_exceeded(10, 0, 19));
        assert!(interval_exceeded(10, 5, 27));
    }

    #[test]
    fn single_events_snapshot_only_at_boundary() {
        let taken: Vec<i64> = (0..25).filter(|&i| interval_exceeded(10, i, i)).collect();
        assert_eq!(taken, vec![9, 19]);
    }

    #[test]
    fn interval_of_one_snapshots_every_batch() {
        assert!(interval_exceeded(1, 0, 0));
        assert!(interval_exceeded(1, 4, 6));
    }

    #[test]
    fn last_possible_index_does_not_overflow() {
        assert!(!interval_exceeded(10, i64::MAX, i64::MAX));
        assert!(interval_exceeded(10, i64::MAX - 20, i64::MAX));
        assert!(!interval_exceeded(u64::MAX, 0, i64::MAX - 2));
    }

    #[test]
    fn empty_or_negative_range_is_ignored() {
        assert!(!interval_exceeded(10, 5, 4));
        assert!(!interval_exceeded(10, -1, 9));
    }
}
