//! Command-side domain primitives.
//!
//! This module defines the building blocks for aggregates: state
//! reconstruction (`Apply`), command handling (`Handle`), and the
//! [`AggregateRoot`] that tracks identity, version and uncommitted events
//! around a piece of domain state.

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    payload::{Payload, PayloadSet},
    record::{Event, RecordHeader, Snapshot},
    snapshot,
    validation::{self, ValidationError},
};

/// Command-side entities that produce domain events.
///
/// Aggregates rebuild their state from events (`Apply<E>`) and validate
/// commands via [`Handle<C>`]. The derive macro generates the event enum and
/// plumbing automatically, while keeping your state struct focused on domain
/// behaviour.
// ANCHOR: aggregate_trait
pub trait Aggregate: Default + Send + Sync + Sized + 'static {
    /// Aggregate type name stored on every record of this aggregate.
    const TYPE: &'static str;

    /// Tag for the replay logic. Bump it when `apply` changes meaning so
    /// projections built from the old logic are reported as stale.
    const VERSION: &'static str = "1";

    /// Take a snapshot every this many events. 0 disables snapshots.
    const SNAPSHOT_INTERVAL: u64 = 0;

    type Event: PayloadSet + Send + Sync + 'static;

    /// Stored state checkpoint. Use [`NoSnapshot`](crate::payload::NoSnapshot)
    /// when `SNAPSHOT_INTERVAL` is 0.
    type Snapshot: Payload + Serialize + DeserializeOwned + Send + Sync + 'static;

    type Error;

    /// Apply an event to update aggregate state.
    ///
    /// When using `#[derive(Aggregate)]`, this dispatches to your `Apply<E>`
    /// implementations.
    fn apply(&mut self, event: &Self::Event);

    /// Capture the current state.
    fn snapshot(&self) -> Self::Snapshot;

    /// Replace the current state with a stored snapshot.
    fn restore(&mut self, snapshot: Self::Snapshot);

    /// Runs once after replay, for fields derived from the as-of instant
    /// rather than from any single event.
    fn finish(&mut self, _as_of: DateTime<Utc>) {}
}
// ANCHOR_END: aggregate_trait

/// Mutate an aggregate with a domain event.
///
/// ```ignore
/// #[derive(Default)]
/// struct Account {
///     balance: i64,
/// }
///
/// impl Apply<FundsDeposited> for Account {
///     fn apply(&mut self, event: &FundsDeposited) {
///         self.balance += event.amount;
///     }
/// }
/// ```
// ANCHOR: apply_trait
pub trait Apply<E> {
    fn apply(&mut self, event: &E);
}
// ANCHOR_END: apply_trait

/// Capture and restore aggregate state as a snapshot payload.
///
/// `#[derive(Aggregate)]` with `snapshot = S` dispatches the aggregate's
/// `snapshot` and `restore` methods to this trait.
// ANCHOR: checkpoint_trait
pub trait Checkpoint<S> {
    fn checkpoint(&self) -> S;

    fn restore(&mut self, snapshot: S);
}
// ANCHOR_END: checkpoint_trait

/// Entry point for command handling.
///
/// Each command type gets its own implementation, letting the aggregate
/// express validation logic in a strongly typed way.
///
/// ```ignore
/// impl Handle<DepositFunds> for Account {
///     fn handle(&self, command: &DepositFunds) -> Result<Vec<Self::Event>, Self::Error> {
///         if command.amount <= 0 {
///             return Err("amount must be positive".into());
///         }
///         Ok(vec![FundsDeposited { amount: command.amount }.into()])
///     }
/// }
/// ```
// ANCHOR: handle_trait
pub trait Handle<C>: Aggregate {
    /// Handle a command and produce events.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if the command is invalid for the current
    /// aggregate state.
    fn handle(&self, command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}
// ANCHOR_END: handle_trait

/// One aggregate instance: identity, version, state and the events recorded
/// since it was last persisted.
///
/// `version` counts the events folded in so far and is therefore the index
/// the next event will get. The root is owned by one caller at a time.
pub struct AggregateRoot<A: Aggregate> {
    partition_id: Uuid,
    id: Uuid,
    version: i64,
    last_timestamp: Option<DateTime<Utc>>,
    state: A,
    uncommitted: Vec<Event<A::Event>>,
}

impl<A: Aggregate> std::fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("aggregate_type", &A::TYPE)
            .field("partition_id", &self.partition_id)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("uncommitted", &self.uncommitted.len())
            .finish_non_exhaustive()
    }
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Empty aggregate with a known identity.
    #[must_use]
    pub fn new(partition_id: Uuid, id: Uuid) -> Self {
        Self {
            partition_id,
            id,
            version: 0,
            last_timestamp: None,
            state: A::default(),
            uncommitted: Vec::new(),
        }
    }

    /// Empty aggregate with a fresh id in the default (nil) partition.
    #[must_use]
    pub fn create() -> Self {
        Self::create_in(Uuid::nil())
    }

    /// Empty aggregate with a fresh id in `partition_id`.
    #[must_use]
    pub fn create_in(partition_id: Uuid) -> Self {
        Self::new(partition_id, Uuid::new_v4())
    }

    #[must_use]
    pub const fn partition_id(&self) -> Uuid {
        self.partition_id
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub const fn state(&self) -> &A {
        &self.state
    }

    #[must_use]
    pub fn into_state(self) -> A {
        self.state
    }

    /// Timestamp of the newest record folded in, if any.
    #[must_use]
    pub const fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    #[must_use]
    pub fn uncommitted(&self) -> &[Event<A::Event>] {
        &self.uncommitted
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Record a new event at the next index, timestamped now.
    pub fn record(&mut self, event: impl Into<A::Event>) -> &mut Self {
        self.record_at(event, Utc::now())
    }

    /// Record a new event at the next index with an explicit timestamp.
    ///
    /// Timestamps never go backwards within one stream: a `timestamp` earlier
    /// than the previous record is raised to the previous record's.
    pub fn record_at(&mut self, event: impl Into<A::Event>, timestamp: DateTime<Utc>) -> &mut Self {
        let timestamp = self.last_timestamp.map_or(timestamp, |last| last.max(timestamp));
        let data = event.into();
        let event = Event {
            header: RecordHeader {
                partition_id: self.partition_id,
                aggregate_id: self.id,
                record_id: Uuid::new_v4(),
                aggregate_type: A::TYPE.to_string(),
                record_type: data.record_type().to_string(),
                timestamp,
                index: self.version,
            },
            data,
        };
        self.fold(&event);
        self.uncommitted.push(event);
        self
    }

    /// Run a command against the current state and record the events it
    /// produces. Returns how many events were recorded.
    ///
    /// # Errors
    ///
    /// Returns the aggregate's error if the command is rejected. Nothing is
    /// recorded in that case.
    pub fn execute<C>(&mut self, command: &C) -> Result<usize, A::Error>
    where
        A: Handle<C>,
    {
        let events = self.state.handle(command)?;
        let count = events.len();
        for event in events {
            self.record(event);
        }
        Ok(count)
    }

    /// Fold a caller-built event and buffer it for the next persist.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the event belongs to another aggregate,
    /// is mislabelled, does not sit exactly at the current version, or is
    /// older than the last folded record.
    pub fn apply(&mut self, event: Event<A::Event>) -> Result<(), ValidationError> {
        self.check_event(&event)?;
        self.fold(&event);
        self.uncommitted.push(event);
        Ok(())
    }

    /// Fold a stored event during replay without buffering it.
    ///
    /// # Errors
    ///
    /// Same checks as [`apply`](Self::apply).
    pub fn replay(&mut self, event: &Event<A::Event>) -> Result<(), ValidationError> {
        self.check_event(event)?;
        self.fold(event);
        Ok(())
    }

    /// Replace state with a snapshot. The version moves to just after the
    /// snapshot's index.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UncommittedEvents`] while events are
    /// buffered, [`ValidationError::StaleSnapshot`] if the snapshot is older
    /// than events already folded in, or another variant if it belongs to a
    /// different aggregate.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot<A::Snapshot>) -> Result<(), ValidationError> {
        if self.is_dirty() {
            return Err(ValidationError::UncommittedEvents {
                aggregate_id: self.id,
                pending: self.uncommitted.len(),
            });
        }
        let header = &snapshot.header;
        validation::validate_header(header)?;
        validation::validate_binding(header, self.partition_id, self.id, A::TYPE)?;
        validation::validate_type(header, <A::Snapshot as Payload>::TYPE)?;
        if header.index < self.version {
            return Err(ValidationError::StaleSnapshot {
                index: header.index,
                version: self.version,
            });
        }
        self.version = header.index + 1;
        self.last_timestamp = Some(header.timestamp);
        self.state.restore(snapshot.data);
        Ok(())
    }

    /// Run the aggregate's [`finish`](Aggregate::finish) hook.
    pub fn finish(&mut self, as_of: DateTime<Utc>) {
        self.state.finish(as_of);
    }

    /// Whether the uncommitted events cross a snapshot boundary.
    #[must_use]
    pub fn snapshot_interval_exceeded(&self) -> bool {
        match (self.uncommitted.first(), self.uncommitted.last()) {
            (Some(first), Some(last)) => snapshot::interval_exceeded(
                A::SNAPSHOT_INTERVAL,
                first.header.index,
                last.header.index,
            ),
            _ => false,
        }
    }

    /// Snapshot of the current state at the last folded event, or `None` for
    /// an aggregate with no events.
    #[must_use]
    pub fn take_snapshot(&self) -> Option<Snapshot<A::Snapshot>> {
        if self.version == 0 {
            return None;
        }
        Some(Snapshot {
            header: RecordHeader {
                partition_id: self.partition_id,
                aggregate_id: self.id,
                record_id: Uuid::new_v4(),
                aggregate_type: A::TYPE.to_string(),
                record_type: <A::Snapshot as Payload>::TYPE.to_string(),
                timestamp: self.last_timestamp.unwrap_or_else(Utc::now),
                index: self.version - 1,
            },
            data: self.state.snapshot(),
        })
    }

    /// Clear the buffer once its events are durable.
    pub(crate) fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }

    fn check_event(&self, event: &Event<A::Event>) -> Result<(), ValidationError> {
        let header = &event.header;
        validation::validate_header(header)?;
        validation::validate_binding(header, self.partition_id, self.id, A::TYPE)?;
        validation::validate_type(header, event.data.record_type())?;
        if header.index != self.version {
            return Err(ValidationError::UnexpectedIndex {
                expected: self.version,
                actual: header.index,
            });
        }
        validation::validate_timestamp(header, self.last_timestamp)
    }

    fn fold(&mut self, event: &Event<A::Event>) {
        self.state.apply(&event.data);
        self.version = event.header.index + 1;
        self.last_timestamp = Some(event.header.timestamp);
    }
}
