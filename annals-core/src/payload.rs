//! Record payload discriminators.
//!
//! Every persisted record carries a `Type` string that names the concrete
//! shape of its payload. [`Payload`] binds that string to a Rust type, and
//! [`PayloadSet`] groups a closed set of payloads (an aggregate's events, or
//! the variants of a projection) into one sum type that can be decoded by
//! looking at the discriminator first.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{migration::MigrationError, record::RecordKind};

/// A concrete record payload with a stable discriminator.
///
/// The discriminator is what gets stored, so renaming the Rust type is safe
/// as long as `TYPE` stays the same. `#[derive(Payload)]` defaults it to the
/// type's own identifier and accepts `#[payload(name = "...")]` to pin it.
///
/// ```
/// use annals_core::payload::Payload;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct FundsDeposited {
///     amount: i64,
/// }
///
/// impl Payload for FundsDeposited {
///     const TYPE: &'static str = "FundsDeposited";
/// }
/// ```
pub trait Payload {
    const TYPE: &'static str;
}

/// A closed set of payloads that can be encoded to, and decoded from, stored
/// JSON by discriminator.
///
/// Every serde-capable [`Payload`] is a single-member set. Enums of newtype
/// variants get an implementation from `#[derive(PayloadSet)]`, and the
/// `#[derive(Aggregate)]` macro generates one for the event enum it creates.
pub trait PayloadSet: Sized {
    /// Every discriminator this set can decode.
    const TYPES: &'static [&'static str];

    /// Discriminator of this particular value.
    fn record_type(&self) -> &'static str;

    /// Encode the payload body (without the discriminator).
    ///
    /// # Errors
    ///
    /// Returns the serializer error if the payload cannot be represented as
    /// JSON.
    fn encode(&self) -> Result<serde_json::Value, serde_json::Error>;

    /// Decode a payload body previously written under `record_type`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownType`] when `record_type` is not a member
    /// of this set and [`DecodeError::Data`] when the body does not match.
    fn decode(record_type: &str, data: serde_json::Value) -> Result<Self, DecodeError>;

    /// Whether `record_type` is a member of this set.
    #[must_use]
    fn contains(record_type: &str) -> bool {
        Self::TYPES.contains(&record_type)
    }
}

impl<T> PayloadSet for T
where
    T: Payload + Serialize + DeserializeOwned,
{
    const TYPES: &'static [&'static str] = &[T::TYPE];

    fn record_type(&self) -> &'static str {
        T::TYPE
    }

    fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn decode(record_type: &str, data: serde_json::Value) -> Result<Self, DecodeError> {
        if record_type != T::TYPE {
            return Err(DecodeError::unknown::<Self>(record_type));
        }
        serde_json::from_value(data).map_err(DecodeError::Data)
    }
}

/// Error returned when a stored record cannot be turned back into a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The discriminator is not part of the requested payload set.
    #[error("unknown record type `{record_type}`, expected one of {expected:?}")]
    UnknownType {
        record_type: String,
        expected: &'static [&'static str],
    },
    /// The discriminator matched but the body did not deserialize.
    #[error("failed to decode record data: {0}")]
    Data(#[source] serde_json::Error),
    /// The row belongs to another record family.
    #[error("expected a {expected} record, found a {actual} record")]
    Kind {
        expected: RecordKind,
        actual: RecordKind,
    },
    /// A registered migrator failed while upgrading the stored shape.
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

impl DecodeError {
    /// Build an [`DecodeError::UnknownType`] for the payload set `P`.
    #[must_use]
    pub fn unknown<P: PayloadSet>(record_type: &str) -> Self {
        Self::UnknownType {
            record_type: record_type.to_string(),
            expected: P::TYPES,
        }
    }
}

/// Payload of aggregates that never snapshot.
///
/// Only ever referenced as `Aggregate::Snapshot` when
/// `SNAPSHOT_INTERVAL == 0`, so no record of this type is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct NoSnapshot;

impl Payload for NoSnapshot {
    const TYPE: &'static str = "NoSnapshot";
}
