//! Record migrators for schema evolution.
//!
//! A [`Migrator`] upgrades a payload from one stored shape to its successor.
//! Migrators are registered on a
//! [`RecordRegistryBuilder`](crate::registry::RecordRegistryBuilder) and are
//! applied transparently while decoding: a record stored as `V1` is passed
//! through `V1 -> V2 -> V3` until no migrator accepts the produced type.
//!
//! ```
//! use annals_core::{migration::Migrator, payload::Payload};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct RenamedV1 { name: String }
//! impl Payload for RenamedV1 { const TYPE: &'static str = "Renamed"; }
//!
//! #[derive(Serialize, Deserialize)]
//! struct RenamedV2 { first: String, last: String }
//! impl Payload for RenamedV2 { const TYPE: &'static str = "RenamedV2"; }
//!
//! struct SplitName;
//!
//! impl Migrator for SplitName {
//!     type Source = RenamedV1;
//!     type Target = RenamedV2;
//!
//!     fn migrate(source: RenamedV1) -> RenamedV2 {
//!         let (first, last) = source.name.split_once(' ').unwrap_or((source.name.as_str(), ""));
//!         RenamedV2 { first: first.to_string(), last: last.to_string() }
//!     }
//! }
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::payload::Payload;

/// Pure upgrade from one stored payload shape to the next.
///
/// Only the payload and its discriminator change; identity, index and
/// timestamp of the record are preserved.
// ANCHOR: migrator_trait
pub trait Migrator: 'static {
    type Source: Payload + DeserializeOwned;
    type Target: Payload + Serialize;

    fn migrate(source: Self::Source) -> Self::Target;
}
// ANCHOR_END: migrator_trait

/// A migrator failed to read its source shape or write its target shape.
#[derive(Debug, Error)]
#[error("failed to migrate `{from}` to `{to}`: {error}")]
pub struct MigrationError {
    pub from: &'static str,
    pub to: &'static str,
    #[source]
    pub error: serde_json::Error,
}

/// Type-erased migrator over JSON payload bodies.
#[derive(Clone, Copy, Debug)]
pub struct MigrationStep {
    pub from: &'static str,
    pub to: &'static str,
    convert: fn(serde_json::Value) -> Result<serde_json::Value, serde_json::Error>,
}

impl MigrationStep {
    #[must_use]
    pub fn of<M: Migrator>() -> Self {
        Self {
            from: <M::Source as Payload>::TYPE,
            to: <M::Target as Payload>::TYPE,
            convert: convert::<M>,
        }
    }

    /// Convert one payload body.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if the body does not match the source
    /// shape or the target cannot be encoded.
    pub fn apply(&self, data: serde_json::Value) -> Result<serde_json::Value, MigrationError> {
        (self.convert)(data).map_err(|error| MigrationError {
            from: self.from,
            to: self.to,
            error,
        })
    }
}

fn convert<M: Migrator>(data: serde_json::Value) -> Result<serde_json::Value, serde_json::Error> {
    let source: M::Source = serde_json::from_value(data)?;
    serde_json::to_value(M::migrate(source))
}

/// Find a migrator chain that leads back to its own start.
///
/// `steps` maps each source discriminator to its target. Returns the chain
/// in visiting order, starting and ending at the repeated type.
pub(crate) fn find_cycle(steps: &HashMap<&'static str, &'static str>) -> Option<Vec<&'static str>> {
    let mut cleared: HashSet<&'static str> = HashSet::new();
    let mut starts: Vec<&'static str> = steps.keys().copied().collect();
    starts.sort_unstable();

    for start in starts {
        let mut path: Vec<&'static str> = Vec::new();
        let mut current = start;
        loop {
            if cleared.contains(current) {
                break;
            }
            if let Some(at) = path.iter().position(|seen| *seen == current) {
                let mut chain = path[at..].to_vec();
                chain.push(current);
                return Some(chain);
            }
            path.push(current);
            match steps.get(current) {
                Some(next) => current = *next,
                None => break,
            }
        }
        cleared.extend(path);
    }
    None
}
