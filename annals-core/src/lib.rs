//! Core traits and types for the annals event-sourcing engine.
//!
//! - [`record`] - The stored record model: events, snapshots and projections
//! - [`payload`] - Payload discriminators (`Payload`, `PayloadSet`)
//! - [`aggregate`] - Command-side primitives (`Aggregate`, `Apply`, `Handle`,
//!   `AggregateRoot`)
//! - [`projection`] - Read models derived from aggregates (`ProjectionFactory`)
//! - [`migration`] - Schema evolution of stored payloads (`Migrator`)
//! - [`registry`] - Type registry that drives decoding and migration
//! - [`store`] - Record persistence abstraction (`RecordStore`) and the
//!   in-memory reference store
//! - [`service`] - Rehydration and atomic persistence (`AggregateService`)
//! - [`validation`] - Record invariants checked before anything is written
//! - [`concurrency`] - Conflicts reported by stores
//!
//! # Example
//!
//! ```
//! use annals_core::{service::AggregateService, store::inmemory};
//!
//! let service = AggregateService::new(inmemory::Store::new());
//! assert_eq!(service.projection_count(), 0);
//! ```
//!
//! Most users should depend on the [`annals`](https://docs.rs/annals) crate,
//! which re-exports these types together with the derive macros.

pub mod aggregate;
pub mod concurrency;
pub mod migration;
pub mod payload;
pub mod projection;
pub mod record;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod validation;

// Paths used by code generated in `annals-macros`.
#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}
