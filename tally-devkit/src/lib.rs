//! Test doubles for the tally kernel: in-memory implementations of the
//! store traits, a capturing event publisher, and scripted collectors.
//!
//! Everything here keeps the same observable semantics as the durable
//! implementations (unique keys, sort orders, single-candidate lookups) so
//! pipeline tests exercise real reconciler behavior without Postgres or a
//! broker.

pub mod collectors;
pub mod memory;
pub mod publisher;

pub use collectors::{FailingCollector, HangingCollector, ScriptedCollector};
pub use memory::{MemoryGraph, MemoryStore};
pub use publisher::CapturingPublisher;
