//! Tally kernel: a continuously refreshed inventory of IT assets.
//!
//! Pluggable collectors take snapshots of heterogeneous infrastructure
//! sources on per-source schedules; the reconciler resolves each sighting
//! to a canonical asset record, detects changes, keeps a relationship graph
//! in step, and fans change events out over the bus.

pub mod bus;
pub mod collector;
pub mod collectors;
pub mod config;
pub mod http;
pub mod models;
pub mod notifier;
pub mod reconciler;
pub mod scheduler;
pub mod store;
