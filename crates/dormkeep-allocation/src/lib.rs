//! Room allocation for Dormkeep.
//!
//! Rooms have a fixed capacity, a student holds at most one room, and the
//! two sides of that link (`Room::occupants`, `Student::room`) must agree
//! at all times. This crate owns the rules that keep them agreeing.
//!
//! # Key types
//!
//! - [`AllocationEngine`]: the only way to create, move, or release a
//!   student↔room link; also serves the read projections
//! - [`Store`]: passive record storage with atomic batch commits
//!   ([`MemoryStore`] is the bundled implementation)
//! - [`Notifier`]: fire-and-forget "topic changed" signal
//!   ([`BroadcastNotifier`], [`NoopNotifier`])
//! - [`EngineConfig`]: lock timeout and notifier sizing
//! - [`AllocationError`]: typed failures
//!
//! # Consistency model
//!
//! Every mutation locks the entities it touches (rooms, students, and the
//! room-number / email namespaces it claims) in one global order, reads
//! and validates under those locks, and hands a single [`Batch`] to
//! [`Store::commit`]. Readers go through [`Store::read`], which sees either
//! all of a batch or none of it.

mod config;
mod engine;
mod error;
mod lock;
mod notify;
mod query;
mod store;
mod validate;

pub use config::EngineConfig;
pub use engine::AllocationEngine;
pub use error::{AllocationError, Entity, StoreError};
pub use notify::{BroadcastNotifier, NoopNotifier, Notifier};
pub use store::{Batch, MemoryStore, Snapshot, Store, Write};
