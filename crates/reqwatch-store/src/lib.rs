//! Persistence for requirement snapshots and processing state.
//!
//! Both stores are keyed by requirement ID over a [`KeyedStore`] backend:
//! [`JsonDirStore`] keeps one JSON file per record and survives restarts,
//! [`MemoryStore`] is for tests and ephemeral runs.

mod error;
mod json_dir;
mod keyed;
mod memory;
mod snapshots;
mod tracker;

pub use error::StoreError;
pub use json_dir::JsonDirStore;
pub use keyed::KeyedStore;
pub use memory::MemoryStore;
pub use snapshots::SnapshotStore;
pub use tracker::StateTracker;
