//! Filesystem adapters.

pub mod snapshot;

pub use snapshot::JsonFileSnapshotStore;
