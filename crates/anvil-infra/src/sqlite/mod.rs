//! SQLite persistence.

pub mod pool;
pub mod snapshot;

pub use pool::{DatabasePool, default_database_url};
pub use snapshot::SqliteSnapshotStore;
