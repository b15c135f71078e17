//! Infrastructure layer for anvil.
//!
//! Contains the durable implementations of the `SnapshotStore` contract
//! defined in `anvil-core` (JSON files on disk, SQLite via sqlx) and the
//! settings loader that reads `anvil.toml` plus `ANVIL_*` overrides.

pub mod config;
pub mod filesystem;
pub mod sqlite;

pub use config::{apply_env_overrides, load_forge_settings, resolve_forge_settings};
pub use filesystem::JsonFileSnapshotStore;
pub use sqlite::{DatabasePool, SqliteSnapshotStore};
