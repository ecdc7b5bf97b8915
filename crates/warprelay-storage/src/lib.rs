//! warprelay-storage: durable checkpoint stores.
//!
//! Backends:
//! - [`json_file`]: one JSON file per chain (default)
//! - [`sqlite`]: SQLite via `sqlx` (feature `sqlite`)
//!
//! The in-memory store for tests lives in `warprelay_core::checkpoint`.

pub mod json_file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use json_file::JsonFileStorage;
