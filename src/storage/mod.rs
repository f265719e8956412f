//! Persistence layer: the narrow `MonitorStore` interface plus the SQLite
//! and in-memory implementations.

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use backend::MonitorStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
