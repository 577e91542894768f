//! Storage backends for throttle records.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::throttle::ThrottleRecord;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub(crate) use sqlite::is_valid_table_name;

/// Where throttle records live.
///
/// The engine delegates all atomicity to the store: it never caches
/// counts, so a store shared between processes gives shared quotas.
#[async_trait]
pub trait ThrottleStore: Send + Sync {
    /// Store a new record.
    async fn insert(&self, record: ThrottleRecord) -> Result<()>;

    /// Count records under `key` with `expire_at > now`.
    async fn count_live(&self, key: &str, now: i64) -> Result<u64>;

    /// Delete every record with `expire_at <= now`, returning how many went.
    async fn delete_expired(&self, now: i64) -> Result<u64>;

    /// Insert `record` only if fewer than `allowed` live records share its key.
    ///
    /// The default is a plain count followed by an insert and is only as
    /// strong as the check-then-record protocol. Backends that can do better
    /// override it with a single atomic step.
    async fn insert_if_below(&self, record: ThrottleRecord, allowed: u64, now: i64) -> Result<bool> {
        if self.count_live(&record.key, now).await? >= allowed {
            return Ok(false);
        }
        self.insert(record).await?;
        Ok(true)
    }
}

/// Which backend to build from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Records held in process memory; quotas are per process
    #[default]
    Memory,
    /// Records held in a SQLite database file
    Sqlite,
}

/// Build the configured store.
pub async fn open(config: &StorageConfig) -> Result<Arc<dyn ThrottleStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory throttle store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Sqlite => {
            let store =
                SqliteStore::connect(&config.path, &config.table, config.max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
