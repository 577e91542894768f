//! SQLite store, shareable by every process that opens the same database.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::ThrottleStore;
use crate::error::{Result, ThrottleError};
use crate::throttle::ThrottleRecord;

/// How long a connection waits on another writer's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Throttle records persisted in one SQLite table.
///
/// The table and its `key` / `expire_at` indexes are created when the store
/// is built.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

/// Whether `name` can be used as a table name without quoting.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn connect(
        path: impl AsRef<Path>,
        table: &str,
        max_connections: u32,
    ) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!(dir = %parent.display(), "Creating database directory");
                std::fs::create_dir_all(parent)?;
            }
        }

        info!(path = %path.display(), table = %table, "Connecting to throttle database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Self::new(pool, table).await
    }

    /// A private database living in memory, for tests and one-off use.
    pub async fn in_memory(table: &str) -> Result<Self> {
        // Every in-memory connection is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::new(pool, table).await
    }

    /// Use an existing pool, creating the table if needed.
    pub async fn new(pool: SqlitePool, table: &str) -> Result<Self> {
        if !is_valid_table_name(table) {
            return Err(ThrottleError::Config(format!(
                "invalid table name '{}': use letters, digits and underscores",
                table
            )));
        }

        let store = Self {
            pool,
            table: table.to_string(),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn ensure_schema(&self) -> Result<()> {
        let table = &self.table;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                expire_at INTEGER NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_key_idx ON {table} (key)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_expire_at_idx ON {table} (expire_at)"
        ))
        .execute(&self.pool)
        .await?;

        debug!(table = %table, "Throttle schema ready");
        Ok(())
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl ThrottleStore for SqliteStore {
    async fn insert(&self, record: ThrottleRecord) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (key, expire_at) VALUES (?, ?)",
            self.table
        ))
        .bind(&record.key)
        .bind(record.expire_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_live(&self, key: &str, now: i64) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {} WHERE key = ? AND expire_at > ?",
            self.table
        ))
        .bind(key)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn delete_expired(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE expire_at <= ?",
            self.table
        ))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_if_below(&self, record: ThrottleRecord, allowed: u64, now: i64) -> Result<bool> {
        // One statement, so SQLite's write lock covers both the count and the insert.
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {table} (key, expire_at)
            SELECT ?, ?
            WHERE (SELECT COUNT(*) FROM {table} WHERE key = ? AND expire_at > ?) < ?
            "#,
            table = self.table
        ))
        .bind(&record.key)
        .bind(record.expire_at)
        .bind(&record.key)
        .bind(now)
        .bind(to_sql_int(allowed))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::{AdmissionMode, Engine, EngineConfig, ManualClock};
    use std::path::PathBuf;
    use std::sync::Arc;

    /// A fresh directory for a file database, removed with everything
    /// SQLite writes next to it.
    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "throttled-{}-{}-{}",
            name,
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("throttles"));
        assert!(is_valid_table_name("_app_throttles2"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("2throttles"));
        assert!(!is_valid_table_name("throttles; DROP TABLE x"));
        assert!(!is_valid_table_name("my-throttles"));
    }

    #[tokio::test]
    async fn test_invalid_table_rejected() {
        let result = SqliteStore::in_memory("bad name").await;
        assert!(matches!(result, Err(ThrottleError::Config(_))));
    }

    #[tokio::test]
    async fn test_insert_count_and_purge() {
        let store = SqliteStore::in_memory("throttles").await.unwrap();

        store.insert(ThrottleRecord::new("k", 0, 100)).await.unwrap();
        store.insert(ThrottleRecord::new("k", 0, 200)).await.unwrap();
        store.insert(ThrottleRecord::new("other", 0, 100)).await.unwrap();

        assert_eq!(store.count_live("k", 0).await.unwrap(), 2);
        assert_eq!(store.count_live("k", 100).await.unwrap(), 1);

        assert_eq!(store.delete_expired(99).await.unwrap(), 0);
        assert_eq!(store.delete_expired(100).await.unwrap(), 2);
        assert_eq!(store.delete_expired(100).await.unwrap(), 0);
        assert_eq!(store.count_live("k", 100).await.unwrap(), 1);
        assert_eq!(store.count_live("other", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_if_below() {
        let store = SqliteStore::in_memory("throttles").await.unwrap();

        for _ in 0..3 {
            assert!(store
                .insert_if_below(ThrottleRecord::new("k", 0, 1_000), 3, 0)
                .await
                .unwrap());
        }
        assert!(!store
            .insert_if_below(ThrottleRecord::new("k", 0, 1_000), 3, 0)
            .await
            .unwrap());
        assert_eq!(store.count_live("k", 0).await.unwrap(), 3);

        // once the window has passed the same key is admitted again
        assert!(store
            .insert_if_below(ThrottleRecord::new("k", 1_000, 1_000), 3, 1_000)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let store = SqliteStore::in_memory("throttles").await.unwrap();
        store.insert(ThrottleRecord::new("k", 0, 100)).await.unwrap();

        let reopened = SqliteStore::new(store.pool().clone(), "throttles").await.unwrap();
        assert_eq!(reopened.count_live("k", 0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_engine_over_sqlite() {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(SqliteStore::in_memory("throttles").await.unwrap());
        let engine = Engine::new(EngineConfig::new(store).with_clock(clock.clone()));

        assert!(engine.attempt("signup-email", Some(1), Some(60_000)).await.unwrap());
        assert!(!engine.attempt("signup-email", Some(1), Some(60_000)).await.unwrap());
        assert!(!engine.attempt("signup-email", Some(1), Some(60_000)).await.unwrap());

        clock.advance(Duration::from_millis(61_000));
        assert!(engine.attempt("signup-email", Some(1), Some(60_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_database_is_shared() {
        let dir = scratch_dir("shared");
        let path = dir.join("throttles.db");

        let first = SqliteStore::connect(&path, "throttles", 2).await.unwrap();
        let second = SqliteStore::connect(&path, "throttles", 2).await.unwrap();
        assert_eq!(first.table(), "throttles");

        first.insert(ThrottleRecord::new("shared", 0, 1_000)).await.unwrap();
        assert_eq!(second.count_live("shared", 0).await.unwrap(), 1);

        first.pool().close().await;
        second.pool().close().await;
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_atomic_admission_over_file_database() {
        let dir = scratch_dir("atomic");
        let store = Arc::new(
            SqliteStore::connect(dir.join("throttles.db"), "throttles", 8)
                .await
                .unwrap(),
        );
        let engine = Arc::new(Engine::new(
            EngineConfig::new(store.clone())
                .with_clock(Arc::new(ManualClock::new(1_700_000_000_000)))
                .with_admission(AdmissionMode::Atomic),
        ));

        let handles = (0..64).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.attempt("burst", Some(5), Some(60_000)).await })
        });

        let mut admitted = 0;
        let mut failed = 0;
        for result in futures::future::join_all(handles).await {
            match result.unwrap() {
                Ok(true) => admitted += 1,
                Ok(false) => {}
                Err(_) => failed += 1,
            }
        }

        assert_eq!(failed, 0);
        assert_eq!(admitted, 5);
        assert_eq!(
            store.count_live("burst", 1_700_000_000_000).await.unwrap(),
            5
        );

        store.pool().close().await;
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
