//! SQLite checkpoint store.
//!
//! Persists one row per source chain in a single SQLite file.
//! Uses `sqlx` with WAL mode and `synchronous=FULL` so a committed
//! write survives a crash.
//!
//! # Usage
//! ```rust,no_run
//! use warprelay_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./relayer.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use warprelay_core::checkpoint::{Checkpoint, CheckpointStore};
use warprelay_core::config::ChainId;
use warprelay_core::error::RelayerError;

/// SQLite-backed checkpoint storage.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn storage_err(e: sqlx::Error) -> RelayerError {
    RelayerError::Storage(e.to_string())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./relayer.db"`) or a full
    /// SQLite URL (`"sqlite:./relayer.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, RelayerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, RelayerError> {
        // Every connection would get its own in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), RelayerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query("PRAGMA synchronous=FULL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id               TEXT    NOT NULL PRIMARY KEY,
                latest_processed_block INTEGER NOT NULL,
                updated_at             INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Full checkpoint record for a chain.
    pub async fn load(&self, chain_id: &ChainId) -> Result<Option<Checkpoint>, RelayerError> {
        let row = sqlx::query(
            "SELECT latest_processed_block, updated_at
             FROM checkpoints WHERE chain_id = ?",
        )
        .bind(chain_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| Checkpoint {
            chain_id: chain_id.clone(),
            latest_processed_block: r.get::<i64, _>("latest_processed_block") as u64,
            updated_at: r.get("updated_at"),
        }))
    }
}

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn get_height(&self, chain_id: &ChainId) -> Result<Option<u64>, RelayerError> {
        Ok(self.load(chain_id).await?.map(|cp| cp.latest_processed_block))
    }

    async fn set_height(&self, chain_id: &ChainId, height: u64) -> Result<(), RelayerError> {
        let height_i64 = i64::try_from(height)
            .map_err(|_| RelayerError::Storage(format!("height {height} exceeds SQLite INTEGER")))?;
        let checkpoint = Checkpoint::now(chain_id.clone(), height);

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, latest_processed_block, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(chain_id.to_string())
        .bind(height_i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(chain = %chain_id, height, "checkpoint saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
