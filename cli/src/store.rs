//! Checkpoint store selection from `storage-location`.

use std::sync::Arc;

use anyhow::{Context, Result};

use warprelay_core::checkpoint::{Checkpoint, CheckpointStore};
use warprelay_core::config::ChainId;
use warprelay_storage::JsonFileStorage;

#[cfg(feature = "sqlite")]
use warprelay_storage::sqlite::SqliteStorage;

/// The configured checkpoint backend.
pub enum Store {
    Json(Arc<JsonFileStorage>),
    #[cfg(feature = "sqlite")]
    Sqlite(Arc<SqliteStorage>),
}

fn is_sqlite(location: &str) -> bool {
    location.starts_with("sqlite:") || location.ends_with(".db")
}

impl Store {
    pub async fn open(location: &str) -> Result<Self> {
        if is_sqlite(location) {
            #[cfg(feature = "sqlite")]
            {
                let store = SqliteStorage::open(location)
                    .await
                    .with_context(|| format!("cannot open SQLite store {location}"))?;
                return Ok(Self::Sqlite(Arc::new(store)));
            }
            #[cfg(not(feature = "sqlite"))]
            anyhow::bail!("{location} looks like a SQLite database; rebuild with --features sqlite");
        }

        let store = JsonFileStorage::open(location)
            .await
            .with_context(|| format!("cannot open checkpoint directory {location}"))?;
        Ok(Self::Json(Arc::new(store)))
    }

    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        match self {
            Self::Json(store) => store.clone() as Arc<dyn CheckpointStore>,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(store) => store.clone() as Arc<dyn CheckpointStore>,
        }
    }

    pub async fn load(&self, chain_id: &ChainId) -> Result<Option<Checkpoint>> {
        let checkpoint = match self {
            Self::Json(store) => store.load(chain_id).await?,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(store) => store.load(chain_id).await?,
        };
        Ok(checkpoint)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Json(store) => format!("json files in {}", store.dir().display()),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => "sqlite".into(),
        }
    }
}
