//! JSON file checkpoint store.
//!
//! One `<chainID>.json` file per source chain under a storage directory.
//! Writes go to a temporary sibling file which is fsynced and then renamed
//! over the original, so a crash leaves either the old or the new height on
//! disk, never a torn file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use warprelay_core::checkpoint::{Checkpoint, CheckpointStore};
use warprelay_core::config::ChainId;
use warprelay_core::error::RelayerError;

/// File-backed checkpoint storage.
///
/// Each chain is only ever written by its own subscriber, so no locking is
/// needed across chains.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> RelayerError {
    RelayerError::Storage(format!("{context} {}: {e}", path.display()))
}

impl JsonFileStorage {
    /// Open a storage directory, creating it if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, RelayerError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err("cannot create storage directory", &dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, chain_id: &ChainId) -> PathBuf {
        self.dir.join(format!("{chain_id}.json"))
    }

    /// Full checkpoint record for a chain, `None` if no file exists yet.
    pub async fn load(&self, chain_id: &ChainId) -> Result<Option<Checkpoint>, RelayerError> {
        let path = self.path(chain_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("cannot read", &path, e)),
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)
            .map_err(|e| RelayerError::Storage(format!("corrupt checkpoint {}: {e}", path.display())))?;
        if &checkpoint.chain_id != chain_id {
            return Err(RelayerError::Storage(format!(
                "{} holds a checkpoint for chain {}",
                path.display(),
                checkpoint.chain_id
            )));
        }
        Ok(Some(checkpoint))
    }

    async fn write_atomically(&self, path: &Path, contents: &[u8]) -> Result<(), RelayerError> {
        let tmp = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| io_err("cannot create", &tmp, e))?;
        file.write_all(contents)
            .await
            .map_err(|e| io_err("cannot write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_err("cannot sync", &tmp, e))?;
        drop(file);

        fs::rename(&tmp, path)
            .await
            .map_err(|e| io_err("cannot replace", path, e))?;

        // Persist the rename itself.
        #[cfg(unix)]
        {
            let dir = fs::File::open(&self.dir)
                .await
                .map_err(|e| io_err("cannot open", &self.dir, e))?;
            dir.sync_all()
                .await
                .map_err(|e| io_err("cannot sync", &self.dir, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonFileStorage {
    async fn get_height(&self, chain_id: &ChainId) -> Result<Option<u64>, RelayerError> {
        Ok(self.load(chain_id).await?.map(|cp| cp.latest_processed_block))
    }

    async fn set_height(&self, chain_id: &ChainId, height: u64) -> Result<(), RelayerError> {
        let checkpoint = Checkpoint::now(chain_id.clone(), height);
        let contents = serde_json::to_vec_pretty(&checkpoint)
            .map_err(|e| RelayerError::Storage(e.to_string()))?;
        let path = self.path(chain_id);
        self.write_atomically(&path, &contents).await?;
        debug!(chain = %chain_id, height, path = %path.display(), "checkpoint saved");
        Ok(())
    }
}
