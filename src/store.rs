//! The persisted list of streamers and their run state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{error::StoreError, util};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerRecord {
    pub site: String,
    pub username: String,
    #[serde(default)]
    pub running: bool,
}

#[derive(Debug)]
pub struct StreamerStore {
    path: PathBuf,
    write: Mutex<()>,
}

impl StreamerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the list. A missing file is an empty list.
    pub async fn load(&self) -> Result<Vec<StreamerRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, records: &[StreamerRecord]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(records)?;
        let _guard = self.write.lock().await;
        util::write_atomic(&self.path, &data).await?;
        Ok(())
    }
}
