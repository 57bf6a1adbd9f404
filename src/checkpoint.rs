//! Resume checkpoints
//!
//! One JSON file per (source, destination) pair holding the id of the last
//! message forwarded successfully, e.g. `posteds/-1001234_-1005678.json`
//! containing `57`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name depends only on the two resolved chat ids.
    pub fn path_for(&self, source_id: i64, destination_id: i64) -> PathBuf {
        self.dir.join(format!("{}_{}.json", source_id, destination_id))
    }

    /// Read a checkpoint. Missing or unreadable files count as "no checkpoint".
    pub fn load(&self, path: &Path) -> Option<i32> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "Failed to read checkpoint, starting from the beginning: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<i32>(content.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(path = %path.display(), "Corrupt checkpoint, starting from the beginning: {}", e);
                None
            }
        }
    }

    /// Persist `message_id` as the latest forwarded message.
    ///
    /// Writes a sibling temp file and renames it over the target so an
    /// interrupted write never leaves a truncated checkpoint behind.
    pub fn save(&self, path: &Path, message_id: i32) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(&message_id)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), message_id, "Checkpoint saved");
        Ok(())
    }
}
