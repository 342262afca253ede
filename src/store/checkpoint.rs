//! Resume point for long traversals, kept next to the saved records.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;
use super::error::StoreError;
use crate::feed::Cursor;

pub const CHECKPOINT_FILE: &str = ".sync-checkpoint.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Cursor of the next page still to be processed.
    pub cursor: Option<Cursor>,
    pub updated_at: DateTime<Utc>,
    /// The feed ran out of pages after this checkpoint was written.
    #[serde(default)]
    pub exhausted: bool,
}

impl Checkpoint {
    /// Cursor to resume from, if the previous walk did not finish.
    pub fn resume_cursor(&self) -> Option<&Cursor> {
        if self.exhausted {
            None
        } else {
            self.cursor.as_ref()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(data_root: &Path) -> Self {
        Self {
            path: data_root.join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved checkpoint, or `None` if there is none yet.
    pub async fn load(&self) -> Result<Option<Checkpoint>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let contents = serde_json::to_vec_pretty(checkpoint).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &contents, true).await
    }

    /// Record that the walk reached `cursor`.
    pub async fn record_cursor(&self, cursor: &Cursor) -> Result<(), StoreError> {
        self.save(&Checkpoint {
            cursor: Some(cursor.clone()),
            updated_at: Utc::now(),
            exhausted: false,
        })
        .await
    }

    /// Record that the walk ran off the end of the feed.
    pub async fn mark_exhausted(&self) -> Result<(), StoreError> {
        let cursor = self.load().await?.and_then(|c| c.cursor);
        self.save(&Checkpoint {
            cursor,
            updated_at: Utc::now(),
            exhausted: true,
        })
        .await
    }
}
