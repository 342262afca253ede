//! Local persistence for generation records.
//!
//! Each record lives at `<data>/<YYYY-MM-DD>/<id>.json`, a path that depends
//! only on the record's date and id. Writes go through a temporary sibling
//! so a crash never leaves a half-written record behind.

mod atomic;
pub mod checkpoint;
pub mod error;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde_json::Value;

use crate::download::paths::date_dir;
use crate::feed::GenerationRecord;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::StoreError;

pub(crate) use atomic::write_atomic;

/// Result of [`RecordStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// False when the record was already on disk and left untouched.
    pub saved: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RecordStore {
    data_root: PathBuf,
}

impl RecordStore {
    pub fn new(data_root: PathBuf) -> Self {
        Self { data_root }
    }

    pub fn record_path(&self, date: NaiveDate, id: &str) -> PathBuf {
        self.data_root
            .join(date_dir(date))
            .join(format!("{}.json", id))
    }

    pub async fn exists(&self, date: NaiveDate, id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(date, id);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    /// Persist `record` unless it is already present (or `overwrite` is set).
    pub async fn save(&self, record: &GenerationRecord, overwrite: bool) -> Result<SaveOutcome, StoreError> {
        let path = self.record_path(record.date(), record.id());
        if !overwrite && self.exists(record.date(), record.id()).await? {
            return Ok(SaveOutcome { saved: false, path });
        }

        let mut value = record.raw().clone();
        strip_image_tokens(&mut value, false);
        let contents = serde_json::to_vec_pretty(&value).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;

        write_atomic(&path, &contents, overwrite).await?;
        tracing::debug!("Saved {}", path.display());
        Ok(SaveOutcome { saved: true, path })
    }

    /// Read a saved record back from disk.
    pub async fn load(&self, date: NaiveDate, id: &str) -> Result<GenerationRecord, StoreError> {
        read_record(&self.record_path(date, id)).await
    }
}

pub(crate) async fn read_record(path: &Path) -> Result<GenerationRecord, StoreError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    GenerationRecord::from_value(value).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn is_token_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "jwt" || key.ends_with("token")
}

/// Remove short-lived request tokens from image entries. `in_images` is
/// true while walking the elements of an `images` array.
fn strip_image_tokens(value: &mut Value, in_images: bool) {
    match value {
        Value::Object(map) => {
            if in_images {
                map.retain(|key, _| !is_token_key(key));
            }
            for (key, child) in map.iter_mut() {
                strip_image_tokens(child, key == "images");
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_image_tokens(item, in_images);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> Value {
        json!({
            "id": "abc123",
            "createdAt": "2024-03-09T10:00:00.000Z",
            "params": { "prompt": "a cat", "sessionToken": "kept-outside-images" },
            "steps": [{
                "images": [{
                    "url": "https://img.test/a/A1",
                    "seed": 5,
                    "token": "t",
                    "jwt": "j",
                    "blobToken": "b",
                    "width": 512
                }]
            }]
        })
    }

    fn record() -> GenerationRecord {
        GenerationRecord::from_value(raw()).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_record_path() {
        let store = RecordStore::new(PathBuf::from("/data"));
        assert_eq!(
            store.record_path(date(), "abc123"),
            PathBuf::from("/data/2024-03-09/abc123.json")
        );
    }

    #[test]
    fn test_is_token_key() {
        assert!(is_token_key("token"));
        assert!(is_token_key("JWT"));
        assert!(is_token_key("blobToken"));
        assert!(is_token_key("SASTOKEN"));
        assert!(!is_token_key("tokens"));
        assert!(!is_token_key("seed"));
    }

    #[test]
    fn test_strip_only_inside_images() {
        let mut value = raw();
        strip_image_tokens(&mut value, false);
        let image = &value["steps"][0]["images"][0];
        assert!(image.get("token").is_none());
        assert!(image.get("jwt").is_none());
        assert!(image.get("blobToken").is_none());
        assert_eq!(image["width"], 512);
        assert_eq!(value["params"]["sessionToken"], "kept-outside-images");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());

        assert!(!store.exists(date(), "abc123").await.unwrap());
        let outcome = store.save(&record(), false).await.unwrap();
        assert!(outcome.saved);
        assert_eq!(outcome.path, dir.path().join("2024-03-09/abc123.json"));
        assert!(store.exists(date(), "abc123").await.unwrap());

        let loaded = store.load(date(), "abc123").await.unwrap();
        let mut expected = raw();
        strip_image_tokens(&mut expected, false);
        assert_eq!(loaded.raw(), &expected);
        assert_eq!(loaded.images(), record().images());
    }

    #[tokio::test]
    async fn test_saved_json_is_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());
        let outcome = store.save(&record(), false).await.unwrap();
        let text = std::fs::read_to_string(outcome.path).unwrap();
        assert!(text.starts_with("{\n  \""));
    }

    #[tokio::test]
    async fn test_second_save_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());
        let first = store.save(&record(), false).await.unwrap();
        std::fs::write(&first.path, b"{\"edited\": true}").unwrap();

        let second = store.save(&record(), false).await.unwrap();
        assert!(!second.saved);
        assert_eq!(std::fs::read(&second.path).unwrap(), b"{\"edited\": true}");
    }

    #[tokio::test]
    async fn test_overwrite_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());
        let first = store.save(&record(), false).await.unwrap();
        std::fs::write(&first.path, b"stale").unwrap();

        let second = store.save(&record(), true).await.unwrap();
        assert!(second.saved);
        assert!(store.load(date(), "abc123").await.is_ok());

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("2024-03-09"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("abc123.json")]);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());
        let err = store.load(date(), "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().to_path_buf());
        let path = store.record_path(date(), "bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();
        let err = store.load(date(), "bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
