use std::io::ErrorKind;
use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::StoreError;
use crate::download::file::publish_exclusive;
use crate::download::paths::temp_sibling;

/// Write `contents` to `path` so readers only ever see the old file or the
/// complete new one.
///
/// With `replace` the new file is renamed over any existing one; without it
/// an existing file is left alone and reported as [`StoreError::Conflict`].
pub(crate) async fn write_atomic(path: &Path, contents: &[u8], replace: bool) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(parent, e))?;
    }

    let temp = temp_sibling(path, "tmp");
    if let Err(e) = write_synced(&temp, contents).await {
        let _ = fs::remove_file(&temp).await;
        return Err(StoreError::io(&temp, e));
    }

    if replace {
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StoreError::io(path, e));
        }
        return Ok(());
    }

    match publish_exclusive(&temp, path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StoreError::Conflict(path.to_path_buf())),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(contents).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_creates_parent_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024-03-09").join("a.json");
        write_atomic(&path, b"{}", false).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert_eq!(names(&dir.path().join("2024-03-09")), vec!["a.json"]);
    }

    #[tokio::test]
    async fn test_exclusive_write_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, b"first").unwrap();
        let err = write_atomic(&path, b"second", false).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        assert_eq!(names(dir.path()), vec!["a.json"]);
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, b"first").unwrap();
        write_atomic(&path, b"second", true).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(names(dir.path()), vec!["a.json"]);
    }
}
