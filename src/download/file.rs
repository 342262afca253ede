use std::io::ErrorKind;
use std::path::Path;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use super::paths;

pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";

/// Source of image bytes.
#[async_trait::async_trait]
pub trait MediaClient: Send + Sync {
    /// Start fetching `url`. Succeeds only for HTTP 200; the body is
    /// streamed so large images are never buffered whole.
    async fn open(&self, url: &str) -> Result<ByteStream, DownloadError>;
}

#[async_trait::async_trait]
impl MediaClient for Client {
    async fn open(&self, url: &str) -> Result<ByteStream, DownloadError> {
        let response = self
            .get(url)
            .header(ACCEPT, IMAGE_ACCEPT)
            .send()
            .await
            .map_err(|e| DownloadError::Http {
                source: e,
                url: url.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(DownloadError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| DownloadError::Stream {
                    url: url.clone(),
                    message: e.to_string(),
                })
            })
            .boxed())
    }
}

/// Publish a finished temporary file at `dest` without ever replacing an
/// existing file. The temporary file is removed either way.
///
/// A hard link fails if `dest` exists, so two writers racing for the same
/// destination see exactly one winner.
pub(crate) async fn publish_exclusive(temp: &Path, dest: &Path) -> std::io::Result<()> {
    let linked = fs::hard_link(temp, dest).await;
    if let Err(e) = fs::remove_file(temp).await {
        tracing::warn!("Could not remove {}: {}", temp.display(), e);
    }
    linked
}

async fn write_stream(stream: &mut ByteStream, file: &mut File) -> Result<u64, DownloadError> {
    let mut bytes_written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(bytes_written)
}

/// Stream `url` into `dest`, returning the number of bytes written.
///
/// Bytes land in a hidden sibling first, so `dest` only ever holds a
/// complete file. With `replace` the finished file is renamed over `dest`;
/// without it [`publish_exclusive`] refuses to touch an existing file.
/// Either way a failed fetch leaves whatever was at `dest` untouched.
pub async fn download_file(
    client: &dyn MediaClient,
    url: &str,
    dest: &Path,
    replace: bool,
) -> Result<u64, DownloadError> {
    let mut stream = client.open(url).await?;

    let part_path = paths::temp_sibling(dest, "part");
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&part_path)
        .await?;

    let written = write_stream(&mut stream, &mut file).await;
    drop(file);

    let bytes_written = match written {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&part_path).await;
            return Err(e);
        }
    };

    if replace {
        if let Err(e) = fs::rename(&part_path, dest).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(DownloadError::Disk(e));
        }
        return Ok(bytes_written);
    }

    match publish_exclusive(&part_path, dest).await {
        Ok(()) => Ok(bytes_written),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Err(DownloadError::Conflict(dest.to_path_buf()))
        }
        Err(e) => Err(DownloadError::Disk(e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory image host. Unknown URLs answer 404.
    #[derive(Clone, Default)]
    pub(crate) struct FakeMedia {
        pub(crate) images: HashMap<String, Vec<Bytes>>,
        pub(crate) requests: Arc<Mutex<Vec<String>>>,
        /// Called when a body starts streaming.
        pub(crate) on_open: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    }

    impl FakeMedia {
        pub(crate) fn with(mut self, url: &str, chunks: &[&[u8]]) -> Self {
            self.images.insert(
                url.to_string(),
                chunks.iter().map(|c| Bytes::copy_from_slice(c)).collect(),
            );
            self
        }

        pub(crate) fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl MediaClient for FakeMedia {
        async fn open(&self, url: &str) -> Result<ByteStream, DownloadError> {
            self.requests.lock().unwrap().push(url.to_string());
            let chunks = self
                .images
                .get(url)
                .cloned()
                .ok_or_else(|| DownloadError::HttpStatus {
                    status: 404,
                    url: url.to_string(),
                })?;
            if let Some(hook) = &self.on_open {
                hook(url);
            }
            Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
        }
    }

    struct BrokenBody;

    #[async_trait::async_trait]
    impl MediaClient for BrokenBody {
        async fn open(&self, url: &str) -> Result<ByteStream, DownloadError> {
            let url = url.to_string();
            Ok(futures_util::stream::iter(vec![
                Ok(Bytes::from_static(b"half")),
                Err(DownloadError::Stream {
                    url,
                    message: "connection reset".into(),
                }),
            ])
            .boxed())
        }
    }

    fn leftover_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_download_writes_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g_1.jpeg");
        let media = FakeMedia::default().with("https://img/1", &[b"abc", b"def"]);

        let n = download_file(&media, "https://img/1", &dest, false).await.unwrap();
        assert_eq!(n, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcdef");
        assert_eq!(leftover_files(dir.path()), vec!["g_1.jpeg".to_string()]);
    }

    #[tokio::test]
    async fn test_download_404_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g_1.jpeg");
        let err = download_file(&FakeMedia::default(), "https://img/missing", &dest, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_body_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g_1.jpeg");
        let err = download_file(&BrokenBody, "https://img/1", &dest, false)
            .await
            .unwrap_err();
        assert!(err.is_skippable());
        assert!(leftover_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_existing_destination_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g_1.jpeg");
        std::fs::write(&dest, b"other writer").unwrap();
        let media = FakeMedia::default().with("https://img/1", &[b"new"]);

        let err = download_file(&media, "https://img/1", &dest, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Conflict(_)));
        assert_eq!(std::fs::read(&dest).unwrap(), b"other writer");
        assert_eq!(leftover_files(dir.path()), vec!["g_1.jpeg".to_string()]);
    }

    #[tokio::test]
    async fn test_replace_renames_over_existing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g_1.jpeg");
        std::fs::write(&dest, b"old").unwrap();
        let media = FakeMedia::default().with("https://img/1", &[b"new"]);

        download_file(&media, "https://img/1", &dest, true).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert_eq!(leftover_files(dir.path()), vec!["g_1.jpeg".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("g_1.jpeg");
        std::fs::write(&dest, b"old").unwrap();

        let err = download_file(&BrokenBody, "https://img/1", &dest, true)
            .await
            .unwrap_err();
        assert!(err.is_skippable());
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert_eq!(leftover_files(dir.path()), vec!["g_1.jpeg".to_string()]);
    }
}
