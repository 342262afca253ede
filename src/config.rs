use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::cli::LibraryArgs;

const DEFAULT_DATA_PATH: &str = "generations/data";
const DEFAULT_MEDIA_PATH: &str = "generations/media";

/// Settings read from the JSON config file. Every key is optional.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub generations_data_path: Option<String>,
    pub generations_media_path: Option<String>,
    pub exclude_images: Option<bool>,
    pub secret_key: Option<String>,
    /// The stored key is encrypted with a password and cannot be used as is.
    #[serde(default)]
    pub key_encrypt: bool,
}

impl std::fmt::Debug for FileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfig")
            .field("generations_data_path", &self.generations_data_path)
            .field("generations_media_path", &self.generations_media_path)
            .field("exclude_images", &self.exclude_images)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("key_encrypt", &self.key_encrypt)
            .finish()
    }
}

impl FileConfig {
    /// Load the config file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// The stored key, if it can be used directly.
    pub fn usable_secret_key(&self) -> Option<&str> {
        if self.key_encrypt {
            return None;
        }
        self.secret_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Library locations after merging the config file with command-line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryPaths {
    pub data_root: PathBuf,
    pub media_root: PathBuf,
}

impl LibraryPaths {
    pub fn resolve(file: &FileConfig, args: &LibraryArgs) -> Self {
        let data = args
            .data_dir
            .as_deref()
            .or(file.generations_data_path.as_deref())
            .unwrap_or(DEFAULT_DATA_PATH);
        let media = args
            .media_dir
            .as_deref()
            .or(file.generations_media_path.as_deref())
            .unwrap_or(DEFAULT_MEDIA_PATH);
        Self {
            data_root: expand_tilde(data),
            media_root: expand_tilde(media),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::load(&dir.path().join("none.json")).unwrap();
        assert!(config.secret_key.is_none());
        assert!(!config.key_encrypt);
    }

    #[test]
    fn test_load_known_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "generationsDataPath": "/backup/data",
                "generationsMediaPath": "/backup/media",
                "keyEncrypt": false,
                "excludeImages": true,
                "secretKey": "abc"
            }"#,
        )
        .unwrap();
        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.exclude_images, Some(true));
        assert_eq!(config.usable_secret_key(), Some("abc"));

        let paths = LibraryPaths::resolve(&config, &LibraryArgs::default());
        assert_eq!(paths.data_root, PathBuf::from("/backup/data"));
        assert_eq!(paths.media_root, PathBuf::from("/backup/media"));
    }

    #[test]
    fn test_encrypted_or_empty_key_unusable() {
        let encrypted = FileConfig {
            secret_key: Some("iv:ciphertext".into()),
            key_encrypt: true,
            ..FileConfig::default()
        };
        assert_eq!(encrypted.usable_secret_key(), None);

        let empty = FileConfig {
            secret_key: Some(String::new()),
            ..FileConfig::default()
        };
        assert_eq!(empty.usable_secret_key(), None);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let config = FileConfig {
            generations_data_path: Some("/from/file".into()),
            ..FileConfig::default()
        };
        let args = LibraryArgs {
            data_dir: Some("/from/flag".into()),
            media_dir: None,
        };
        let paths = LibraryPaths::resolve(&config, &args);
        assert_eq!(paths.data_root, PathBuf::from("/from/flag"));
        assert_eq!(paths.media_root, PathBuf::from(DEFAULT_MEDIA_PATH));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/x"), home.join("x"));
        }
    }
}
