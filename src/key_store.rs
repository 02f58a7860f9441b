//! On-disk product key and grace-period marker.
//!
//! The key artifact does double duty: its first line is the product key and
//! its modification time is the install timestamp that drives the grace
//! period. This process never rewrites the artifact after creating it.
//!
//! ## Location
//!
//! - Directory: `/etc/activationd/` (configurable)
//! - Artifact: `product.key` (configurable)

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;

use crate::config::StorageConfig;
use crate::errors::StoreError;

/// Owns the key artifact.
#[derive(Debug, Clone)]
pub struct KeyStore {
    directory: PathBuf,
    artifact: PathBuf,
}

impl KeyStore {
    pub fn new(directory: impl Into<PathBuf>, key_file: &str) -> Self {
        let directory = directory.into();
        let artifact = directory.join(key_file);
        Self {
            directory,
            artifact,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.directory, &config.key_file)
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact
    }

    /// Create the directory and an empty artifact if they are missing.
    ///
    /// An existing artifact is left untouched, so its mtime keeps marking the
    /// original install time.
    pub async fn ensure_initialized(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| StoreError::CreateDirectory {
                path: self.directory.clone(),
                source,
            })?;

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.artifact)
            .await
        {
            Ok(_) => {
                log::info!("Created key artifact at {}", self.artifact.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::debug!("Key artifact already present at {}", self.artifact.display());
                Ok(())
            }
            Err(source) => Err(StoreError::CreateArtifact {
                path: self.artifact.clone(),
                source,
            }),
        }
    }

    /// The trimmed first line of the artifact, or an empty string.
    ///
    /// A missing key is valid (OEM installs never have one), so read errors
    /// are logged and swallowed.
    pub async fn read_key(&self) -> String {
        match fs::read_to_string(&self.artifact).await {
            Ok(content) => content.lines().next().unwrap_or("").trim().to_string(),
            Err(e) => {
                log::debug!("Could not read key artifact {}: {}", self.artifact.display(), e);
                String::new()
            }
        }
    }

    /// Time elapsed since the artifact was last modified.
    pub async fn marker_age(&self) -> Duration {
        self.marker_age_at(SystemTime::now()).await
    }

    /// Marker age relative to `now`.
    ///
    /// An unreadable marker counts as infinitely old so checks still happen.
    /// A marker in the future counts as brand new.
    pub async fn marker_age_at(&self, now: SystemTime) -> Duration {
        match self.modified().await {
            Some(mtime) => now.duration_since(mtime).unwrap_or(Duration::ZERO),
            None => Duration::MAX,
        }
    }

    /// The install time recorded by the marker, if it can be read.
    pub async fn install_time(&self) -> Option<DateTime<Utc>> {
        self.modified().await.map(DateTime::<Utc>::from)
    }

    async fn modified(&self) -> Option<SystemTime> {
        match fs::metadata(&self.artifact).await.and_then(|m| m.modified()) {
            Ok(mtime) => Some(mtime),
            Err(e) => {
                log::warn!(
                    "Cannot stat key artifact {}: {}; treating grace period as expired",
                    self.artifact.display(),
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn store_in(dir: &TempDir) -> KeyStore {
        KeyStore::new(dir.path().join("activationd"), "product.key")
    }

    #[tokio::test]
    async fn initialization_creates_empty_artifact() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.ensure_initialized().await.expect("init should succeed");

        let content = std::fs::read_to_string(store.artifact_path()).unwrap();
        assert!(content.is_empty());
        assert_eq!(store.read_key().await, "");
    }

    #[tokio::test]
    async fn initialization_never_truncates_existing_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(dir.path().join("activationd")).unwrap();
        std::fs::write(store.artifact_path(), "ABCDE-12345\n").unwrap();

        store.ensure_initialized().await.unwrap();
        store.ensure_initialized().await.unwrap();

        assert_eq!(store.read_key().await, "ABCDE-12345");
    }

    #[tokio::test]
    async fn read_key_returns_trimmed_first_line() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.ensure_initialized().await.unwrap();
        std::fs::write(store.artifact_path(), "  XXXX-YYYY-ZZZZ \t\nsecond line\n").unwrap();

        assert_eq!(store.read_key().await, "XXXX-YYYY-ZZZZ");
    }

    #[tokio::test]
    async fn missing_artifact_reads_as_empty_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.read_key().await, "");
    }

    #[tokio::test]
    async fn missing_artifact_has_expired_grace_period() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.marker_age().await, Duration::MAX);
        assert!(store.install_time().await.is_none());
    }

    #[tokio::test]
    async fn marker_age_follows_mtime() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.ensure_initialized().await.unwrap();

        // Whole seconds so coarse filesystem timestamps compare exactly.
        let now_secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let installed = SystemTime::UNIX_EPOCH + Duration::from_secs(now_secs) - 10 * DAY;
        std::fs::File::options()
            .write(true)
            .open(store.artifact_path())
            .unwrap()
            .set_modified(installed)
            .unwrap();

        let age = store.marker_age_at(installed + 3 * DAY).await;
        assert_eq!(age, 3 * DAY);

        // Clock behind the marker.
        let age = store.marker_age_at(installed - DAY).await;
        assert_eq!(age, Duration::ZERO);
    }

    #[tokio::test]
    async fn unwritable_directory_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = KeyStore::new(blocker.join("activationd"), "product.key");

        let err = store.ensure_initialized().await.unwrap_err();
        assert!(matches!(err, StoreError::CreateDirectory { .. }));
    }
}
