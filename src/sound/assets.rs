//! Sound asset cache entries and loaders.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::debug;

use super::decode::decode_mp3;
use super::PcmClip;
use crate::error::{PresenceError, Result};

/// Lifecycle of one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// One cached sound file. Entries are never evicted.
#[derive(Debug, Clone)]
pub struct SoundAsset {
    pub filename: String,
    pub load_state: LoadState,
    pub handle: Option<PcmClip>,
}

impl SoundAsset {
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            load_state: LoadState::Unloaded,
            handle: None,
        }
    }
}

/// Source of decoded sound files.
pub trait AssetLoader: Send + Sync {
    fn load<'a>(
        &'a self,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<PcmClip>> + Send + 'a>>;
}

/// Reads `<dir>/<filename>` and decodes it as MP3.
pub struct FileAssetLoader {
    dir: PathBuf,
}

impl FileAssetLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AssetLoader for FileAssetLoader {
    fn load<'a>(
        &'a self,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<PcmClip>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.dir.join(filename);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| PresenceError::asset(filename, e.to_string()))?;
            debug!(path = %path.display(), bytes = bytes.len(), "Decoding sound asset");

            tokio::task::spawn_blocking(move || decode_mp3(bytes))
                .await
                .map_err(|e| PresenceError::asset(filename, e.to_string()))?
                .map_err(|reason| PresenceError::asset(filename, reason))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_asset_failure() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileAssetLoader::new(dir.path());
        match loader.load("jingle.mp3").await {
            Err(PresenceError::AssetLoadFailure { filename, .. }) => {
                assert_eq!(filename, "jingle.mp3");
            }
            other => panic!("unexpected: {:?}", other.map(|c| c.samples.len())),
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_asset_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pop.mp3"), b"not audio at all").unwrap();
        let loader = FileAssetLoader::new(dir.path());
        assert!(matches!(
            loader.load("pop.mp3").await,
            Err(PresenceError::AssetLoadFailure { .. })
        ));
    }
}
