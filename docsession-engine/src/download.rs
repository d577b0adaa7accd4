use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use docsession_core::filename::DEFAULT_FILENAME;
use docsession_core::{DownloadManager, LoadOptions, LoadParameters, LoadSource, TaskEvents};
use parking_lot::Mutex;
use tracing::info;

use crate::fetch::fetch;

/// Saves downloads into a fixed directory.
pub struct DirectoryDownloadManager {
    dir: PathBuf,
    saved: Mutex<Vec<PathBuf>>,
}

impl DirectoryDownloadManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create download directory at {:?}", dir))?;
        Ok(Self {
            dir,
            saved: Mutex::new(Vec::new()),
        })
    }

    /// Paths written so far, oldest first.
    pub fn saved(&self) -> Vec<PathBuf> {
        self.saved.lock().clone()
    }

    fn target(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME);
        self.dir.join(name)
    }
}

#[async_trait]
impl DownloadManager for DirectoryDownloadManager {
    async fn download(&self, data: Bytes, url: &str, filename: &str) -> Result<()> {
        let path = self.target(filename);
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .context("download writer panicked")??;
        info!(url, path = %path.display(), "document saved");
        self.saved.lock().push(path);
        Ok(())
    }

    async fn download_url(&self, url: &str, filename: &str) -> Result<()> {
        let parameters = LoadParameters {
            source: LoadSource::Url(url.to_owned()),
            options: LoadOptions::new(),
        };
        let fetched = fetch(&parameters, &TaskEvents::detached(0))
            .await
            .with_context(|| format!("failed to fetch {url}"))?;
        self.download(fetched.data, url, filename).await
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("part");
    let mut file =
        File::create(&tmp).with_context(|| format!("failed to open temp file {:?}", tmp))?;
    file.write_all(data)?;
    file.flush()?;
    fs::rename(&tmp, path).with_context(|| format!("failed to move download into {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use url::Url;

    #[tokio::test]
    async fn writes_bytes_under_the_given_name() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DirectoryDownloadManager::new(dir.path().join("out")).unwrap();

        manager
            .download(Bytes::from_static(b"%PDF-1.7"), "https://x/a.pdf", "../../etc/q3.pdf")
            .await
            .unwrap();

        let expected = dir.path().join("out").join("q3.pdf");
        assert_eq!(fs::read(&expected).unwrap(), b"%PDF-1.7");
        assert_eq!(manager.saved(), vec![expected]);
        assert!(!dir.path().join("out").join("q3.part").exists());
    }

    #[tokio::test]
    async fn fetches_urls_before_saving() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.pdf");
        fs::write(&source, b"%PDF-1.4 source").unwrap();
        let manager = DirectoryDownloadManager::new(dir.path().join("out")).unwrap();

        let url = Url::from_file_path(&source).unwrap();
        manager.download_url(url.as_str(), "").await.unwrap();
        let saved = fs::read(dir.path().join("out").join(DEFAULT_FILENAME)).unwrap();
        assert_eq!(saved, b"%PDF-1.4 source");

        let missing = Url::from_file_path(dir.path().join("gone.pdf")).unwrap();
        assert!(manager.download_url(missing.as_str(), "gone.pdf").await.is_err());
    }
}
