//! Artifact download and cache
//!
//! Packages are fetched by URL and stored under a deterministic path in the
//! cache root. A package whose expected artifact is already present is never
//! fetched again.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testkit_common::{Error, Result};
use tokio::fs;
use tracing::{debug, info};

/// Fetches artifact bytes by URL
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// HTTP artifact fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Download {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.bytes().await?)
    }
}

/// Local artifact cache rooted at the configured binary directory
#[derive(Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an entry relative to the cache root
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Download `url` to `<root>/<file_name>` unless it is already cached.
    pub async fn fetch_file(&self, url: &str, file_name: &str) -> Result<PathBuf> {
        let dest = self.path(file_name);
        if dest.exists() {
            info!("Package already downloaded: {}", dest.display());
            return Ok(dest);
        }

        fs::create_dir_all(&self.root).await?;
        info!("Downloading {} -> {}", url, dest.display());
        let bytes = self.fetcher.fetch(url).await?;
        fs::write(&dest, &bytes).await?;
        Ok(dest)
    }

    /// Download a zip archive, extract it into `<root>/<dir_name>` and
    /// remove the archive. Skipped when `expected` already exists.
    pub async fn fetch_archive(
        &self,
        url: &str,
        archive_name: &str,
        dir_name: &str,
        expected: &Path,
    ) -> Result<PathBuf> {
        let extract_dir = self.path(dir_name);
        if expected.exists() {
            info!("Package already downloaded: {}", expected.display());
            return Ok(extract_dir);
        }

        let archive = self.fetch_file(url, archive_name).await?;
        debug!("Extracting {} -> {}", archive.display(), extract_dir.display());
        extract_zip(archive.clone(), extract_dir.clone()).await?;
        fs::remove_file(&archive).await?;

        if !expected.exists() {
            return Err(Error::Install(format!(
                "{} not found in {}",
                expected.display(),
                archive_name
            )));
        }

        Ok(extract_dir)
    }
}

async fn extract_zip(archive: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        std::fs::create_dir_all(&dest)?;
        zip.extract(&dest)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// Mark a downloaded binary executable
pub async fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
