use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use sha1::{Digest, Sha1};
use tracing::debug;
use uuid::Uuid;

use crate::core::error::{ModError, ModResult};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// Content-addressed icon store. The cache key is the source URL.
///
/// Writes land in a uniquely named temp file first and are renamed into
/// place, so concurrent writers of one key never leave a torn file.
#[derive(Debug, Clone)]
pub struct IconCache {
    root: PathBuf,
    client: Client,
    request_timeout: Duration,
}

/// Cache key for an icon embedded in a mod archive.
///
/// The archive hash rides in the fragment, so a jar replaced at the same
/// path gets a fresh entry while the extension still comes from `entry`.
pub fn archive_icon_key(archive: &Path, archive_sha1: &str, entry: &str) -> String {
    format!("jar:file://{}!/{}#{}", archive.display(), entry, archive_sha1)
}

fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    ext.and_then(|ext| IMAGE_EXTENSIONS.iter().find(|known| **known == ext).copied())
        .unwrap_or("png")
}

impl IconCache {
    pub fn new(root: PathBuf, client: Client, request_timeout: Duration) -> Self {
        Self {
            root,
            client,
            request_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic cache location for `url`.
    pub fn path_for_url(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha1::digest(url.as_bytes()));
        self.root.join(format!("{}.{}", digest, extension_for(url)))
    }

    /// Local path of the icon behind `url`, fetching it on first use.
    pub async fn fetch(&self, url: &str) -> ModResult<PathBuf> {
        let dest = self.path_for_url(url);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest);
        }

        let bytes = if let Some(local) = url.strip_prefix("file://") {
            tokio::fs::read(local)
                .await
                .map_err(|source| ModError::io(local, source))?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .timeout(self.request_timeout)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ModError::DownloadFailed {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            response.bytes().await?.to_vec()
        } else {
            return Err(ModError::Other(format!("Unsupported icon URL: {}", url)));
        };

        if bytes.is_empty() {
            return Err(ModError::EmptyDownload(url.to_string()));
        }

        self.write_atomic(&dest, &bytes).await?;
        debug!("Cached icon {} -> {:?}", url, dest);
        Ok(dest)
    }

    /// Store already-loaded bytes under `key`, unless an entry exists.
    pub async fn store_bytes(&self, key: &str, bytes: &[u8]) -> ModResult<PathBuf> {
        let dest = self.path_for_url(key);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(dest);
        }
        self.write_atomic(&dest, bytes).await?;
        Ok(dest)
    }

    async fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> ModResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ModError::io(&self.root, source))?;

        let temp = self.root.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(source) = tokio::fs::write(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(ModError::io(&temp, source));
        }
        if let Err(source) = tokio::fs::rename(&temp, dest).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(ModError::io(dest, source));
        }
        Ok(())
    }
}
