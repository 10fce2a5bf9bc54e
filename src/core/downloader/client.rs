use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use sha1::{Digest, Sha1};
use sha2::Sha512;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::error::{ModError, ModResult};
use crate::core::http::map_request_error;

/// Directory next to the destination that holds in-flight downloads.
pub const STAGING_DIR: &str = ".staging";
const PART_SUFFIX: &str = ".part";

/// A single file to download with optional hashes for validation.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub url: String,
    pub dest: PathBuf,
    pub sha1: Option<String>,
    pub sha512: Option<String>,
}

/// Streaming, hash-validated downloader.
///
/// Bytes go to `<dest dir>/.staging/<name>.part` and are renamed into place
/// only after validation, so the destination never holds a partial file.
/// Requests for the same destination are serialized.
pub struct Downloader {
    client: Client,
    /// Overall limit per download, body included.
    timeout: Duration,
    in_flight: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

struct Streamed {
    bytes: u64,
    sha1: String,
    sha512: String,
}

/// Staging path used for a destination. Stable, so a retry reuses it.
pub fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(STAGING_DIR)
        .join(format!("{}{}", name, PART_SUFFIX))
}

impl Downloader {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            in_flight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, dest: &Path) -> Arc<Mutex<()>> {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(dest.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, dest: &Path, lock: Arc<Mutex<()>>) {
        let mut map = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map entry plus our handle: nobody else is waiting.
        if Arc::strong_count(&lock) <= 2 {
            map.remove(dest);
        }
    }

    /// Download `entry.url` to `entry.dest`. Returns the number of bytes written.
    ///
    /// On any failure the staging file is removed and `entry.dest` is left as
    /// it was before the call.
    pub async fn download_file(&self, entry: &DownloadEntry) -> ModResult<u64> {
        let lock = self.lock_for(&entry.dest);
        let result = {
            let _guard = lock.lock().await;
            self.download_locked(entry).await
        };
        self.release(&entry.dest, lock);
        result
    }

    async fn download_locked(&self, entry: &DownloadEntry) -> ModResult<u64> {
        let part = staging_path(&entry.dest);

        // Leftover from an earlier failed attempt.
        let _ = tokio::fs::remove_file(&part).await;

        let outcome = match self.stream_to(&entry.url, &part).await {
            Ok(streamed) => match verify(entry, &streamed) {
                Ok(()) => tokio::fs::rename(&part, &entry.dest)
                    .await
                    .map(|_| streamed.bytes)
                    .map_err(|source| ModError::io(&entry.dest, source)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if outcome.is_err() {
            if let Err(e) = tokio::fs::remove_file(&part).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove staging file {:?}: {}", part, e);
                }
            }
        }

        match &outcome {
            Ok(bytes) => info!("Downloaded {} ({} bytes) -> {:?}", entry.url, bytes, entry.dest),
            Err(e) => warn!("Download of {} failed: {}", entry.url, e),
        }
        outcome
    }

    async fn stream_to(&self, url: &str, part: &Path) -> ModResult<Streamed> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut sha1 = Sha1::new();
        let mut sha512 = Sha512::new();
        let mut written = 0u64;

        // Scoped so the handle is closed before the rename.
        {
            // The staging folder stays in place; other downloads may share it.
            let staging_dir = part.parent().unwrap_or_else(|| Path::new("."));
            tokio::fs::create_dir_all(staging_dir)
                .await
                .map_err(|source| ModError::io(staging_dir, source))?;

            let mut file = tokio::fs::File::create(part)
                .await
                .map_err(|source| ModError::io(part, source))?;

            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| map_request_error(url, e))?;
                sha1.update(&chunk);
                sha512.update(&chunk);
                file.write_all(&chunk)
                    .await
                    .map_err(|source| ModError::io(part, source))?;
                written += chunk.len() as u64;
            }

            file.flush()
                .await
                .map_err(|source| ModError::io(part, source))?;
            file.sync_all()
                .await
                .map_err(|source| ModError::io(part, source))?;
        }

        debug!("Streamed {} bytes from {}", written, url);
        Ok(Streamed {
            bytes: written,
            sha1: hex::encode(sha1.finalize()),
            sha512: hex::encode(sha512.finalize()),
        })
    }
}

/// Non-empty, then SHA-1 if known, else SHA-512 if known.
fn verify(entry: &DownloadEntry, streamed: &Streamed) -> ModResult<()> {
    if streamed.bytes == 0 {
        return Err(ModError::EmptyDownload(entry.url.clone()));
    }

    let check = match (&entry.sha1, &entry.sha512) {
        (Some(expected), _) => Some((expected, &streamed.sha1)),
        (None, Some(expected)) => Some((expected, &streamed.sha512)),
        (None, None) => None,
    };

    if let Some((expected, actual)) = check {
        if !expected.eq_ignore_ascii_case(actual) {
            return Err(ModError::HashMismatch {
                path: entry.dest.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }
    }
    Ok(())
}
