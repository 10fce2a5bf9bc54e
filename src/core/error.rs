use std::path::{Path, PathBuf};
use thiserror::Error;

/// Central error type for the mod management engine.
/// Every module returns `Result<T, ModError>`.
#[derive(Debug, Error)]
pub enum ModError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Registry returned HTTP {status} for {url}")]
    RegistryStatus { url: String, status: u16 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    // ── Integrity ───────────────────────────────────────
    #[error("Hash mismatch for {path:?}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Downloaded file from {0} is empty")]
    EmptyDownload(String),

    // ── Not found ───────────────────────────────────────
    #[error("No mods folder for profile '{0}'")]
    ModsFolderNotFound(String),

    #[error("Mod '{0}' is not linked to a registry entry")]
    NotResolvable(String),

    #[error("Registry has no entry for '{0}'")]
    ModNotFound(String),

    #[error("Mod file missing: {0:?}")]
    ModFileMissing(PathBuf),

    #[error("Backup not found: {0:?}")]
    BackupNotFound(PathBuf),

    #[error("No version selected for download of '{0}'")]
    NoDownloadSelected(String),

    // ── Malformed data ──────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Malformed registry data: {0}")]
    MalformedRegistryData(String),

    #[error("No metadata source produced data for '{0}'")]
    MetadataUnavailable(String),

    // ── Generic ─────────────────────────────────────────
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type ModResult<T> = Result<T, ModError>;

/// Failure classes callers can branch on for messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MalformedData,
    Io,
    Network,
    Integrity,
    Internal,
}

impl ModError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ModError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ModError::Io { .. } => ErrorKind::Io,
            ModError::Http(_)
            | ModError::DownloadFailed { .. }
            | ModError::RegistryStatus { .. }
            | ModError::Timeout(_) => ErrorKind::Network,
            ModError::HashMismatch { .. } | ModError::EmptyDownload(_) => ErrorKind::Integrity,
            ModError::ModsFolderNotFound(_)
            | ModError::NotResolvable(_)
            | ModError::ModNotFound(_)
            | ModError::ModFileMissing(_)
            | ModError::BackupNotFound(_)
            | ModError::NoDownloadSelected(_) => ErrorKind::NotFound,
            ModError::Json(_)
            | ModError::Toml(_)
            | ModError::Zip(_)
            | ModError::MalformedRegistryData(_)
            | ModError::MetadataUnavailable(_) => ErrorKind::MalformedData,
            ModError::Join(_) | ModError::Other(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for ModError {
    fn from(source: std::io::Error) -> Self {
        ModError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for the command surface ──────────────
// Command payloads are printed as JSON, errors travel as their message.
impl serde::Serialize for ModError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
