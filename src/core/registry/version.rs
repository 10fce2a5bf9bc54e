// ─── Version Descriptor ───
// One published release of a registry project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::mods::model::LoaderType;

/// Downloadable artifact of a version. Only the first file of a release is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionFile {
    pub url: String,
    pub file_name: String,
    pub sha1: Option<String>,
    pub sha512: Option<String>,
    pub size: Option<u64>,
}

/// Immutable snapshot of a release. Built only through [`ModVersion::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModVersion {
    id: Option<String>,
    project_id: Option<String>,
    name: String,
    version_number: String,
    date_published: DateTime<Utc>,
    game_versions: Vec<String>,
    loaders: Vec<String>,
    primary_file: VersionFile,
}

#[derive(Debug, Deserialize)]
struct RawVersion {
    id: Option<String>,
    project_id: Option<String>,
    name: Option<String>,
    version_number: Option<String>,
    date_published: Option<String>,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    loaders: Vec<String>,
    files: Option<Vec<RawFile>>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    url: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    hashes: RawHashes,
    size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHashes {
    sha1: Option<String>,
    sha512: Option<String>,
}

impl ModVersion {
    /// Build a descriptor from one registry entry.
    ///
    /// Returns `None` when the entry lacks a name, a version number, a
    /// parseable publish date or a first file with a download URL.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let raw: RawVersion = serde_json::from_value(value.clone()).ok()?;

        let name = raw.name.filter(|n| !n.trim().is_empty())?;
        let version_number = raw.version_number.filter(|v| !v.trim().is_empty())?;
        let date_published = DateTime::parse_from_rfc3339(raw.date_published.as_deref()?)
            .ok()?
            .with_timezone(&Utc);

        let first = raw.files?.into_iter().next()?;
        let url = first.url.filter(|u| !u.is_empty())?;
        let file_name = first
            .filename
            .filter(|f| !f.is_empty())
            .or_else(|| file_name_from_url(&url))?;

        Some(Self {
            id: raw.id,
            project_id: raw.project_id,
            name,
            version_number,
            date_published,
            game_versions: raw.game_versions,
            loaders: raw.loaders,
            primary_file: VersionFile {
                url,
                file_name,
                sha1: first.hashes.sha1,
                sha512: first.hashes.sha512,
                size: first.size,
            },
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version_number(&self) -> &str {
        &self.version_number
    }

    pub fn date_published(&self) -> DateTime<Utc> {
        self.date_published
    }

    pub fn game_versions(&self) -> &[String] {
        &self.game_versions
    }

    pub fn loaders(&self) -> &[String] {
        &self.loaders
    }

    pub fn primary_file(&self) -> &VersionFile {
        &self.primary_file
    }

    pub fn supports_game_version(&self, game_version: &str) -> bool {
        self.game_versions.iter().any(|v| v == game_version)
    }

    /// Whether any declared loader is usable by one of `loaders`.
    pub fn supports_any_loader(&self, loaders: &[LoaderType]) -> bool {
        self.loaders
            .iter()
            .filter_map(|name| LoaderType::from_registry_name(name))
            .any(|declared| loaders.contains(&declared))
    }
}

/// Last path segment of a URL, without query string.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let name = path.rsplit('/').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
