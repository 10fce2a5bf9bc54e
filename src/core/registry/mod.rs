mod modrinth;
mod version;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::ModResult;
use crate::core::mods::model::RemoteIdentity;

pub use modrinth::{ModrinthRegistry, MODRINTH_API_BASE};
pub use version::{file_name_from_url, ModVersion, VersionFile};

/// Package summary returned by search and project lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub project_id: String,
    pub slug: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub icon_url: Option<String>,
    pub downloads: Option<u64>,
    pub likes: Option<u64>,
    pub last_updated: Option<String>,
    pub categories: Vec<String>,
    pub loaders: Vec<String>,
}

impl SearchHit {
    pub fn to_identity(&self) -> RemoteIdentity {
        RemoteIdentity {
            online_id: self.project_id.clone(),
            slug: self.slug.clone(),
            author: self.author.clone(),
            downloads: self.downloads,
            likes: self.likes,
            last_updated: self.last_updated.clone(),
            categories: self.categories.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub game_version: Option<String>,
    pub loader: Option<String>,
    pub limit: Option<u32>,
}

impl SearchQuery {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// A remote content registry.
///
/// Implementations only promise "a sequence of version-like objects" per
/// project; entries that fail [`ModVersion::from_value`] are skipped.
#[async_trait]
pub trait ModRegistry: Send + Sync {
    /// Releases of a project, newest first as the registry orders them.
    async fn get_versions_for_mod(&self, project_id: &str) -> ModResult<Vec<ModVersion>>;

    async fn search(&self, query: &SearchQuery) -> ModResult<Vec<SearchHit>>;

    async fn get_project(&self, project_id: &str) -> ModResult<SearchHit>;

    /// Release that published a file with this SHA-1, if the registry knows it.
    async fn version_from_hash(&self, sha1: &str) -> ModResult<Option<ModVersion>>;
}

/// Registry backend chosen by configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RegistryBackend {
    Modrinth { base_url: String },
}

impl Default for RegistryBackend {
    fn default() -> Self {
        RegistryBackend::Modrinth {
            base_url: MODRINTH_API_BASE.to_string(),
        }
    }
}

pub fn build_registry(
    backend: &RegistryBackend,
    client: reqwest::Client,
    request_timeout: Duration,
) -> Arc<dyn ModRegistry> {
    match backend {
        RegistryBackend::Modrinth { base_url } => Arc::new(ModrinthRegistry::new(
            client,
            base_url.clone(),
            request_timeout,
        )),
    }
}
