// ─── Modrinth Registry ───
// Version lists, search, project/team and hash lookups against the Modrinth v2 API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ModRegistry, ModVersion, SearchHit, SearchQuery};
use crate::core::error::{ModError, ModResult};
use crate::core::http::map_request_error;

pub const MODRINTH_API_BASE: &str = "https://api.modrinth.com/v2";

const LOADER_CATEGORIES: [&str; 4] = ["fabric", "forge", "neoforge", "quilt"];
const DEFAULT_SEARCH_LIMIT: u32 = 20;

pub struct ModrinthRegistry {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<RawSearchHit>,
}

#[derive(Debug, Deserialize)]
struct RawSearchHit {
    project_id: String,
    slug: Option<String>,
    title: String,
    description: Option<String>,
    author: Option<String>,
    icon_url: Option<String>,
    downloads: Option<u64>,
    follows: Option<u64>,
    date_modified: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: String,
    slug: Option<String>,
    title: String,
    description: Option<String>,
    icon_url: Option<String>,
    downloads: Option<u64>,
    followers: Option<u64>,
    updated: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    loaders: Vec<String>,
}

impl From<RawSearchHit> for SearchHit {
    fn from(raw: RawSearchHit) -> Self {
        let loaders = raw
            .categories
            .iter()
            .filter(|c| LOADER_CATEGORIES.contains(&c.as_str()))
            .cloned()
            .collect();
        Self {
            project_id: raw.project_id,
            slug: raw.slug,
            title: raw.title,
            description: raw.description,
            author: raw.author,
            icon_url: raw.icon_url.filter(|u| !u.is_empty()),
            downloads: raw.downloads,
            likes: raw.follows,
            last_updated: raw.date_modified,
            categories: raw.categories,
            loaders,
        }
    }
}

impl From<RawProject> for SearchHit {
    fn from(raw: RawProject) -> Self {
        Self {
            project_id: raw.id,
            slug: raw.slug,
            title: raw.title,
            description: raw.description,
            author: None,
            icon_url: raw.icon_url.filter(|u| !u.is_empty()),
            downloads: raw.downloads,
            likes: raw.followers,
            last_updated: raw.updated,
            categories: raw.categories,
            loaders: raw.loaders,
        }
    }
}

impl ModrinthRegistry {
    pub fn new(client: Client, base_url: String, request_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    async fn project_owner(&self, project_id: &str) -> ModResult<Option<String>> {
        let path = format!("/project/{}/members", project_id);
        match self.get_json(&path, &[]).await? {
            Some(value) => owner_from_members(value),
            None => Ok(None),
        }
    }

    /// GET a JSON document. `Ok(None)` means the registry answered 404.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> ModResult<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Modrinth GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| map_request_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ModError::RegistryStatus {
                url,
                status: status.as_u16(),
            });
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| map_request_error(&url, e))?;
        Ok(Some(value))
    }
}

#[derive(Debug, Deserialize)]
struct RawMember {
    role: Option<String>,
    user: RawUser,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    username: String,
}

/// The `Owner` of a team listing, else its first member.
pub(crate) fn owner_from_members(value: Value) -> ModResult<Option<String>> {
    let members: Vec<RawMember> = serde_json::from_value(value)?;
    let owner = members
        .iter()
        .find(|m| m.role.as_deref() == Some("Owner"))
        .or_else(|| members.first());
    Ok(owner.map(|m| m.user.username.clone()))
}

/// Keep every well-formed release; a bad entry never sinks the whole list.
pub(crate) fn parse_versions(value: Value) -> ModResult<Vec<ModVersion>> {
    let Value::Array(entries) = value else {
        return Err(ModError::MalformedRegistryData(
            "version list is not an array".into(),
        ));
    };

    let total = entries.len();
    let versions: Vec<ModVersion> = entries.iter().filter_map(ModVersion::from_value).collect();
    if versions.len() < total {
        warn!(
            "Skipped {} malformed version entries out of {}",
            total - versions.len(),
            total
        );
    }
    Ok(versions)
}

pub(crate) fn parse_search_hits(value: Value) -> ModResult<Vec<SearchHit>> {
    let response: SearchResponse = serde_json::from_value(value)?;
    Ok(response.hits.into_iter().map(SearchHit::from).collect())
}

/// Facet filter in Modrinth's `[[a],[b]]` AND-of-ORs encoding.
fn search_facets(query: &SearchQuery) -> Option<String> {
    let mut groups = vec![vec!["project_type:mod".to_string()]];
    if let Some(game_version) = &query.game_version {
        groups.push(vec![format!("versions:{}", game_version)]);
    }
    if let Some(loader) = &query.loader {
        groups.push(vec![format!("categories:{}", loader)]);
    }
    serde_json::to_string(&groups).ok()
}

#[async_trait]
impl ModRegistry for ModrinthRegistry {
    async fn get_versions_for_mod(&self, project_id: &str) -> ModResult<Vec<ModVersion>> {
        let path = format!("/project/{}/version", project_id);
        let value = self
            .get_json(&path, &[])
            .await?
            .ok_or_else(|| ModError::ModNotFound(project_id.to_string()))?;

        let versions = parse_versions(value)?;
        info!("Modrinth: {} versions for {}", versions.len(), project_id);
        Ok(versions)
    }

    async fn search(&self, query: &SearchQuery) -> ModResult<Vec<SearchHit>> {
        let mut params = vec![
            ("query", query.query.clone()),
            (
                "limit",
                query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).to_string(),
            ),
        ];
        if let Some(facets) = search_facets(query) {
            params.push(("facets", facets));
        }

        match self.get_json("/search", &params).await? {
            Some(value) => parse_search_hits(value),
            None => Ok(Vec::new()),
        }
    }

    async fn get_project(&self, project_id: &str) -> ModResult<SearchHit> {
        let path = format!("/project/{}", project_id);
        let value = self
            .get_json(&path, &[])
            .await?
            .ok_or_else(|| ModError::ModNotFound(project_id.to_string()))?;
        let project: RawProject = serde_json::from_value(value)?;
        let mut hit = SearchHit::from(project);

        // Project documents carry no author; the team listing does.
        match self.project_owner(project_id).await {
            Ok(author) => hit.author = author,
            Err(e) => warn!("No author for {}: {}", project_id, e),
        }
        Ok(hit)
    }

    async fn version_from_hash(&self, sha1: &str) -> ModResult<Option<ModVersion>> {
        let path = format!("/version_file/{}", sha1);
        let query = [("algorithm", "sha1".to_string())];
        let Some(value) = self.get_json(&path, &query).await? else {
            return Ok(None);
        };
        Ok(ModVersion::from_value(&value))
    }
}
