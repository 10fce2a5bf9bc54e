use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::model::{LoaderType, SharedMod};
use crate::core::error::{ModError, ModResult};
use crate::core::registry::{ModRegistry, ModVersion};

/// Outcome of an update check, mirrored onto the record.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateInfo {
    pub update_available: bool,
    pub installed_version: Option<String>,
    pub latest: Option<ModVersion>,
}

pub struct ModUpdateChecker {
    registry: Arc<dyn ModRegistry>,
}

impl ModUpdateChecker {
    pub fn new(registry: Arc<dyn ModRegistry>) -> Self {
        Self { registry }
    }

    /// Compare the installed release against the newest compatible one.
    ///
    /// A record is checked at most once until
    /// [`ModItem::reset_update_check_status`](super::ModItem::reset_update_check_status)
    /// is called; later calls return the stored result without a request.
    pub async fn check_updates_for_mod(
        &self,
        shared: &SharedMod,
        game_version: &str,
    ) -> ModResult<UpdateInfo> {
        let (online_id, installed_version, installed_sha1, loaders) = {
            let item = shared.lock().await;
            if item.update_checked {
                return Ok(UpdateInfo {
                    update_available: item.update_available,
                    installed_version: item.version.clone(),
                    latest: item.latest_version.clone(),
                });
            }
            let online_id = item
                .online_id()
                .map(str::to_string)
                .ok_or_else(|| ModError::NotResolvable(item.title()))?;
            (
                online_id,
                item.version.clone(),
                item.file_sha1.clone(),
                item.loaders(),
            )
        };

        let versions = self.registry.get_versions_for_mod(&online_id).await?;
        let latest = select_latest(versions, game_version, &loaders);

        let update_available = match &latest {
            Some(candidate) => is_update(
                installed_version.as_deref(),
                installed_sha1.as_deref(),
                candidate,
            ),
            None => false,
        };

        match &latest {
            Some(candidate) if update_available => info!(
                "Update for {}: {:?} -> {}",
                online_id,
                installed_version,
                candidate.version_number()
            ),
            Some(_) => debug!("{} is up to date", online_id),
            None => debug!("No release of {} for {}", online_id, game_version),
        }

        let mut item = shared.lock().await;
        item.update_checked = true;
        item.update_available = update_available;
        item.latest_version = latest.clone();

        Ok(UpdateInfo {
            update_available,
            installed_version,
            latest,
        })
    }
}

/// Newest release that targets `game_version` and, when the record declares
/// loaders, at least one of them.
pub fn select_latest(
    versions: Vec<ModVersion>,
    game_version: &str,
    loaders: &[LoaderType],
) -> Option<ModVersion> {
    versions
        .into_iter()
        .filter(|v| v.supports_game_version(game_version))
        .filter(|v| loaders.is_empty() || v.supports_any_loader(loaders))
        .max_by_key(|v| v.date_published())
}

/// Whether `candidate` is newer than what is installed.
///
/// Without a known installed version the file hashes decide.
pub fn is_update(installed: Option<&str>, installed_sha1: Option<&str>, candidate: &ModVersion) -> bool {
    let Some(installed) = installed.filter(|v| !v.trim().is_empty()) else {
        return match (installed_sha1, candidate.primary_file().sha1.as_deref()) {
            (Some(local), Some(remote)) => !local.eq_ignore_ascii_case(remote),
            _ => false,
        };
    };

    let installed = normalize_version(installed);
    let latest = normalize_version(candidate.version_number());
    if let (Some(a), Some(b)) = (numeric_parts(&installed), numeric_parts(&latest)) {
        return compare_numeric(&a, &b) == Ordering::Less;
    }

    // Free-form strings such as `mc1.20.1-0.5.8` embed the installed version.
    installed != latest && !latest.contains(&installed)
}

/// `v1.2.3+mc1.20.1` -> `1.2.3`
fn normalize_version(version: &str) -> String {
    let trimmed = version.trim();
    let without_prefix = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    without_prefix
        .split('+')
        .next()
        .unwrap_or(without_prefix)
        .to_ascii_lowercase()
}

fn numeric_parts(version: &str) -> Option<Vec<u64>> {
    version.split('.').map(|p| p.parse().ok()).collect()
}

fn compare_numeric(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
