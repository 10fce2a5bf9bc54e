use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::error::{ModError, ModResult};
use crate::core::mods::update::select_latest;
use crate::core::mods::{LoaderType, ModItem, SharedMod};
use crate::core::registry::{ModVersion, SearchQuery};
use crate::core::state::{AppState, ModManagerSettings};

#[derive(Debug, Clone, Serialize)]
pub struct ModInfo {
    pub file_name: String,
    pub file_path: String,
    pub disabled: bool,
    pub display_name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub homepage: Option<String>,
    pub sources: Option<String>,
    pub icon_url: Option<String>,
    pub loaders: Vec<LoaderType>,
    pub online_id: Option<String>,
    pub author: Option<String>,
    pub downloads: Option<u64>,
    pub update_available: bool,
    pub latest_version: Option<String>,
}

impl From<&ModItem> for ModInfo {
    fn from(item: &ModItem) -> Self {
        let remote = item.remote.as_ref();
        Self {
            file_name: item.file_name().to_string(),
            file_path: item.file_path().to_string_lossy().to_string(),
            disabled: item.disabled(),
            display_name: item.title(),
            description: item.description.clone(),
            version: item.version.clone(),
            homepage: item.homepage.clone(),
            sources: item.sources.clone(),
            icon_url: item.icon_url.clone(),
            loaders: item.loaders(),
            online_id: remote.map(|r| r.online_id.clone()),
            author: remote.and_then(|r| r.author.clone()),
            downloads: remote.and_then(|r| r.downloads),
            update_available: item.update_available,
            latest_version: item
                .latest_version
                .as_ref()
                .map(|v| v.version_number().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub id: Option<String>,
    pub name: String,
    pub version_number: String,
    pub date_published: String,
    pub game_versions: Vec<String>,
    pub loaders: Vec<String>,
    pub file_name: String,
    pub url: String,
}

impl From<&ModVersion> for VersionInfo {
    fn from(version: &ModVersion) -> Self {
        Self {
            id: version.id().map(str::to_string),
            name: version.name().to_string(),
            version_number: version.version_number().to_string(),
            date_published: version.date_published().to_rfc3339(),
            game_versions: version.game_versions().to_vec(),
            loaders: version.loaders().to_vec(),
            file_name: version.primary_file().file_name.clone(),
            url: version.primary_file().url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModUpdateInfo {
    pub file_name: String,
    pub update_available: bool,
    pub installed_version: Option<String>,
    pub latest: Option<VersionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    pub file_name: String,
    pub path: String,
    pub size: u64,
}

impl BackupInfo {
    async fn from_path(path: PathBuf) -> Self {
        let size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_string_lossy().to_string(),
            size,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchModsPayload {
    pub query: String,
    pub game_version: Option<String>,
    pub loader: Option<LoaderType>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadModPayload {
    pub profile: String,
    pub project_id: String,
    pub version_id: Option<String>,
    pub game_version: Option<String>,
    pub loader: Option<LoaderType>,
}

/// Find an installed mod by file name or basename.
async fn locate_mod(state: &AppState, profile: &str, name: &str) -> ModResult<SharedMod> {
    let mods = state.mod_service.scan_mods_for_profile(profile).await?;
    for shared in mods {
        let matches = {
            let item = shared.lock().await;
            item.file_name() == name || item.basename() == name
        };
        if matches {
            return Ok(shared);
        }
    }

    let dir = state
        .mod_service
        .existing_mods_folder_for_profile(profile)
        .ok_or_else(|| ModError::ModsFolderNotFound(profile.to_string()))?;
    Err(ModError::ModFileMissing(dir.join(name)))
}

async fn snapshot(shared: &SharedMod) -> ModInfo {
    ModInfo::from(&*shared.lock().await)
}

pub async fn scan_mods(
    state: &AppState,
    profile: &str,
    with_metadata: bool,
) -> ModResult<Vec<ModInfo>> {
    let mods = state.mod_service.scan_mods_for_profile(profile).await?;

    if with_metadata {
        let results = state.mod_service.fetch_metadata_for_mods(&mods).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("{} of {} mods have filename-only metadata", failed, mods.len());
        }
    }

    let mut infos = Vec::with_capacity(mods.len());
    for shared in &mods {
        infos.push(snapshot(shared).await);
    }
    Ok(infos)
}

pub async fn fetch_mod_metadata(state: &AppState, profile: &str, name: &str) -> ModResult<ModInfo> {
    let shared = locate_mod(state, profile, name).await?;
    if let Err(e) = state.mod_service.fetch_metadata_for_mod(&shared).await {
        warn!("Metadata for '{}' incomplete: {}", name, e);
    }
    Ok(snapshot(&shared).await)
}

pub async fn toggle_mod(state: &AppState, profile: &str, name: &str) -> ModResult<ModInfo> {
    let shared = locate_mod(state, profile, name).await?;
    let mut item = shared.lock().await;
    state.mod_service.toggle_enable_for_mod(&mut item).await?;
    Ok(ModInfo::from(&*item))
}

pub async fn delete_mod(
    state: &AppState,
    profile: &str,
    name: &str,
    backup_first: bool,
) -> ModResult<Option<BackupInfo>> {
    let shared = locate_mod(state, profile, name).await?;
    let item = shared.lock().await.clone();

    let backup = if backup_first {
        Some(backup_item(state, &item).await?)
    } else {
        None
    };
    state.mod_service.delete_mod(&item).await?;
    Ok(backup)
}

pub async fn search_mods(state: &AppState, payload: SearchModsPayload) -> ModResult<Vec<ModInfo>> {
    let query = SearchQuery {
        query: payload.query,
        game_version: payload.game_version,
        loader: payload.loader.map(|l| l.to_string()),
        limit: payload.limit,
    };
    let results = state.mod_service.search_mods(&query).await?;
    Ok(results.iter().map(ModInfo::from).collect())
}

pub async fn get_mod_versions(
    state: &AppState,
    project_id: &str,
    game_version: Option<&str>,
    loader: Option<LoaderType>,
) -> ModResult<Vec<VersionInfo>> {
    let versions = state
        .mod_service
        .registry()
        .get_versions_for_mod(project_id)
        .await?;

    Ok(versions
        .iter()
        .filter(|v| game_version.map_or(true, |gv| v.supports_game_version(gv)))
        .filter(|v| loader.map_or(true, |l| v.supports_any_loader(&[l])))
        .map(VersionInfo::from)
        .collect())
}

/// Pick a release of `project_id` and install it into the profile.
pub async fn download_mod(state: &AppState, payload: DownloadModPayload) -> ModResult<ModInfo> {
    let registry = state.mod_service.registry();
    let project = registry.get_project(&payload.project_id).await?;
    let versions = registry.get_versions_for_mod(&payload.project_id).await?;
    let loaders: Vec<LoaderType> = payload.loader.into_iter().collect();

    let chosen = match (&payload.version_id, &payload.game_version) {
        (Some(version_id), _) => versions
            .into_iter()
            .find(|v| v.id() == Some(version_id.as_str()) || v.version_number() == version_id),
        (None, Some(game_version)) => select_latest(versions, game_version, &loaders),
        (None, None) => versions
            .into_iter()
            .filter(|v| loaders.is_empty() || v.supports_any_loader(&loaders))
            .max_by_key(|v| v.date_published()),
    }
    .ok_or_else(|| ModError::ModNotFound(format!("{} (no matching release)", project.title)))?;

    info!(
        "Installing {} {} into '{}'",
        project.title,
        chosen.version_number(),
        payload.profile
    );
    let mut item = ModItem::from_search_hit(&project);
    item.select_version(&chosen);
    let installed = state.mod_service.download_mod(&item, &payload.profile).await?;
    Ok(snapshot(&installed).await)
}

async fn check_one(
    state: &AppState,
    shared: &SharedMod,
    game_version: &str,
) -> ModResult<ModUpdateInfo> {
    let needs_identity = {
        let item = shared.lock().await;
        item.online_id().is_none()
    };
    if needs_identity {
        let _ = state.mod_service.fetch_metadata_for_mod(shared).await;
    }

    let info = state
        .update_checker
        .check_updates_for_mod(shared, game_version)
        .await?;
    let file_name = shared.lock().await.file_name().to_string();
    Ok(ModUpdateInfo {
        file_name,
        update_available: info.update_available,
        installed_version: info.installed_version,
        latest: info.latest.as_ref().map(VersionInfo::from),
    })
}

pub async fn check_mod_update(
    state: &AppState,
    profile: &str,
    name: &str,
    game_version: &str,
) -> ModResult<ModUpdateInfo> {
    let shared = locate_mod(state, profile, name).await?;
    check_one(state, &shared, game_version).await
}

/// Check every mod of a profile. Mods unknown to the registry are skipped.
pub async fn check_mod_updates(
    state: &AppState,
    profile: &str,
    game_version: &str,
) -> ModResult<Vec<ModUpdateInfo>> {
    let mods = state.mod_service.scan_mods_for_profile(profile).await?;
    let mut reports = Vec::new();
    for shared in &mods {
        match check_one(state, shared, game_version).await {
            Ok(report) => reports.push(report),
            Err(ModError::NotResolvable(name)) => {
                info!("Skipping update check for '{}': not on the registry", name)
            }
            Err(e) => warn!("Update check failed: {}", e),
        }
    }
    Ok(reports)
}

async fn backup_item(state: &AppState, item: &ModItem) -> ModResult<BackupInfo> {
    let path = state.backups.backup_mod(item).await?;
    if let Some(keep) = state.settings.max_backups_per_mod {
        state.backups.prune_backups_for_mod(item, keep.max(1)).await?;
    }
    Ok(BackupInfo::from_path(path).await)
}

pub async fn backup_mod(state: &AppState, profile: &str, name: &str) -> ModResult<BackupInfo> {
    let shared = locate_mod(state, profile, name).await?;
    let item = shared.lock().await.clone();
    backup_item(state, &item).await
}

/// Record for `name` even when the file was deleted, so it can be restored.
async fn restorable_item(state: &AppState, profile: &str, name: &str) -> ModResult<ModItem> {
    match locate_mod(state, profile, name).await {
        Ok(shared) => Ok(shared.lock().await.clone()),
        Err(ModError::ModFileMissing(path)) => Ok(ModItem::from_path(path)),
        Err(ModError::ModsFolderNotFound(_)) => Ok(ModItem::from_path(
            state.mod_service.layout().default_mods_dir(profile).join(name),
        )),
        Err(e) => Err(e),
    }
}

pub async fn list_mod_backups(
    state: &AppState,
    profile: &str,
    name: &str,
) -> ModResult<Vec<BackupInfo>> {
    let item = restorable_item(state, profile, name).await?;
    let mut infos = Vec::new();
    for path in state.backups.get_backup_files_for_mod(&item).await? {
        infos.push(BackupInfo::from_path(path).await);
    }
    Ok(infos)
}

/// Restore `backup`, or the newest backup when none is given.
pub async fn restore_mod_backup(
    state: &AppState,
    profile: &str,
    name: &str,
    backup: Option<PathBuf>,
) -> ModResult<BackupInfo> {
    let item = restorable_item(state, profile, name).await?;
    let backup = match backup {
        Some(path) => path,
        None => state
            .backups
            .get_backup_files_for_mod(&item)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ModError::BackupNotFound(state.backups.backup_dir_for_mod(&item)))?,
    };

    if let Some(parent) = item.file_path().parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ModError::io(parent, e))?;
    }
    state.backups.restore_mod_from_backup(&backup, &item).await?;
    Ok(BackupInfo::from_path(backup).await)
}

pub fn get_settings(state: &AppState) -> ModManagerSettings {
    state.settings.clone()
}

pub fn update_settings(
    state: &mut AppState,
    settings: ModManagerSettings,
) -> ModResult<ModManagerSettings> {
    state.apply_settings(settings)?;
    info!("Settings saved to {:?}", state.settings_path());
    Ok(state.settings.clone())
}
