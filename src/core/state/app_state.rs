use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::downloader::Downloader;
use crate::core::error::{ModError, ModResult};
use crate::core::http::build_http_client;
use crate::core::mods::{IconCache, ModBackupManager, ModService, ModUpdateChecker, ProfileLayout};
use crate::core::registry::{build_registry, RegistryBackend};

const APP_DIR_NAME: &str = "AmethystMods";
const SETTINGS_FILE: &str = "mod_manager_settings.json";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModManagerSettings {
    /// Game directory holding `instances/`, `profiles/`, `versions/` and `mods/`.
    /// `None` means the platform's standard location.
    pub game_dir: Option<PathBuf>,
    pub online_search_enabled: bool,
    pub registry: RegistryBackend,
    pub request_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub metadata_concurrency: usize,
    /// Backups kept per mod after each new backup. `None` keeps all.
    pub max_backups_per_mod: Option<usize>,
}

impl Default for ModManagerSettings {
    fn default() -> Self {
        Self {
            game_dir: None,
            online_search_enabled: false,
            registry: RegistryBackend::default(),
            request_timeout_secs: 30,
            download_timeout_secs: 300,
            metadata_concurrency: 8,
            max_backups_per_mod: None,
        }
    }
}

impl ModManagerSettings {
    pub fn resolved_game_dir(&self) -> PathBuf {
        self.game_dir.clone().unwrap_or_else(default_game_dir)
    }
}

/// Everything the command layer needs, built once from settings.
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: ModManagerSettings,
    pub http_client: Client,
    pub mod_service: Arc<ModService>,
    pub update_checker: Arc<ModUpdateChecker>,
    pub backups: Arc<ModBackupManager>,
}

impl AppState {
    pub fn new(data_dir: PathBuf) -> ModResult<Self> {
        std::fs::create_dir_all(&data_dir).map_err(|e| ModError::io(&data_dir, e))?;
        let settings = load_settings_from_disk(&data_dir).unwrap_or_default();
        let http_client = build_http_client(CONNECT_TIMEOUT)?;
        Ok(Self::assemble(data_dir, settings, http_client))
    }

    fn assemble(data_dir: PathBuf, settings: ModManagerSettings, http_client: Client) -> Self {
        let request_timeout = Duration::from_secs(settings.request_timeout_secs.max(1));
        let download_timeout = Duration::from_secs(settings.download_timeout_secs.max(1));

        let registry = build_registry(&settings.registry, http_client.clone(), request_timeout);
        let downloader = Arc::new(Downloader::new(http_client.clone(), download_timeout));
        let icon_cache = IconCache::new(
            data_dir.join("icon_cache"),
            http_client.clone(),
            request_timeout,
        );

        let mod_service = ModService::new(
            ProfileLayout::new(settings.resolved_game_dir()),
            registry.clone(),
            downloader,
            icon_cache,
        )
        .with_metadata_concurrency(settings.metadata_concurrency);
        mod_service.set_online_search_enabled(settings.online_search_enabled);

        info!(
            "Mod manager ready (data: {:?}, game: {:?})",
            data_dir,
            settings.resolved_game_dir()
        );

        Self {
            mod_service: Arc::new(mod_service),
            update_checker: Arc::new(ModUpdateChecker::new(registry)),
            backups: Arc::new(ModBackupManager::new(data_dir.join("backups"))),
            data_dir,
            settings,
            http_client,
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn save_settings(&self) -> ModResult<()> {
        let path = self.settings_path();
        let json = serde_json::to_string_pretty(&self.settings)?;
        std::fs::write(&path, json).map_err(|e| ModError::io(&path, e))
    }

    /// Persist new settings and rebuild the services that depend on them.
    pub fn apply_settings(&mut self, settings: ModManagerSettings) -> ModResult<()> {
        let rebuilt = Self::assemble(self.data_dir.clone(), settings, self.http_client.clone());
        *self = rebuilt;
        self.save_settings()
    }
}

fn load_settings_from_disk(data_dir: &Path) -> Option<ModManagerSettings> {
    let path = data_dir.join(SETTINGS_FILE);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!("Ignoring unreadable settings {:?}: {}", path, e);
            None
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn default_game_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".minecraft")
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("minecraft")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".minecraft")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(state.settings, ModManagerSettings::default());
        assert!(!state.mod_service.online_search_enabled());
    }

    #[test]
    fn corrupt_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ not json").unwrap();
        let state = AppState::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(state.settings.request_timeout_secs, 30);
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{ "online_search_enabled": true, "metadata_concurrency": 2 }"#,
        )
        .unwrap();
        let state = AppState::new(dir.path().to_path_buf()).unwrap();
        assert!(state.settings.online_search_enabled);
        assert_eq!(state.settings.metadata_concurrency, 2);
        assert_eq!(state.settings.download_timeout_secs, 300);
        assert!(state.mod_service.online_search_enabled());
    }

    #[test]
    fn applied_settings_are_persisted_and_live() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = AppState::new(dir.path().to_path_buf()).unwrap();
        let game = dir.path().join("game");

        state
            .apply_settings(ModManagerSettings {
                game_dir: Some(game.clone()),
                online_search_enabled: true,
                ..ModManagerSettings::default()
            })
            .unwrap();

        assert_eq!(state.mod_service.layout().game_dir(), game.as_path());
        assert!(state.mod_service.online_search_enabled());
        let reloaded = AppState::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.settings.game_dir, Some(game));
    }
}
