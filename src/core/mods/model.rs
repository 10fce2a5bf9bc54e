use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;

use crate::core::error::{ModError, ModResult};
use crate::core::registry::{ModVersion, SearchHit, VersionFile};

/// Package extension of an installed mod.
pub const MOD_EXTENSION: &str = ".jar";
/// Suffix appended after [`MOD_EXTENSION`] to mark a mod as inactive.
pub const DISABLED_SUFFIX: &str = ".disabled";

/// A record observed by several tasks. Writers take the lock and apply a
/// whole [`MetadataPatch`] so readers never see half-updated fields.
pub type SharedMod = Arc<Mutex<ModItem>>;

/// Mod loaders a package can target. Detected from manifests or registry data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoaderType {
    Fabric,
    Forge,
    NeoForge,
    Quilt,
}

impl LoaderType {
    pub fn from_registry_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "fabric" => Some(LoaderType::Fabric),
            "forge" => Some(LoaderType::Forge),
            "neoforge" => Some(LoaderType::NeoForge),
            "quilt" => Some(LoaderType::Quilt),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoaderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderType::Fabric => write!(f, "fabric"),
            LoaderType::Forge => write!(f, "forge"),
            LoaderType::NeoForge => write!(f, "neoforge"),
            LoaderType::Quilt => write!(f, "quilt"),
        }
    }
}

/// Registry-side identity, present only for records matched online.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteIdentity {
    pub online_id: String,
    pub slug: Option<String>,
    pub author: Option<String>,
    pub downloads: Option<u64>,
    pub likes: Option<u64>,
    pub last_updated: Option<String>,
    pub categories: Vec<String>,
}

/// Resolved metadata waiting to be merged into a record.
///
/// `None` fields leave the record untouched; loader flags are OR-ed in.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub homepage: Option<String>,
    pub sources: Option<String>,
    pub icon_url: Option<String>,
    pub is_fabric: bool,
    pub is_forge: bool,
    pub is_neoforge: bool,
    pub remote: Option<RemoteIdentity>,
}

/// An installed (or installable) mod.
///
/// Local records come from a scan of the mods folder; online records are
/// materialized from registry search results and have no file yet.
#[derive(Debug, Clone, Default)]
pub struct ModItem {
    file_path: PathBuf,
    file_name: String,
    disabled: bool,
    pub file_sha1: Option<String>,

    // ── Metadata ──
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub homepage: Option<String>,
    pub sources: Option<String>,
    pub icon_url: Option<String>,
    pub is_fabric: bool,
    pub is_forge: bool,
    pub is_neoforge: bool,
    pub metadata_loaded: bool,

    // ── Online ──
    pub remote: Option<RemoteIdentity>,
    /// Chosen release handed to the download pipeline.
    pub selected_download: Option<VersionFile>,

    // ── Update check ──
    pub update_checked: bool,
    pub update_available: bool,
    pub latest_version: Option<ModVersion>,
}

impl ModItem {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let mut item = Self::default();
        item.set_file_path(path.into());
        item
    }

    /// Record for a registry search hit. It has no backing file.
    pub fn from_search_hit(hit: &SearchHit) -> Self {
        Self {
            display_name: Some(hit.title.clone()),
            description: hit.description.clone(),
            icon_url: hit.icon_url.clone(),
            is_fabric: hit.loaders.iter().any(|l| l == "fabric"),
            is_forge: hit.loaders.iter().any(|l| l == "forge"),
            is_neoforge: hit.loaders.iter().any(|l| l == "neoforge"),
            metadata_loaded: true,
            remote: Some(hit.to_identity()),
            ..Self::default()
        }
    }

    pub fn into_shared(self) -> SharedMod {
        Arc::new(Mutex::new(self))
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// Point the record at a new file. Keeps `file_name` and `disabled` in sync.
    pub fn set_file_path(&mut self, path: PathBuf) {
        self.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.file_path = path;
        self.refresh_disabled_flag();
    }

    pub fn refresh_disabled_flag(&mut self) {
        self.disabled = is_disabled_name(&self.file_name);
    }

    /// File name without the disable marker and the package extension.
    pub fn basename(&self) -> String {
        basename_of(&self.file_name)
    }

    /// Name to show when no manifest or registry name is known.
    pub fn title(&self) -> String {
        self.display_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.basename())
    }

    /// The path this file would have after an enable/disable toggle.
    pub fn toggled_path(&self) -> PathBuf {
        let toggled = if self.disabled {
            self.file_name
                .strip_suffix(DISABLED_SUFFIX)
                .unwrap_or(&self.file_name)
                .to_string()
        } else {
            format!("{}{}", self.file_name, DISABLED_SUFFIX)
        };
        self.file_path.with_file_name(toggled)
    }

    pub fn online_id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.online_id.as_str())
    }

    pub fn loaders(&self) -> Vec<LoaderType> {
        let mut loaders = Vec::new();
        if self.is_fabric {
            loaders.push(LoaderType::Fabric);
        }
        if self.is_forge {
            loaders.push(LoaderType::Forge);
        }
        if self.is_neoforge {
            loaders.push(LoaderType::NeoForge);
        }
        loaders
    }

    /// Whether every field a local archive can provide is already filled.
    pub fn has_complete_local_metadata(&self) -> bool {
        self.display_name.is_some()
            && self.description.is_some()
            && self.version.is_some()
            && self.icon_url.is_some()
    }

    pub fn apply_patch(&mut self, patch: MetadataPatch) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                *slot = Some(value);
            }
        }

        fill(&mut self.display_name, patch.display_name);
        fill(&mut self.description, patch.description);
        fill(&mut self.version, patch.version);
        fill(&mut self.homepage, patch.homepage);
        fill(&mut self.sources, patch.sources);
        fill(&mut self.icon_url, patch.icon_url);
        self.is_fabric |= patch.is_fabric;
        self.is_forge |= patch.is_forge;
        self.is_neoforge |= patch.is_neoforge;
        if let Some(remote) = patch.remote {
            self.remote = Some(remote);
        }
    }

    /// Last-resort metadata derived from the file name.
    pub fn apply_filename_defaults(&mut self) {
        if self.display_name.is_none() {
            self.display_name = Some(self.basename());
        }
        self.metadata_loaded = true;
    }

    pub fn select_version(&mut self, version: &ModVersion) {
        self.selected_download = Some(version.primary_file().clone());
    }

    pub fn reset_update_check_status(&mut self) {
        self.update_checked = false;
        self.update_available = false;
        self.latest_version = None;
    }

    /// SHA-1 of the backing file, computed on first use.
    pub fn ensure_sha1(&mut self) -> ModResult<&str> {
        if self.file_sha1.is_none() {
            self.file_sha1 = Some(sha1_file(&self.file_path)?);
        }
        Ok(self.file_sha1.as_deref().unwrap_or_default())
    }
}

pub fn is_disabled_name(file_name: &str) -> bool {
    file_name.ends_with(DISABLED_SUFFIX)
}

/// Whether a directory entry looks like an installed package.
pub fn is_mod_file_name(file_name: &str) -> bool {
    let active = file_name.strip_suffix(DISABLED_SUFFIX).unwrap_or(file_name);
    active.len() > MOD_EXTENSION.len() && active.ends_with(MOD_EXTENSION)
}

pub fn basename_of(file_name: &str) -> String {
    let active = file_name.strip_suffix(DISABLED_SUFFIX).unwrap_or(file_name);
    active
        .strip_suffix(MOD_EXTENSION)
        .unwrap_or(active)
        .to_string()
}

/// Streaming SHA-1 of a file on disk, hex encoded.
pub fn sha1_file(path: &Path) -> ModResult<String> {
    let mut file = std::fs::File::open(path).map_err(|source| ModError::io(path, source))?;
    let mut hasher = Sha1::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| ModError::io(path, source))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_flag_follows_file_name() {
        for (name, disabled) in [
            ("sodium.jar", false),
            ("sodium.jar.disabled", true),
            ("weird.disabled", true),
            ("notes.txt", false),
        ] {
            let item = ModItem::from_path(PathBuf::from("/mods").join(name));
            assert_eq!(item.disabled(), disabled, "{name}");
        }
    }

    #[test]
    fn basename_strips_marker_and_extension() {
        assert_eq!(basename_of("sample.jar"), "sample");
        assert_eq!(basename_of("other.jar.disabled"), "other");
        assert_eq!(basename_of("fabric-api-0.92.jar"), "fabric-api-0.92");
        assert_eq!(basename_of("readme"), "readme");
    }

    #[test]
    fn basename_is_stable_under_rederivation() {
        for name in ["a.jar", "b.jar.disabled", "c.jar.jar"] {
            let once = basename_of(name);
            let again = basename_of(&format!("{once}{MOD_EXTENSION}"));
            assert_eq!(once, again);
        }
    }

    #[test]
    fn toggled_path_round_trips() {
        let mut item = ModItem::from_path("/mods/lithium.jar");
        let disabled_path = item.toggled_path();
        assert_eq!(disabled_path, PathBuf::from("/mods/lithium.jar.disabled"));

        item.set_file_path(disabled_path);
        assert!(item.disabled());
        assert_eq!(item.toggled_path(), PathBuf::from("/mods/lithium.jar"));
    }

    #[test]
    fn recognizes_mod_files() {
        assert!(is_mod_file_name("a.jar"));
        assert!(is_mod_file_name("a.jar.disabled"));
        assert!(!is_mod_file_name(".jar"));
        assert!(!is_mod_file_name("a.zip"));
        assert!(!is_mod_file_name("a.jar.part"));
    }

    #[test]
    fn patch_fills_only_present_fields() {
        let mut item = ModItem::from_path("/mods/x.jar");
        item.version = Some("1.0".into());
        item.apply_patch(MetadataPatch {
            display_name: Some("X".into()),
            version: Some(String::new()),
            is_forge: true,
            ..Default::default()
        });
        assert_eq!(item.display_name.as_deref(), Some("X"));
        assert_eq!(item.version.as_deref(), Some("1.0"));
        assert!(item.is_forge);
        assert!(!item.is_fabric);
    }

    #[test]
    fn reset_clears_update_state() {
        let mut item = ModItem::from_path("/mods/x.jar");
        item.update_checked = true;
        item.update_available = true;
        item.reset_update_check_status();
        assert!(!item.update_checked);
        assert!(!item.update_available);
        assert!(item.latest_version.is_none());
    }

    #[test]
    fn filename_defaults_keep_existing_name() {
        let mut item = ModItem::from_path("/mods/x.jar");
        item.apply_filename_defaults();
        assert_eq!(item.display_name.as_deref(), Some("x"));
        assert!(item.metadata_loaded);
    }
}
