// ─── Archive Metadata Extractor ───
// Reads loader manifests out of a mod jar. Synchronous; callers in async
// context run it through `spawn_blocking`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use super::model::MetadataPatch;
use crate::core::error::{ModError, ModResult};

/// Loader family A.
pub const FABRIC_MANIFEST: &str = "fabric.mod.json";
/// Loader family B.
pub const FORGE_MANIFEST: &str = "META-INF/mods.toml";
/// Loader family C.
pub const NEOFORGE_MANIFEST: &str = "META-INF/neoforge.mods.toml";
const JAR_MANIFEST: &str = "META-INF/MANIFEST.MF";
const JAR_VERSION_PLACEHOLDER: &str = "${file.jarVersion}";

/// What a jar says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveMetadata {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub homepage: Option<String>,
    pub sources: Option<String>,
    /// Path of the icon inside the archive.
    pub icon_path: Option<String>,
    pub is_fabric: bool,
    pub is_forge: bool,
    pub is_neoforge: bool,
}

impl ArchiveMetadata {
    /// No manifest matched.
    pub fn is_empty(&self) -> bool {
        !self.is_fabric && !self.is_forge && !self.is_neoforge
    }

    pub fn into_patch(self, icon_url: Option<String>) -> MetadataPatch {
        MetadataPatch {
            display_name: self.display_name,
            description: self.description,
            version: self.version,
            homepage: self.homepage,
            sources: self.sources,
            icon_url,
            is_fabric: self.is_fabric,
            is_forge: self.is_forge,
            is_neoforge: self.is_neoforge,
            remote: None,
        }
    }

    fn merge_fields(&mut self, fields: ManifestFields) {
        fn or_fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
            }
        }

        or_fill(&mut self.display_name, fields.display_name);
        or_fill(&mut self.description, fields.description);
        or_fill(&mut self.version, fields.version);
        or_fill(&mut self.homepage, fields.homepage);
        or_fill(&mut self.sources, fields.sources);
        or_fill(
            &mut self.icon_path,
            fields.icon_path.map(|p| p.trim_start_matches('/').to_string()),
        );
    }
}

/// Descriptive fields common to every manifest flavor.
#[derive(Debug, Default)]
struct ManifestFields {
    display_name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    homepage: Option<String>,
    sources: Option<String>,
    icon_path: Option<String>,
}

// ── fabric.mod.json ─────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FabricManifest {
    name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    #[serde(default)]
    contact: FabricContact,
    icon: Option<FabricIcon>,
}

#[derive(Debug, Default, Deserialize)]
struct FabricContact {
    homepage: Option<String>,
    sources: Option<String>,
}

/// `"icon"` is either a path or a map of pixel size to path.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FabricIcon {
    Path(String),
    Sizes(BTreeMap<String, String>),
}

impl FabricIcon {
    fn best_path(self) -> Option<String> {
        match self {
            FabricIcon::Path(path) => Some(path),
            FabricIcon::Sizes(sizes) => sizes
                .into_iter()
                .max_by_key(|(size, _)| size.parse::<u32>().unwrap_or(0))
                .map(|(_, path)| path),
        }
    }
}

fn parse_fabric_manifest(raw: &str) -> ModResult<ManifestFields> {
    // Fabric Loader accepts raw newlines inside strings, serde_json does not.
    let manifest: FabricManifest = match serde_json::from_str(raw) {
        Ok(manifest) => manifest,
        Err(_) => serde_json::from_str(&raw.replace(['\n', '\r', '\t'], " "))?,
    };

    Ok(ManifestFields {
        display_name: manifest.name,
        description: manifest.description,
        version: manifest.version,
        homepage: manifest.contact.homepage,
        sources: manifest.contact.sources,
        icon_path: manifest.icon.and_then(FabricIcon::best_path),
    })
}

// ── mods.toml / neoforge.mods.toml ──────────────────────

#[derive(Debug, Deserialize)]
struct ModsToml {
    #[serde(default)]
    mods: Vec<ModsTomlEntry>,
    #[serde(rename = "logoFile")]
    logo_file: Option<String>,
    #[serde(rename = "issueTrackerURL")]
    issue_tracker_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModsTomlEntry {
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    description: Option<String>,
    version: Option<String>,
    #[serde(rename = "displayURL")]
    display_url: Option<String>,
    #[serde(rename = "logoFile")]
    logo_file: Option<String>,
}

fn parse_mods_toml(raw: &str, jar_version: Option<&str>) -> ModResult<ManifestFields> {
    let manifest: ModsToml = toml::from_str(raw)?;
    let first = manifest.mods.into_iter().next();

    let (display_name, description, version, homepage, logo) = match first {
        Some(entry) => (
            entry.display_name,
            entry.description,
            entry.version,
            entry.display_url,
            entry.logo_file,
        ),
        None => (None, None, None, None, None),
    };

    let version = version.and_then(|v| {
        if v.contains(JAR_VERSION_PLACEHOLDER) {
            jar_version.map(|jv| v.replace(JAR_VERSION_PLACEHOLDER, jv))
        } else {
            Some(v)
        }
    });

    Ok(ManifestFields {
        display_name,
        description,
        version,
        homepage,
        sources: manifest.issue_tracker_url,
        icon_path: logo.or(manifest.logo_file),
    })
}

/// `Implementation-Version` from `META-INF/MANIFEST.MF`.
fn implementation_version(manifest_mf: &str) -> Option<String> {
    manifest_mf.lines().find_map(|line| {
        line.strip_prefix("Implementation-Version:")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

// ── Extraction ──────────────────────────────────────────

fn read_entry_string<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<String> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return None,
        Err(e) => {
            warn!("Cannot open {} in archive: {}", name, e);
            return None;
        }
    };

    let mut bytes = Vec::new();
    if let Err(e) = entry.read_to_end(&mut bytes) {
        warn!("Cannot read {} in archive: {}", name, e);
        return None;
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Inspect the loader manifests of a mod archive.
///
/// Every manifest present sets its loader flag. Descriptive fields are taken
/// from the first manifest providing them, in the order Fabric, NeoForge,
/// Forge. A manifest that fails to parse still sets its flag.
pub fn extract_metadata(path: &Path) -> ModResult<ArchiveMetadata> {
    let file = File::open(path).map_err(|source| ModError::io(path, source))?;
    let mut archive = ZipArchive::new(file)?;

    let fabric = read_entry_string(&mut archive, FABRIC_MANIFEST);
    let neoforge = read_entry_string(&mut archive, NEOFORGE_MANIFEST);
    let forge = read_entry_string(&mut archive, FORGE_MANIFEST);

    let mut metadata = ArchiveMetadata {
        is_fabric: fabric.is_some(),
        is_forge: forge.is_some(),
        is_neoforge: neoforge.is_some(),
        ..ArchiveMetadata::default()
    };

    if let Some(raw) = fabric {
        match parse_fabric_manifest(&raw) {
            Ok(fields) => metadata.merge_fields(fields),
            Err(e) => warn!("Malformed {} in {:?}: {}", FABRIC_MANIFEST, path, e),
        }
    }

    if neoforge.is_some() || forge.is_some() {
        let jar_version = read_entry_string(&mut archive, JAR_MANIFEST)
            .as_deref()
            .and_then(implementation_version);

        for (entry, raw) in [(NEOFORGE_MANIFEST, neoforge), (FORGE_MANIFEST, forge)] {
            let Some(raw) = raw else { continue };
            match parse_mods_toml(&raw, jar_version.as_deref()) {
                Ok(fields) => metadata.merge_fields(fields),
                Err(e) => warn!("Malformed {} in {:?}: {}", entry, path, e),
            }
        }
    }

    debug!(
        "Extracted {:?}: fabric={} forge={} neoforge={}",
        path, metadata.is_fabric, metadata.is_forge, metadata.is_neoforge
    );
    Ok(metadata)
}

/// Raw bytes of one archive entry, e.g. an embedded icon.
pub fn read_archive_entry(path: &Path, entry: &str) -> ModResult<Vec<u8>> {
    let file = File::open(path).map_err(|source| ModError::io(path, source))?;
    let mut archive = ZipArchive::new(file)?;
    let mut file = archive.by_name(entry)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|source| ModError::io(path, source))?;
    Ok(bytes)
}
