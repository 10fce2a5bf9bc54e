use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::archive::{extract_metadata, read_archive_entry};
use super::icon_cache::{archive_icon_key, IconCache};
use super::model::{is_mod_file_name, sha1_file, MetadataPatch, ModItem, SharedMod};
use super::profile::ProfileLayout;
use crate::core::downloader::{DownloadEntry, Downloader};
use crate::core::error::{ModError, ModResult};
use crate::core::registry::{ModRegistry, ModVersion, SearchHit, SearchQuery};

const NAME_SEARCH_LIMIT: u32 = 5;
const LOADER_TOKENS: [&str; 4] = ["fabric", "forge", "neoforge", "quilt"];

/// Which sources contributed to a record's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    Local,
    Remote,
    LocalAndRemote,
}

/// Patches to apply in order, plus what produced them.
#[derive(Default)]
struct Resolution {
    patches: Vec<MetadataPatch>,
    local: bool,
    remote: bool,
    sha1: Option<String>,
}

impl Resolution {
    fn source(&self) -> Option<MetadataSource> {
        match (self.local, self.remote) {
            (true, true) => Some(MetadataSource::LocalAndRemote),
            (true, false) => Some(MetadataSource::Local),
            (false, true) => Some(MetadataSource::Remote),
            (false, false) => None,
        }
    }
}

/// Scans, mutates, enriches and installs the mods of a game profile.
pub struct ModService {
    layout: ProfileLayout,
    registry: Arc<dyn ModRegistry>,
    downloader: Arc<Downloader>,
    icon_cache: IconCache,
    online_search_enabled: AtomicBool,
    metadata_concurrency: usize,
}

impl ModService {
    pub fn new(
        layout: ProfileLayout,
        registry: Arc<dyn ModRegistry>,
        downloader: Arc<Downloader>,
        icon_cache: IconCache,
    ) -> Self {
        Self {
            layout,
            registry,
            downloader,
            icon_cache,
            online_search_enabled: AtomicBool::new(false),
            metadata_concurrency: 8,
        }
    }

    pub fn with_metadata_concurrency(mut self, n: usize) -> Self {
        self.metadata_concurrency = n.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<dyn ModRegistry> {
        &self.registry
    }

    pub fn layout(&self) -> &ProfileLayout {
        &self.layout
    }

    /// `true`: ask the registry before reading the jar. Defaults to `false`.
    pub fn online_search_enabled(&self) -> bool {
        self.online_search_enabled.load(Ordering::Relaxed)
    }

    pub fn set_online_search_enabled(&self, enabled: bool) {
        self.online_search_enabled.store(enabled, Ordering::Relaxed);
    }

    // ── Scanning ────────────────────────────────────────

    pub fn existing_mods_folder_for_profile(&self, profile: &str) -> Option<PathBuf> {
        self.layout.existing_mods_dir(profile)
    }

    /// One record per installed package, sorted by file name.
    ///
    /// A profile without a mods folder yields an empty list.
    pub async fn scan_mods_for_profile(&self, profile: &str) -> ModResult<Vec<SharedMod>> {
        let Some(dir) = self.existing_mods_folder_for_profile(profile) else {
            info!("Profile '{}' has no mods folder", profile);
            return Ok(Vec::new());
        };

        let scan_dir = dir.clone();
        let paths = tokio::task::spawn_blocking(move || list_mod_files(&scan_dir)).await??;
        info!("Found {} mods in {:?}", paths.len(), dir);

        Ok(paths
            .into_iter()
            .map(|path| ModItem::from_path(path).into_shared())
            .collect())
    }

    // ── Local mutation ──────────────────────────────────

    /// Add or remove the disable marker. The record changes only on success.
    pub async fn toggle_enable_for_mod(&self, item: &mut ModItem) -> ModResult<()> {
        let target = item.toggled_path();
        rename_no_clobber(item.file_path(), &target).await?;

        item.set_file_path(target);
        info!(
            "{} '{}'",
            if item.disabled() { "Disabled" } else { "Enabled" },
            item.file_name()
        );
        Ok(())
    }

    /// Remove the backing file. Never backs up on its own.
    pub async fn delete_mod(&self, item: &ModItem) -> ModResult<()> {
        tokio::fs::remove_file(item.file_path())
            .await
            .map_err(|source| ModError::io(item.file_path(), source))?;
        info!("Deleted mod {:?}", item.file_path());
        Ok(())
    }

    // ── Metadata ────────────────────────────────────────

    /// Resolve descriptive metadata for one record.
    ///
    /// Local-first (default): the jar is read; the registry is consulted only
    /// for fields the jar could not provide. Online-first: the registry is
    /// asked first and the jar is read only when that yields nothing. The two
    /// sources never run concurrently.
    ///
    /// When every source fails the record still gets filename defaults and
    /// `MetadataUnavailable` is returned.
    pub async fn fetch_metadata_for_mod(&self, shared: &SharedMod) -> ModResult<MetadataSource> {
        let snapshot = shared.lock().await.clone();

        let resolution = if self.online_search_enabled() {
            self.resolve_online_first(&snapshot).await
        } else {
            self.resolve_local_first(&snapshot).await
        };

        let mut item = shared.lock().await;
        let source = resolution.source();
        for patch in resolution.patches {
            item.apply_patch(patch);
        }
        if resolution.sha1.is_some() && item.file_sha1.is_none() {
            item.file_sha1 = resolution.sha1;
        }
        item.apply_filename_defaults();

        match source {
            Some(source) => {
                debug!("Metadata for '{}' from {:?}", item.file_name(), source);
                Ok(source)
            }
            None => Err(ModError::MetadataUnavailable(item.file_name().to_string())),
        }
    }

    /// Resolve many records concurrently. Results follow input order.
    pub async fn fetch_metadata_for_mods(
        &self,
        mods: &[SharedMod],
    ) -> Vec<ModResult<MetadataSource>> {
        stream::iter(mods)
            .map(|shared| self.fetch_metadata_for_mod(shared))
            .buffered(self.metadata_concurrency)
            .collect()
            .await
    }

    async fn resolve_local_first(&self, snapshot: &ModItem) -> Resolution {
        let mut resolution = Resolution::default();
        let mut preview = snapshot.clone();

        match self.extract_local(snapshot).await {
            Ok(Some(patch)) => {
                preview.apply_patch(patch.clone());
                resolution.patches.push(patch);
                resolution.local = true;
            }
            Ok(None) => debug!("No loader manifest in {:?}", snapshot.file_path()),
            Err(e) => warn!("Local metadata failed for {:?}: {}", snapshot.file_path(), e),
        }

        if resolution.local && preview.has_complete_local_metadata() {
            return resolution;
        }

        match self.lookup_remote(&preview).await {
            Ok(Some((patch, sha1))) => {
                resolution.patches.push(missing_fields_only(patch, &preview));
                resolution.remote = true;
                resolution.sha1 = sha1;
            }
            Ok(None) => debug!("No registry match for '{}'", preview.title()),
            Err(e) => warn!("Registry lookup failed for '{}': {}", preview.title(), e),
        }
        resolution
    }

    async fn resolve_online_first(&self, snapshot: &ModItem) -> Resolution {
        let mut resolution = Resolution::default();

        match self.lookup_remote(snapshot).await {
            Ok(Some((patch, sha1))) => {
                resolution.patches.push(patch);
                resolution.remote = true;
                resolution.sha1 = sha1;
                return resolution;
            }
            Ok(None) => debug!("No registry match for '{}'", snapshot.title()),
            Err(e) => warn!("Registry lookup failed for '{}': {}", snapshot.title(), e),
        }

        match self.extract_local(snapshot).await {
            Ok(Some(patch)) => {
                resolution.patches.push(patch);
                resolution.local = true;
            }
            Ok(None) => debug!("No loader manifest in {:?}", snapshot.file_path()),
            Err(e) => warn!("Local metadata failed for {:?}: {}", snapshot.file_path(), e),
        }
        resolution
    }

    /// Manifest data of the jar. `Ok(None)` when no loader manifest exists.
    async fn extract_local(&self, item: &ModItem) -> ModResult<Option<MetadataPatch>> {
        let path = item.file_path().to_path_buf();
        let extract_path = path.clone();
        let metadata =
            tokio::task::spawn_blocking(move || extract_metadata(&extract_path)).await??;

        if metadata.is_empty() {
            return Ok(None);
        }

        let icon_url = match metadata.icon_path.as_deref() {
            Some(entry) => match self.cache_archive_icon(&path, entry).await {
                Ok(cached) => Some(cached.to_string_lossy().to_string()),
                Err(e) => {
                    warn!("Icon {} unavailable in {:?}: {}", entry, path, e);
                    None
                }
            },
            None => None,
        };

        Ok(Some(metadata.into_patch(icon_url)))
    }

    async fn cache_archive_icon(&self, archive: &Path, entry: &str) -> ModResult<PathBuf> {
        // Hashed on every call: a restore or update may replace the jar in place.
        let hash_path = archive.to_path_buf();
        let sha1 = tokio::task::spawn_blocking(move || sha1_file(&hash_path)).await??;
        let key = archive_icon_key(archive, &sha1, entry);
        let cached = self.icon_cache.path_for_url(&key);
        if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
            return Ok(cached);
        }

        let archive = archive.to_path_buf();
        let entry = entry.to_string();
        let bytes = tokio::task::spawn_blocking(move || read_archive_entry(&archive, &entry)).await??;
        self.icon_cache.store_bytes(&key, &bytes).await
    }

    /// Registry identity for a local record: by file hash, then by name.
    async fn lookup_remote(
        &self,
        item: &ModItem,
    ) -> ModResult<Option<(MetadataPatch, Option<String>)>> {
        let mut hashed = item.clone();
        let sha1 = match tokio::task::spawn_blocking(move || {
            hashed.ensure_sha1().map(str::to_string)
        })
        .await?
        {
            Ok(sha1) => Some(sha1),
            Err(e) => {
                debug!("Cannot hash {:?}: {}", item.file_path(), e);
                None
            }
        };

        if let Some(hash) = &sha1 {
            if let Some(version) = self.registry.version_from_hash(hash).await? {
                if let Some(project_id) = version.project_id() {
                    let hit = self.registry.get_project(project_id).await?;
                    return Ok(Some((remote_patch(&hit, Some(&version)), sha1)));
                }
            }
        }

        let name = item.title();
        let query = SearchQuery {
            query: search_term(&name),
            limit: Some(NAME_SEARCH_LIMIT),
            ..SearchQuery::default()
        };
        let hits = self.registry.search(&query).await?;
        Ok(best_match(&query.query, &hits).map(|hit| (remote_patch(hit, None), sha1)))
    }

    /// Registry search materialized as online records.
    pub async fn search_mods(&self, query: &SearchQuery) -> ModResult<Vec<ModItem>> {
        let hits = self.registry.search(query).await?;
        info!("Search '{}' returned {} results", query.query, hits.len());
        Ok(hits.iter().map(ModItem::from_search_hit).collect())
    }

    // ── Icons ───────────────────────────────────────────

    pub fn icon_cache_path_for_url(&self, url: &str) -> PathBuf {
        self.icon_cache.path_for_url(url)
    }

    pub async fn cache_icon(&self, url: &str) -> ModResult<PathBuf> {
        self.icon_cache.fetch(url).await
    }

    // ── Download & install ──────────────────────────────

    /// Install the release selected on `item` into `profile`.
    ///
    /// The returned record describes the installed file and has already
    /// been through metadata resolution.
    pub async fn download_mod(&self, item: &ModItem, profile: &str) -> ModResult<SharedMod> {
        let selected = item
            .selected_download
            .clone()
            .ok_or_else(|| ModError::NoDownloadSelected(item.title()))?;

        let file_name = Path::new(&selected.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ModError::MalformedRegistryData(format!(
                    "invalid file name '{}'",
                    selected.file_name
                ))
            })?;

        let mods_dir = match self.existing_mods_folder_for_profile(profile) {
            Some(dir) => dir,
            None => {
                let dir = self.layout.default_mods_dir(profile);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| ModError::io(&dir, source))?;
                dir
            }
        };

        let dest = mods_dir.join(&file_name);
        info!("Installing {} into {:?}", file_name, mods_dir);
        self.downloader
            .download_file(&DownloadEntry {
                url: selected.url.clone(),
                dest: dest.clone(),
                sha1: selected.sha1.clone(),
                sha512: selected.sha512.clone(),
            })
            .await?;

        let mut installed = ModItem::from_path(dest);
        installed.remote = item.remote.clone();
        installed.file_sha1 = selected.sha1;
        let shared = installed.into_shared();

        if let Err(e) = self.fetch_metadata_for_mod(&shared).await {
            warn!("Installed {} without metadata: {}", file_name, e);
        }
        Ok(shared)
    }
}

/// Installed packages in `dir`, sorted by file name.
fn list_mod_files(dir: &Path) -> ModResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| ModError::io(dir, source))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                continue;
            }
        };
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().to_string();
        if is_file && is_mod_file_name(&name) {
            paths.push(entry.path());
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn remote_patch(hit: &SearchHit, version: Option<&ModVersion>) -> MetadataPatch {
    let declares = |loader: &str| {
        version
            .map(|v| v.loaders().iter().any(|l| l == loader))
            .unwrap_or(false)
    };
    MetadataPatch {
        display_name: Some(hit.title.clone()),
        description: hit.description.clone(),
        version: version.map(|v| v.version_number().to_string()),
        icon_url: hit.icon_url.clone(),
        is_fabric: declares("fabric"),
        is_forge: declares("forge"),
        is_neoforge: declares("neoforge"),
        remote: Some(hit.to_identity()),
        ..MetadataPatch::default()
    }
}

/// Drop the fields `item` already has so a fallback source never overrides.
fn missing_fields_only(mut patch: MetadataPatch, item: &ModItem) -> MetadataPatch {
    fn keep_if_missing(value: &mut Option<String>, existing: &Option<String>) {
        if existing.is_some() {
            *value = None;
        }
    }

    keep_if_missing(&mut patch.display_name, &item.display_name);
    keep_if_missing(&mut patch.description, &item.description);
    keep_if_missing(&mut patch.version, &item.version);
    keep_if_missing(&mut patch.homepage, &item.homepage);
    keep_if_missing(&mut patch.sources, &item.sources);
    keep_if_missing(&mut patch.icon_url, &item.icon_url);
    patch
}

/// Search text from a file-derived name: `sodium-fabric-0.5.8+mc1.20.1` -> `sodium`.
fn search_term(name: &str) -> String {
    let words: Vec<&str> = name
        .split(['-', '_', '+', ' '])
        .filter(|w| !w.is_empty())
        .take_while(|w| {
            let lower = w.to_ascii_lowercase();
            let starts_numeric = |s: &str| s.chars().next().is_some_and(|c| c.is_ascii_digit());
            !starts_numeric(&lower)
                && !LOADER_TOKENS.contains(&lower.as_str())
                && !(lower.starts_with("mc") && starts_numeric(&lower[2..]))
                && !(lower.starts_with('v') && starts_numeric(&lower[1..]))
        })
        .collect();

    if words.is_empty() {
        name.to_string()
    } else {
        words.join(" ")
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Exact normalized title/slug match, else the first hit whose title
/// contains the query (or the reverse).
fn best_match<'a>(query: &str, hits: &'a [SearchHit]) -> Option<&'a SearchHit> {
    let wanted = normalize_name(query);
    if wanted.is_empty() {
        return None;
    }

    hits.iter()
        .find(|hit| {
            normalize_name(&hit.title) == wanted
                || hit.slug.as_deref().map(normalize_name).as_deref() == Some(wanted.as_str())
        })
        .or_else(|| {
            hits.iter().find(|hit| {
                let title = normalize_name(&hit.title);
                !title.is_empty() && (title.contains(&wanted) || wanted.contains(&title))
            })
        })
}

/// Move `from` to `to`, failing with `AlreadyExists` instead of replacing.
///
/// Linking claims the target atomically. Filesystems without hard links fall
/// back to an existence check followed by a plain rename.
async fn rename_no_clobber(from: &Path, to: &Path) -> ModResult<()> {
    match tokio::fs::hard_link(from, to).await {
        Ok(()) => {
            if let Err(e) = tokio::fs::remove_file(from).await {
                let _ = tokio::fs::remove_file(to).await;
                return Err(ModError::io(from, e));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(ModError::io(to, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ModError::io(from, e)),
        Err(e) => {
            debug!("Hard link {:?} unavailable ({}), renaming", to, e);
            if tokio::fs::try_exists(to).await.unwrap_or(false) {
                return Err(ModError::io(
                    to,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "toggle target already exists",
                    ),
                ));
            }
            tokio::fs::rename(from, to)
                .await
                .map_err(|source| ModError::io(from, source))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::downloader::staging_path;
    use crate::core::mods::archive::FABRIC_MANIFEST;
    use crate::core::test_support::{
        hit, http_response, serve, truncated_response, version, write_jar, FakeRegistry,
    };

    const COMPLETE_FABRIC: &str = r#"{
        "id": "sample",
        "name": "Sample Mod",
        "description": "Does sample things",
        "version": "1.2.3",
        "icon": "assets/sample/icon.png"
    }"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        game: PathBuf,
        service: ModService,
        registry: Arc<FakeRegistry>,
    }

    fn fixture(registry: FakeRegistry) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("game");
        let registry = Arc::new(registry);
        let client = reqwest::Client::new();
        let service = ModService::new(
            ProfileLayout::new(game.clone()),
            registry.clone(),
            Arc::new(Downloader::new(client.clone(), Duration::from_secs(10))),
            IconCache::new(dir.path().join("icons"), client, Duration::from_secs(5)),
        );
        Fixture {
            _dir: dir,
            game,
            service,
            registry,
        }
    }

    fn mods_dir(fx: &Fixture, profile: &str) -> PathBuf {
        let dir = fx.game.join("instances").join(profile).join("mods");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn scan_lists_enabled_and_disabled_mods_in_order() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        std::fs::write(dir.join("sample.jar"), b"a").unwrap();
        std::fs::write(dir.join("other.jar.disabled"), b"b").unwrap();
        std::fs::write(dir.join("notes.txt"), b"c").unwrap();
        std::fs::create_dir(dir.join("folder.jar")).unwrap();

        let mods = fx.service.scan_mods_for_profile("main").await.unwrap();
        let mut seen = Vec::new();
        for shared in &mods {
            let item = shared.lock().await;
            seen.push((item.file_name().to_string(), item.disabled(), item.basename()));
        }

        assert_eq!(
            seen,
            vec![
                ("other.jar.disabled".to_string(), true, "other".to_string()),
                ("sample.jar".to_string(), false, "sample".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn scan_of_unknown_profile_is_empty() {
        let fx = fixture(FakeRegistry::default());
        let mods = fx.service.scan_mods_for_profile("ghost").await.unwrap();
        assert!(mods.is_empty());
    }

    #[tokio::test]
    async fn toggling_twice_restores_name_and_flag() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let path = dir.join("sample.jar");
        std::fs::write(&path, b"a").unwrap();
        let mut item = ModItem::from_path(&path);

        fx.service.toggle_enable_for_mod(&mut item).await.unwrap();
        assert!(item.disabled());
        assert_eq!(item.file_name(), "sample.jar.disabled");
        assert!(dir.join("sample.jar.disabled").exists());
        assert!(!path.exists());

        fx.service.toggle_enable_for_mod(&mut item).await.unwrap();
        assert!(!item.disabled());
        assert_eq!(item.file_path(), path.as_path());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn toggle_collision_leaves_record_untouched() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let path = dir.join("sample.jar");
        std::fs::write(&path, b"enabled").unwrap();
        std::fs::write(dir.join("sample.jar.disabled"), b"stale").unwrap();
        let mut item = ModItem::from_path(&path);

        let err = fx.service.toggle_enable_for_mod(&mut item).await.unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Io);
        assert!(!item.disabled());
        assert_eq!(item.file_path(), path.as_path());
        assert_eq!(std::fs::read(dir.join("sample.jar.disabled")).unwrap(), b"stale");
    }

    #[tokio::test]
    async fn no_clobber_rename_keeps_both_files_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.jar");
        let to = dir.path().join("a.jar.disabled");
        std::fs::write(&from, b"live").unwrap();
        std::fs::write(&to, b"other").unwrap();

        let err = rename_no_clobber(&from, &to).await.unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::Io);
        assert_eq!(std::fs::read(&from).unwrap(), b"live");
        assert_eq!(std::fs::read(&to).unwrap(), b"other");

        std::fs::remove_file(&to).unwrap();
        rename_no_clobber(&from, &to).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"live");
    }

    #[tokio::test]
    async fn toggle_of_missing_file_fails() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let mut item = ModItem::from_path(dir.join("gone.jar"));

        assert!(fx.service.toggle_enable_for_mod(&mut item).await.is_err());
        assert!(!item.disabled());
    }

    #[tokio::test]
    async fn delete_removes_file_and_reports_missing() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let path = dir.join("sample.jar");
        std::fs::write(&path, b"a").unwrap();
        let item = ModItem::from_path(&path);

        fx.service.delete_mod(&item).await.unwrap();
        assert!(!path.exists());
        assert!(fx.service.delete_mod(&item).await.is_err());
    }

    #[tokio::test]
    async fn local_first_with_complete_jar_never_calls_registry() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let jar = dir.join("sample.jar");
        write_jar(
            &jar,
            &[
                (FABRIC_MANIFEST, COMPLETE_FABRIC.as_bytes()),
                ("assets/sample/icon.png", b"PNG"),
            ],
        );
        let shared = ModItem::from_path(&jar).into_shared();

        let source = fx.service.fetch_metadata_for_mod(&shared).await.unwrap();

        assert_eq!(source, MetadataSource::Local);
        assert_eq!(fx.registry.calls(), 0);
        let item = shared.lock().await;
        assert_eq!(item.display_name.as_deref(), Some("Sample Mod"));
        assert_eq!(item.version.as_deref(), Some("1.2.3"));
        assert!(item.is_fabric && !item.is_forge && !item.is_neoforge);
        let icon = PathBuf::from(item.icon_url.clone().unwrap());
        assert_eq!(std::fs::read(icon).unwrap(), b"PNG");
        assert!(item.metadata_loaded);
    }

    #[tokio::test]
    async fn replaced_jar_gets_its_own_icon() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let jar = dir.join("sample.jar");

        let mut icons = Vec::new();
        for bytes in [b"OLD-ICON", b"NEW-ICON"] {
            write_jar(
                &jar,
                &[
                    (FABRIC_MANIFEST, COMPLETE_FABRIC.as_bytes()),
                    ("assets/sample/icon.png", bytes),
                ],
            );
            let shared = ModItem::from_path(&jar).into_shared();
            fx.service.fetch_metadata_for_mod(&shared).await.unwrap();
            let icon = shared.lock().await.icon_url.clone().unwrap();
            icons.push(std::fs::read(icon).unwrap());
        }

        assert_eq!(icons, vec![b"OLD-ICON".to_vec(), b"NEW-ICON".to_vec()]);
    }

    #[tokio::test]
    async fn local_first_fills_gaps_from_registry_without_overriding() {
        let registry = FakeRegistry {
            hits: vec![hit("P1", "Sample Mod")],
            ..FakeRegistry::default()
        };
        let fx = fixture(registry);
        let dir = mods_dir(&fx, "main");
        let jar = dir.join("sample-fabric-1.2.3.jar");
        write_jar(
            &jar,
            &[(FABRIC_MANIFEST, br#"{"name": "Sample Mod", "version": "1.2.3"}"#)],
        );
        let shared = ModItem::from_path(&jar).into_shared();

        let source = fx.service.fetch_metadata_for_mod(&shared).await.unwrap();

        assert_eq!(source, MetadataSource::LocalAndRemote);
        let item = shared.lock().await;
        assert_eq!(item.version.as_deref(), Some("1.2.3"));
        assert_eq!(item.description.as_deref(), Some("Sample Mod from the registry"));
        assert_eq!(item.icon_url.as_deref(), Some("https://cdn.example/P1.png"));
        assert_eq!(item.online_id(), Some("P1"));
        assert!(item.file_sha1.is_some());
    }

    #[tokio::test]
    async fn online_first_prefers_registry_hash_match() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("sample.jar");
        write_jar(&jar, &[(FABRIC_MANIFEST, COMPLETE_FABRIC.as_bytes())]);
        let sha1 = sha1_file(&jar).unwrap();

        let mut registry = FakeRegistry {
            hits: vec![hit("proj", "Registry Name")],
            ..FakeRegistry::default()
        };
        registry
            .by_hash
            .insert(sha1.clone(), version("2.0.0", "2024-01-01T00:00:00Z", &["1.20.1"], &["forge"]));
        let fx = fixture(registry);
        fx.service.set_online_search_enabled(true);
        let shared = ModItem::from_path(&jar).into_shared();

        let source = fx.service.fetch_metadata_for_mod(&shared).await.unwrap();

        assert_eq!(source, MetadataSource::Remote);
        let item = shared.lock().await;
        assert_eq!(item.display_name.as_deref(), Some("Registry Name"));
        assert_eq!(item.version.as_deref(), Some("2.0.0"));
        assert!(item.is_forge);
        assert!(!item.is_fabric);
        assert_eq!(item.file_sha1.as_deref(), Some(sha1.as_str()));
    }

    #[tokio::test]
    async fn online_first_falls_back_to_jar_when_registry_fails() {
        let fx = fixture(FakeRegistry {
            fail: true,
            ..FakeRegistry::default()
        });
        fx.service.set_online_search_enabled(true);
        let dir = mods_dir(&fx, "main");
        let jar = dir.join("sample.jar");
        write_jar(&jar, &[(FABRIC_MANIFEST, COMPLETE_FABRIC.as_bytes())]);
        let shared = ModItem::from_path(&jar).into_shared();

        let source = fx.service.fetch_metadata_for_mod(&shared).await.unwrap();

        assert_eq!(source, MetadataSource::Local);
        assert!(fx.registry.calls() > 0);
        assert_eq!(shared.lock().await.display_name.as_deref(), Some("Sample Mod"));
    }

    #[tokio::test]
    async fn exhausted_sources_still_apply_filename_defaults() {
        let fx = fixture(FakeRegistry {
            fail: true,
            ..FakeRegistry::default()
        });
        let dir = mods_dir(&fx, "main");
        let jar = dir.join("mystery-1.0.jar");
        std::fs::write(&jar, b"not a zip").unwrap();
        let shared = ModItem::from_path(&jar).into_shared();

        let err = fx.service.fetch_metadata_for_mod(&shared).await.unwrap_err();

        assert!(matches!(err, ModError::MetadataUnavailable(_)));
        let item = shared.lock().await;
        assert_eq!(item.display_name.as_deref(), Some("mystery-1.0"));
        assert!(item.metadata_loaded);
    }

    #[tokio::test]
    async fn batch_metadata_isolates_failures() {
        let fx = fixture(FakeRegistry {
            fail: true,
            ..FakeRegistry::default()
        });
        let dir = mods_dir(&fx, "main");
        let good = dir.join("good.jar");
        let bad = dir.join("bad.jar");
        write_jar(&good, &[(FABRIC_MANIFEST, COMPLETE_FABRIC.as_bytes())]);
        std::fs::write(&bad, b"junk").unwrap();

        let mods = vec![
            ModItem::from_path(&good).into_shared(),
            ModItem::from_path(&bad).into_shared(),
        ];
        let results = fx.service.fetch_metadata_for_mods(&mods).await;

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn search_materializes_online_records() {
        let fx = fixture(FakeRegistry {
            hits: vec![hit("P1", "Sodium"), hit("P2", "Lithium")],
            ..FakeRegistry::default()
        });

        let results = fx
            .service
            .search_mods(&SearchQuery::text("optimization"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].online_id(), Some("P1"));
        assert_eq!(results[1].display_name.as_deref(), Some("Lithium"));
        assert!(results[0].is_fabric);
    }

    #[tokio::test]
    async fn download_installs_into_new_profile_folder() {
        let fx = fixture(FakeRegistry::default());
        let dir = tempfile::tempdir().unwrap();
        let payload_jar = dir.path().join("payload.jar");
        write_jar(&payload_jar, &[(FABRIC_MANIFEST, COMPLETE_FABRIC.as_bytes())]);
        let payload = std::fs::read(&payload_jar).unwrap();
        let (base, _requests) =
            serve(vec![http_response("200 OK", "application/java-archive", &payload)]).await;

        let release = ModVersion::from_value(&serde_json::json!({
            "name": "Sample 1.2.3",
            "version_number": "1.2.3",
            "date_published": "2024-01-01T00:00:00Z",
            "files": [{ "url": format!("{base}/sample.jar"), "filename": "sample-1.2.3.jar" }]
        }))
        .unwrap();
        let mut online = ModItem::from_search_hit(&hit("P1", "Sample"));
        online.select_version(&release);

        let installed = fx.service.download_mod(&online, "fresh").await.unwrap();

        let dest = fx.game.join("instances/fresh/mods/sample-1.2.3.jar");
        assert_eq!(std::fs::read(&dest).unwrap(), payload);
        let item = installed.lock().await;
        assert_eq!(item.file_path(), dest.as_path());
        assert_eq!(item.online_id(), Some("P1"));
        assert_eq!(item.display_name.as_deref(), Some("Sample Mod"));
    }

    #[tokio::test]
    async fn failed_download_leaves_no_installed_file() {
        let fx = fixture(FakeRegistry::default());
        let dir = mods_dir(&fx, "main");
        let (base, _requests) = serve(vec![truncated_response(10_000, b"partial")]).await;

        let release = ModVersion::from_value(&serde_json::json!({
            "name": "Sample",
            "version_number": "1.0",
            "date_published": "2024-01-01T00:00:00Z",
            "files": [{ "url": format!("{base}/sample.jar"), "filename": "sample.jar" }]
        }))
        .unwrap();
        let mut online = ModItem::default();
        online.select_version(&release);

        assert!(fx.service.download_mod(&online, "main").await.is_err());
        assert!(!dir.join("sample.jar").exists());
        assert!(!staging_path(&dir.join("sample.jar")).exists());
        let mods = fx.service.scan_mods_for_profile("main").await.unwrap();
        assert!(mods.is_empty());
    }

    #[tokio::test]
    async fn download_without_selection_is_not_found() {
        let fx = fixture(FakeRegistry::default());
        let err = fx
            .service
            .download_mod(&ModItem::default(), "main")
            .await
            .unwrap_err();
        assert!(matches!(err, ModError::NoDownloadSelected(_)));
    }

    #[test]
    fn search_term_drops_versions_and_loaders() {
        assert_eq!(search_term("sodium-fabric-0.5.8+mc1.20.1"), "sodium");
        assert_eq!(search_term("create_mc1.20.1_v0.5.1"), "create");
        assert_eq!(search_term("Just Enough Items"), "Just Enough Items");
        assert_eq!(search_term("1.20-pack"), "1.20-pack");
    }

    #[test]
    fn best_match_requires_name_similarity() {
        let hits = vec![hit("A", "Totally Different"), hit("B", "Sodium Extra")];
        assert_eq!(best_match("sodium extra", &hits).unwrap().project_id, "B");
        assert_eq!(best_match("sodium", &hits).unwrap().project_id, "B");
        assert!(best_match("lithium", &hits).is_none());
    }
}
