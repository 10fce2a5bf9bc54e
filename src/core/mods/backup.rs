use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use super::model::ModItem;
use crate::core::error::{ModError, ModResult};

/// Per-mod copies of package files under `<root>/<folder key>/<basename>/`,
/// where the folder key is derived from the mods folder holding the file.
/// Same-named mods of different profiles never share a backup list.
///
/// Backup names start with a fixed-width timestamp and sequence number,
/// so lexical order is creation order.
pub struct ModBackupManager {
    root: PathBuf,
    seq: AtomicU64,
}

impl ModBackupManager {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            seq: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_dir_for_mod(&self, item: &ModItem) -> PathBuf {
        let mods_dir = item.file_path().parent().unwrap_or_else(|| Path::new(""));
        self.root.join(folder_key(mods_dir)).join(item.basename())
    }

    /// Copy the record's file into its backup folder.
    pub async fn backup_mod(&self, item: &ModItem) -> ModResult<PathBuf> {
        let source = item.file_path();
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(ModError::ModFileMissing(source.to_path_buf()));
        }

        let dir = self.backup_dir_for_mod(item);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ModError::io(&dir, e))?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 10_000;
        let name = format!(
            "{}-{:04}_{}",
            Utc::now().format("%Y%m%d-%H%M%S-%6f"),
            seq,
            item.file_name()
        );
        let target = dir.join(name);

        copy_atomic(source, &target).await?;
        info!("Backed up {} -> {:?}", item.file_name(), target);
        Ok(target)
    }

    /// Backups of this mod, newest first. Empty when none were ever made.
    pub async fn get_backup_files_for_mod(&self, item: &ModItem) -> ModResult<Vec<PathBuf>> {
        let dir = self.backup_dir_for_mod(item);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ModError::io(&dir, e)),
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ModError::io(&dir, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            // Dot-files are in-progress copies.
            if is_file && !name.starts_with('.') {
                backups.push(entry.path());
            }
        }

        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(backups)
    }

    /// Replace the live file of `item` with `backup`. Metadata is not re-read.
    pub async fn restore_mod_from_backup(&self, backup: &Path, item: &ModItem) -> ModResult<()> {
        let is_file = tokio::fs::metadata(backup)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ModError::BackupNotFound(backup.to_path_buf()));
        }

        copy_atomic(backup, item.file_path()).await?;
        info!("Restored {:?} from {:?}", item.file_path(), backup);
        Ok(())
    }

    /// Delete all but the newest `keep` backups. Returns how many were removed.
    pub async fn prune_backups_for_mod(&self, item: &ModItem, keep: usize) -> ModResult<usize> {
        let backups = self.get_backup_files_for_mod(item).await?;
        let mut removed = 0;
        for old in backups.iter().skip(keep) {
            match tokio::fs::remove_file(old).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not prune backup {:?}: {}", old, e),
            }
        }
        if removed > 0 {
            debug!("Pruned {} backups of {}", removed, item.basename());
        }
        Ok(removed)
    }
}

/// Short stable name for a mods folder.
fn folder_key(mods_dir: &Path) -> String {
    let digest = Sha1::digest(mods_dir.to_string_lossy().as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Copy to a hidden sibling of `target`, then rename over it.
async fn copy_atomic(source: &Path, target: &Path) -> ModResult<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::copy(source, &tmp).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ModError::io(source, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ModError::io(target, e));
    }
    Ok(())
}
