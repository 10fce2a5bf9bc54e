use std::path::{Path, PathBuf};

/// Profile names that also map to the game's shared `mods/` folder.
const DEFAULT_PROFILE_NAMES: [&str; 2] = ["", "default"];

/// Where a profile keeps its mods under the game directory.
///
/// Candidates, first existing wins:
/// - `<game>/instances/<profile>/mods`
/// - `<game>/profiles/<profile>/mods`
/// - `<game>/versions/<profile>/mods`
/// - `<game>/mods` (default profile only)
#[derive(Debug, Clone)]
pub struct ProfileLayout {
    game_dir: PathBuf,
}

impl ProfileLayout {
    pub fn new(game_dir: PathBuf) -> Self {
        Self { game_dir }
    }

    pub fn game_dir(&self) -> &Path {
        &self.game_dir
    }

    pub fn candidates(&self, profile: &str) -> Vec<PathBuf> {
        let profile = profile.trim();
        let mut candidates = Vec::new();
        if !profile.is_empty() && is_plain_name(profile) {
            for parent in ["instances", "profiles", "versions"] {
                candidates.push(self.game_dir.join(parent).join(profile).join("mods"));
            }
        }
        if DEFAULT_PROFILE_NAMES.contains(&profile.to_ascii_lowercase().as_str()) {
            candidates.push(self.game_dir.join("mods"));
        }
        candidates
    }

    pub fn existing_mods_dir(&self, profile: &str) -> Option<PathBuf> {
        self.candidates(profile).into_iter().find(|dir| dir.is_dir())
    }

    /// Folder to create when a profile has none yet.
    pub fn default_mods_dir(&self, profile: &str) -> PathBuf {
        self.candidates(profile)
            .into_iter()
            .next()
            .unwrap_or_else(|| self.game_dir.join("mods"))
    }
}

/// Rejects names that would escape the profile directory.
fn is_plain_name(name: &str) -> bool {
    !name.contains(['/', '\\']) && name != "." && name != ".."
}
