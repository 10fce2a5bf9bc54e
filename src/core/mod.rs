// ─── AmethystMods Core ───
// Mod management engine for a Minecraft launcher.
//
// Architecture:
//   core/
//     mods/        Mod records, jar metadata, scan/toggle/install, updates, backups
//     registry/    Remote registry trait + Modrinth client
//     downloader/  Staged downloads with SHA-1/SHA-512 validation
//     http.rs      Shared HTTP client
//     state/       Settings + application state

pub mod downloader;
pub mod error;
pub mod http;
pub mod mods;
pub mod registry;
pub mod state;

#[cfg(test)]
pub mod test_support;
