pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::error::{ErrorKind, ModError, ModResult};
pub use crate::core::mods::{
    LoaderType, MetadataSource, ModBackupManager, ModItem, ModService, ModUpdateChecker,
    SharedMod, UpdateInfo,
};
pub use crate::core::registry::{ModRegistry, ModVersion, RegistryBackend};
pub use crate::core::state::{default_data_dir, AppState, ModManagerSettings};

/// Structured logging on stderr. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,amethyst_mods=debug")),
        )
        .try_init();
}
