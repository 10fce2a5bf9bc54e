pub mod archive;
pub mod backup;
pub mod icon_cache;
pub mod model;
pub mod profile;
pub mod service;
pub mod update;

pub use backup::ModBackupManager;
pub use icon_cache::IconCache;
pub use model::{LoaderType, MetadataPatch, ModItem, RemoteIdentity, SharedMod};
pub use profile::ProfileLayout;
pub use service::{MetadataSource, ModService};
pub use update::{ModUpdateChecker, UpdateInfo};
