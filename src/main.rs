use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use amethyst_mods::commands::{self, DownloadModPayload, SearchModsPayload};
use amethyst_mods::{default_data_dir, AppState, LoaderType, ModResult};

/// Manage the mods of game profiles
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Data directory for settings, icon cache and backups
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the mods of a profile
    Scan {
        profile: String,
        /// Resolve names, versions and icons
        #[arg(short, long)]
        metadata: bool,
    },
    /// Resolve metadata for one mod
    Info { profile: String, name: String },
    /// Enable a disabled mod or disable an enabled one
    Toggle { profile: String, name: String },
    /// Delete a mod file
    Delete {
        profile: String,
        name: String,
        /// Back the file up first
        #[arg(short, long)]
        backup: bool,
    },
    /// Search the registry
    Search {
        query: String,
        #[arg(short, long)]
        game_version: Option<String>,
        #[arg(short, long, value_parser = parse_loader)]
        loader: Option<LoaderType>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// List releases of a registry project
    Versions {
        project_id: String,
        #[arg(short, long)]
        game_version: Option<String>,
        #[arg(short, long, value_parser = parse_loader)]
        loader: Option<LoaderType>,
    },
    /// Download a release into a profile
    Install {
        profile: String,
        project_id: String,
        /// Release id or version number; newest compatible when omitted
        #[arg(long)]
        version: Option<String>,
        #[arg(short, long)]
        game_version: Option<String>,
        #[arg(short, long, value_parser = parse_loader)]
        loader: Option<LoaderType>,
    },
    /// Check for newer releases
    Updates {
        profile: String,
        game_version: String,
        /// Only check this mod
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Copy a mod into its backup folder
    Backup { profile: String, name: String },
    /// List backups of a mod, newest first
    Backups { profile: String, name: String },
    /// Restore a backup over the live file
    Restore {
        profile: String,
        name: String,
        /// Backup file; newest when omitted
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Show settings
    Settings,
    /// Change settings
    Configure {
        #[arg(long)]
        game_dir: Option<PathBuf>,
        #[arg(long)]
        online_search: Option<bool>,
        #[arg(long)]
        max_backups: Option<usize>,
    },
}

fn parse_loader(raw: &str) -> Result<LoaderType, String> {
    LoaderType::from_registry_name(raw).ok_or_else(|| format!("unknown loader '{raw}'"))
}

fn print_json<T: Serialize>(value: &T) -> ModResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> ModResult<()> {
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let mut state = AppState::new(data_dir)?;

    match args.command {
        Command::Scan { profile, metadata } => {
            print_json(&commands::scan_mods(&state, &profile, metadata).await?)
        }
        Command::Info { profile, name } => {
            print_json(&commands::fetch_mod_metadata(&state, &profile, &name).await?)
        }
        Command::Toggle { profile, name } => {
            print_json(&commands::toggle_mod(&state, &profile, &name).await?)
        }
        Command::Delete {
            profile,
            name,
            backup,
        } => print_json(&commands::delete_mod(&state, &profile, &name, backup).await?),
        Command::Search {
            query,
            game_version,
            loader,
            limit,
        } => {
            let payload = SearchModsPayload {
                query,
                game_version,
                loader,
                limit,
            };
            print_json(&commands::search_mods(&state, payload).await?)
        }
        Command::Versions {
            project_id,
            game_version,
            loader,
        } => print_json(
            &commands::get_mod_versions(&state, &project_id, game_version.as_deref(), loader)
                .await?,
        ),
        Command::Install {
            profile,
            project_id,
            version,
            game_version,
            loader,
        } => {
            let payload = DownloadModPayload {
                profile,
                project_id,
                version_id: version,
                game_version,
                loader,
            };
            print_json(&commands::download_mod(&state, payload).await?)
        }
        Command::Updates {
            profile,
            game_version,
            name: Some(name),
        } => print_json(
            &commands::check_mod_update(&state, &profile, &name, &game_version).await?,
        ),
        Command::Updates {
            profile,
            game_version,
            name: None,
        } => print_json(&commands::check_mod_updates(&state, &profile, &game_version).await?),
        Command::Backup { profile, name } => {
            print_json(&commands::backup_mod(&state, &profile, &name).await?)
        }
        Command::Backups { profile, name } => {
            print_json(&commands::list_mod_backups(&state, &profile, &name).await?)
        }
        Command::Restore {
            profile,
            name,
            from,
        } => print_json(&commands::restore_mod_backup(&state, &profile, &name, from).await?),
        Command::Settings => print_json(&commands::get_settings(&state)),
        Command::Configure {
            game_dir,
            online_search,
            max_backups,
        } => {
            let mut settings = commands::get_settings(&state);
            if let Some(game_dir) = game_dir {
                settings.game_dir = Some(game_dir);
            }
            if let Some(online_search) = online_search {
                settings.online_search_enabled = online_search;
            }
            if let Some(max_backups) = max_backups {
                settings.max_backups_per_mod = Some(max_backups);
            }
            print_json(&commands::update_settings(&mut state, settings)?)
        }
    }
}

#[tokio::main]
async fn main() {
    amethyst_mods::init_logging();
    info!("Starting amethyst-mods version {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(Args::parse()).await {
        error!("{} ({:?})", e, e.kind());
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
