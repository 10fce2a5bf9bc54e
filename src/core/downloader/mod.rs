mod client;

pub use client::{staging_path, DownloadEntry, Downloader, STAGING_DIR};
