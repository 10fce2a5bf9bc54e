mod app_state;

pub use app_state::{default_data_dir, AppState, ModManagerSettings};
