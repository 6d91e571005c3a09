// ABOUTME: XDG Base Directory paths for the config file and the Matrix store
// ABOUTME: Falls back to the working directory when no home directory is known

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "de";
const ORGANIZATION: &str = "eigenbaukombinat";
const APPLICATION: &str = "horscht";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// e.g. ~/.local/share/horscht/, falling back to ./data
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Default sqlite store for the Matrix client (sync state and crypto)
pub fn store_dir() -> PathBuf {
    data_dir().join("matrix_store")
}

/// e.g. ~/.config/horscht/config.toml
pub fn config_file() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config.toml")
}
