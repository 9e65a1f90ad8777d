//! Storage Layer
//!
//! Application directories, word fragment files and the scoped work
//! directory fragments are written to.

pub mod fragments;
pub mod workdir;

pub use fragments::{FragmentKey, FragmentMeta, FragmentStore};
pub use workdir::WorkDir;

use anyhow::Result;
use std::path::PathBuf;

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "scriptor", "Scriptor")
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let proj_dirs =
        project_dirs().ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

    let data_dir = proj_dirs.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let proj_dirs =
        project_dirs().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}
