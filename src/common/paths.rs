use std::path::{Path, PathBuf};
use std::fs;
use directories::ProjectDirs;
use crate::common::{Config, DevMode, GymAuthError, Result};

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/gymauth/gym-auth.toml")
}

pub fn dev_config_file() -> PathBuf {
    PathBuf::from("configs/gym-auth.toml")
}

/// Where session and roster data live for this run.
#[derive(Debug, Clone)]
pub struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    pub fn new(dev_mode: &DevMode, config: Option<&Config>) -> Result<Self> {
        let data_dir = if let Some(base) = dev_mode.base_dir() {
            base.to_path_buf()
        } else if let Some(dir) = config.and_then(|c| c.storage.data_dir.clone()) {
            dir
        } else {
            let dirs = ProjectDirs::from("com", "sipgym", "GymAuth")
                .ok_or_else(|| GymAuthError::Storage("Failed to get project dirs".into()))?;
            dirs.data_dir().to_path_buf()
        };

        Self::with_data_dir(data_dir)
    }

    pub fn with_data_dir(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(data_dir.join("session"))?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn session_dir(&self) -> PathBuf {
        self.data_dir.join("session")
    }

    /// Local mirror of the remote admin collection.
    pub fn roster_file(&self) -> PathBuf {
        self.data_dir.join("admins.json")
    }
}

/// Config lookup order: dev config in dev mode, then the system file, then
/// the dev file as a last resort.
pub fn config_file(dev_mode: &DevMode) -> PathBuf {
    if dev_mode.is_enabled() {
        return dev_config_file();
    }
    let system = system_config_file();
    if system.exists() { system } else { dev_config_file() }
}
