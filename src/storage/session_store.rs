use crate::common::{GymAuthError, Paths, Result};
use crate::storage::admin::AdminRecord;
use std::path::PathBuf;
use std::fs;

/// Fixed storage key for the logged-in admin.
pub const SESSION_KEY: &str = "admin_session";

/// Durable copy of the currently authenticated admin.
///
/// The record is stored as plain JSON, password included. Anything with
/// access to the data directory can read it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(paths: &Paths) -> Result<Self> {
        Self::new_with_dir(paths.session_dir())
    }

    pub fn new_with_dir(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn session_file(&self) -> PathBuf {
        self.dir.join(format!("{}.json", SESSION_KEY))
    }

    /// Overwrites any previous session.
    pub fn persist(&self, admin: &AdminRecord) -> Result<()> {
        let encoded = serde_json::to_vec(admin)
            .map_err(|e| GymAuthError::Storage(format!("Failed to serialize session: {}", e)))?;
        fs::write(self.session_file(), encoded)?;
        tracing::debug!("Persisted session for {}", admin.username);
        Ok(())
    }

    /// Missing and malformed sessions both read as `None`.
    pub fn load(&self) -> Option<AdminRecord> {
        let data = match fs::read(self.session_file()) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read session: {}", e);
                }
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(admin) => Some(admin),
            Err(e) => {
                tracing::warn!("Ignoring malformed session: {}", e);
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(self.session_file()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
