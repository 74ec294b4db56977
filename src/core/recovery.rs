use crate::common::{GymAuthError, Result};
use crate::storage::AdminRecord;

/// Result of a successful phone lookup. The password is handed back in
/// plaintext for the caller to display; there is no token or expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredPassword {
    pub username: String,
    pub phone: String,
    pub password: String,
}

/// Looks up the first admin whose phone matches exactly.
pub fn recover(roster: &[AdminRecord], phone: &str) -> Result<RecoveredPassword> {
    let admin = roster
        .iter()
        .find(|admin| admin.phone.as_deref() == Some(phone))
        .ok_or_else(|| GymAuthError::NotFound(phone.to_string()))?;

    tracing::info!("Password recovery requested for {}", admin.username);

    Ok(RecoveredPassword {
        username: admin.username.clone(),
        phone: phone.to_string(),
        password: admin.password.clone().unwrap_or_default(),
    })
}
