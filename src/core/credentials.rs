use crate::common::{GymAuthError, Result};
use crate::storage::AdminRecord;

/// Finds the first admin whose username matches exactly and whose password
/// matches too. Unknown users and wrong passwords fail the same way.
pub fn authenticate<'a>(
    roster: &'a [AdminRecord],
    username: &str,
    password: &str,
) -> Result<&'a AdminRecord> {
    roster
        .iter()
        .find(|admin| admin.username == username && admin.password.as_deref() == Some(password))
        .ok_or(GymAuthError::InvalidCredentials)
}
