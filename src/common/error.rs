use thiserror::Error;

#[derive(Error, Debug)]
pub enum GymAuthError {
    /// Username/password pair did not match any roster record. The message is
    /// the same for unknown users and wrong passwords.
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Camera error: {0}")]
    Capture(String),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("This phone is not under management: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl GymAuthError {
    /// Whether the failure should send the user back to password login
    /// instead of just showing an inline message.
    pub fn falls_back_to_password(&self) -> bool {
        matches!(
            self,
            GymAuthError::Capture(_) | GymAuthError::ModelLoad(_) | GymAuthError::Model(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GymAuthError>;
