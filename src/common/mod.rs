pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{GymAuthError, Result};
pub use paths::{Paths, config_file, system_config_file};
