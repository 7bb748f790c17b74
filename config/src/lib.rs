//! Configuration for parley: filesystem locations, `.env` loading and the
//! per-user `Settings` record.

pub mod crypto;
pub mod error;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use paths::PathManager;
pub use settings::{
    DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE, DEFAULT_VOICE_ID, Features, Provider,
    Settings,
};

/// Load environment variables from ./.env and ~/.env.
///
/// dotenv never overrides a variable that is already set, so the project
/// file is loaded first and wins over the home directory file; real
/// environment variables win over both.
pub fn load_env_file() {
    if let Ok(path) = dotenv::dotenv() {
        tracing::debug!("Loaded environment from {:?}", path);
    }

    if let Some(home) = dirs::home_dir() {
        let home_env_path = home.join(".env");
        if dotenv::from_path(&home_env_path).is_ok() {
            tracing::debug!("Loaded environment from {:?}", home_env_path);
        }
    }
}
