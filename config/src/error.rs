use std::path::PathBuf;

/// Errors raised while loading, saving or decrypting configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine the {0} directory")]
    NoDirectory(&'static str),

    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }
}
