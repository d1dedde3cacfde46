use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WtscError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Pocket(#[from] pocket_client::PocketError),

    #[error("recommendation service error: {0}")]
    Recommendation(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WtscError>;

/// Loading a configuration either yields a fully valid [`Config`] or one
/// of these; there is no partially applied load.
///
/// [`Config`]: crate::config::Config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config file {path} contains {} invalid key(s): {}", .keys.len(), .keys.join(", "))]
    Invalid { path: PathBuf, keys: Vec<String> },
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule '{expression}': {reason}")]
    Parse { expression: String, reason: String },

    #[error("unable to update schedule while {waiting} task(s) are waiting")]
    Busy { waiting: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    Stopped,
}

/// Key derivation failed; the registry was left untouched.
#[derive(Debug, Error)]
#[error("unable to derive signer from servicer key at index {index}")]
pub struct RegistryError {
    pub index: usize,
    #[source]
    pub source: pocket_client::PocketError,
}
