use thiserror::Error;

use crate::ResourceType;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("No resources of type `{0}` are known to this broker")]
    NoMatchingResourceType(ResourceType),
    #[error("Insufficient privileges: {0}")]
    InsufficientPrivileges(String),
    #[error("Request was cancelled")]
    Cancelled,
    #[error("Resource broker is shutting down")]
    Shutdown,
    #[error("Resource broker is not running")]
    NotRunning,
    #[error("Resource broker is already running")]
    AlreadyRunning,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Failure of an authorization store to produce its records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Could not read authorization store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Authorization store has invalid contents: {0}")]
    InvalidContents(String),
    #[error("Authorization store error: {0}")]
    Other(String),
}

impl From<serde_json::error::Error> for StoreError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::InvalidContents(e.to_string())
    }
}

impl From<toml::de::Error> for BrokerError {
    fn from(e: toml::de::Error) -> Self {
        Self::ConfigError(e.to_string())
    }
}
