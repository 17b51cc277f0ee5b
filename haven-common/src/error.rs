//! Common error types for haven services

use thiserror::Error;

/// Common result type for haven operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds shared by the registry, configuration and monitor layers
#[derive(Error, Debug)]
pub enum Error {
    /// Registry query failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error (data-par scan, local fragment deletion)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bootstrap configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backup, supplier or setting does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed backup id, event name or list-files payload
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Collaborator or transport failure
    #[error("Internal error: {0}")]
    Internal(String),
}
