//! Error types shared across the pipeline crates.

use thiserror::Error;

/// Result type alias using CfError.
pub type CfResult<T> = Result<T, CfError>;

/// Primary error type for pipeline and reader operations.
#[derive(Debug, Error)]
pub enum CfError {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(String),

    // === Contract Errors ===
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Out of range: {0}")]
    Range(String),

    // === Serialization Errors ===
    #[error("Serialization error: {0}")]
    Serialization(String),

    // === Infrastructure Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CfError {
    /// True for errors that skip the current item but leave the rest
    /// of the request chain intact.
    pub fn is_soft(&self) -> bool {
        matches!(self, CfError::Contract(_) | CfError::Range(_))
    }
}
