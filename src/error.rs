//! Error types for regionpace.

use thiserror::Error;

use crate::ratelimit::DescriptorError;

/// Main error type for regionpace operations.
#[derive(Error, Debug)]
pub enum RegionPaceError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limits descriptor could not be parsed
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// Rate-limit headers reported by the server are inconsistent
    #[error("Rate limit header error: {0}")]
    Headers(String),

    /// Region construction or lookup errors
    #[error("Region error: {0}")]
    Region(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for regionpace operations.
pub type Result<T> = std::result::Result<T, RegionPaceError>;
