//! Unified error handling for the trawl crate
//!
//! This module provides a unified error type that consolidates all
//! domain-specific errors into a single `Error` enum, while keeping the
//! domain errors themselves usable at the seams where they arise.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trawl::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "retrying");
//!     } else {
//!         tracing::error!(error = %err, "giving up");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::curl::CurlError;
pub use crate::fetcher::client::FetchError;
pub use crate::project::ProjectError;
pub use crate::queue::QueueError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeouts, proxies)
    Network,
    /// Queue transport and capacity errors
    Queue,
    /// Project registration and callback errors
    Project,
    /// Parsing and data extraction errors
    Parsing,
    /// Configuration and validation errors
    Config,
    /// I/O errors
    Io,
    /// Other/unknown errors
    Other,
}

/// Unified error type for the trawl crate
///
/// This enum wraps all domain-specific errors, providing a single error type
/// that can cross module boundaries without flattening the detail.
#[derive(Error, Debug)]
pub enum Error {
    /// Queue transport errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Project registration and callback errors
    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    /// Fetch-specific errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Curl command parsing errors
    #[error("Curl error: {0}")]
    Curl(#[from] CurlError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Queue(e) => !matches!(e, QueueError::Encode(_)),
            Self::Project(_) => false,
            Self::Fetch(e) => e.is_recoverable(),
            Self::Curl(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Http(_) => true, // HTTP errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    /// Get the error category for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Queue(_) => ErrorCategory::Queue,
            Self::Project(_) => ErrorCategory::Project,
            Self::Curl(_) | Self::Json(_) => ErrorCategory::Parsing,
            Self::Io(_) => ErrorCategory::Io,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
