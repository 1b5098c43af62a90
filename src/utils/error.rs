//! Centralized error types and conversions for nex
//!
//! This module provides structured error types using `thiserror` for library code.
//! CLI/main modules should use `anyhow` for easy context.

use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure error shared by the store, config and persistence layers
#[derive(Error, Debug)]
pub enum NexError {
    /// IO errors with path context
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persistence collaborator could not serve the request
    #[error("Store unavailable: {message}")]
    Store { message: String },

    /// Invalid caller input
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl NexError {
    /// Create an IO error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a store-unavailable error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if the process can keep serving other requests
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Store outages are fatal to one request, not to the process
            NexError::Store { .. } => true,
            NexError::Io { .. } => true,
            NexError::InvalidInput { .. } => true,
            NexError::Serialization { .. } => false,
            NexError::Config { .. } => false,
        }
    }

    /// Returns the error severity level for logging
    pub fn severity(&self) -> tracing::Level {
        match self {
            NexError::Config { .. } => tracing::Level::ERROR,
            NexError::Serialization { .. } => tracing::Level::ERROR,
            NexError::Store { .. } => tracing::Level::ERROR,
            NexError::Io { .. } => tracing::Level::WARN,
            NexError::InvalidInput { .. } => tracing::Level::INFO,
        }
    }

    /// Returns a user-facing hint, if one applies
    pub fn suggestion(&self) -> Option<String> {
        match self {
            NexError::Config { .. } => {
                Some("Check ~/.nex/config.json or your environment variables.".to_string())
            }
            NexError::Store { .. } => Some("The data store is unavailable; try again.".to_string()),
            NexError::InvalidInput { message } if message.contains("command") => {
                Some("Run 'nex --help' to see available commands.".to_string())
            }
            _ => None,
        }
    }
}

/// Result type alias using NexError
pub type Result<T> = std::result::Result<T, NexError>;

impl From<std::io::Error> for NexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source: err,
        }
    }
}

impl From<serde_json::Error> for NexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
