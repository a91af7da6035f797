//! Error types for session operations

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for tunnel session operations
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Port field is not an integer in 1..=65535
    #[error("Invalid port: {value:?}")]
    InvalidPort { value: String },

    /// Server or password field is empty
    #[error("Missing credential: {field}")]
    MissingCredential { field: &'static str },

    /// Input does not start with the share-link scheme
    #[error("Not a share link")]
    NotAShareLink,

    /// Share link has the right scheme but a broken body
    #[error("Malformed share link: {reason}")]
    MalformedLink { reason: String },

    /// Proxy executable is absent at its configured location
    #[error("Proxy executable not found: {}", path.display())]
    BinaryNotFound { path: PathBuf },

    /// Process creation failed for any other reason
    #[error("Failed to spawn proxy process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// Host proxy configuration could not be changed (non-fatal)
    #[error("Host proxy configuration failed: {reason}")]
    HostConfigFailed { reason: String },

    /// Persisted config store errors
    #[error("Config store error: {reason}")]
    Store { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Create a malformed link error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedLink {
            reason: reason.into(),
        }
    }

    /// Create a host configuration error
    pub fn host_config(reason: impl Into<String>) -> Self {
        Self::HostConfigFailed {
            reason: reason.into(),
        }
    }

    /// Create a store error
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Errors produced by config validation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPort { .. } | Self::MissingCredential { .. }
        )
    }

    /// Errors produced by share-link decoding
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::NotAShareLink | Self::MalformedLink { .. })
    }

    /// Errors the controller only reports and never acts on
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::HostConfigFailed { .. })
    }
}
