//! Error types for registry, store and copy operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for ocisync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a registry or the local store.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable credential could be loaded before contacting the registry.
    #[error("registry credential not configured for '{host}': {message}")]
    AuthConfig {
        /// Registry host the credential was requested for.
        host: String,
        /// What was missing.
        message: String,
    },

    /// The registry rejected the credential.
    #[error("registry '{host}' rejected the credential (HTTP {status})")]
    Auth {
        /// Registry host.
        host: String,
        /// HTTP status returned (401 or 403).
        status: u16,
    },

    /// Repository, tag or digest absent on the server or in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transport-level failure or unexpected server response.
    #[error("request to {url} failed: {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Content hash does not match its claimed digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the content was requested under.
        expected: String,
        /// What the content actually hashes to (or its size on a size mismatch).
        actual: String,
    },

    /// Manifest or index bytes do not have the expected structure.
    #[error("malformed content {digest}: {message}")]
    Format {
        /// Digest of the offending document.
        digest: String,
        /// Error message.
        message: String,
    },

    /// Local store I/O failure.
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A digest string is not `<algorithm>:<hex>` with a supported algorithm.
    #[error("invalid digest '{0}'")]
    InvalidDigest(String),

    /// Repository reference or tag failed validation.
    #[error("invalid reference '{0}': {1}")]
    InvalidReference(String, String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a credential configuration error.
    #[must_use]
    pub fn auth_config(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthConfig {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a format error.
    #[must_use]
    pub fn format(digest: impl Into<String>, message: impl ToString) -> Self {
        Self::Format {
            digest: digest.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid reference error.
    #[must_use]
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference(reference.into(), message.into())
    }
}

/// Failure of a whole [`copy`](crate::Copier::copy) run.
///
/// Carries the repository/tag that was being synchronized and, when the
/// failure is attributable to one node of the graph, that node's digest.
#[derive(Error, Debug)]
#[error("failed to copy {reference}{}: {source}", at_digest(.digest))]
pub struct CopyError {
    /// `host/path:tag` being copied.
    pub reference: String,
    /// Digest of the descriptor being processed when the run failed.
    pub digest: Option<String>,
    /// Underlying failure.
    #[source]
    pub source: Error,
}

fn at_digest(digest: &Option<String>) -> String {
    digest
        .as_deref()
        .map(|d| format!(" at {d}"))
        .unwrap_or_default()
}

impl CopyError {
    /// The underlying typed error.
    pub fn kind(&self) -> &Error {
        &self.source
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}
