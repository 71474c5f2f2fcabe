//! Error types shared by every provider.

use compact_str::CompactString;
use thiserror::Error;

/// Result alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors a provider call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Backend unreachable or timed out.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Credentials expired or rejected.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// The entity or folder no longer exists.
    #[error("Not found: {id}")]
    NotFound { id: CompactString },

    /// The backend refused the operation.
    #[error("Permission denied: {id}")]
    PermissionDenied { id: CompactString },

    /// An entity with the same title already exists at the destination.
    #[error("'{title}' already exists")]
    AlreadyExists { title: CompactString },

    /// The name is not acceptable to the backend.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: CompactString, reason: String },

    /// The backend does not implement this operation.
    #[error("Operation not supported: {operation}")]
    Unsupported { operation: &'static str },

    /// The caller's cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// Other backend failure.
    #[error("{message}")]
    Other { message: String },
}

impl ProviderError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(id: impl Into<CompactString>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a permission error.
    pub fn permission_denied(id: impl Into<CompactString>) -> Self {
        Self::PermissionDenied { id: id.into() }
    }

    /// Create an already-exists error.
    pub fn already_exists(title: impl Into<CompactString>) -> Self {
        Self::AlreadyExists {
            title: title.into(),
        }
    }

    /// Create an invalid name error.
    pub fn invalid_name(name: impl Into<CompactString>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Map an I/O error on `id` to the matching variant.
    pub fn io(id: impl Into<CompactString>, source: std::io::Error) -> Self {
        let id = id.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { id },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { id },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { title: id },
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => Self::Network {
                message: format!("{id}: {source}"),
            },
            _ => Self::Other {
                message: format!("{id}: {source}"),
            },
        }
    }

    /// Check if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if re-issuing the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Auth { .. })
    }
}
