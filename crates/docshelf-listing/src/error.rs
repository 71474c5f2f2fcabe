//! Error types for listing sessions.

use docshelf_core::ProviderError;
use thiserror::Error;

/// Result alias for listing operations.
pub type ListingResult<T> = Result<T, ListingError>;

/// Errors from loading pages into a listing session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    /// A page load is in flight; the request was rejected.
    #[error("A page load is already in progress")]
    Busy,

    /// Every page has been loaded.
    #[error("No more pages to load")]
    NoMorePages,

    /// No first page has been loaded yet.
    #[error("The first page has not been loaded")]
    NotLoaded,

    /// A newer request was submitted before this result arrived.
    #[error("Superseded by a newer request")]
    Superseded,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
