//! Error types for transfer planning and execution.

use compact_str::CompactString;
use docshelf_core::ProviderError;
use thiserror::Error;

use crate::outcome::ItemFailure;

/// Reasons a transfer request is rejected before any I/O happens.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("Nothing to transfer")]
    EmptyRequest,

    #[error("Items must all come from the source provider")]
    MixedSourceProviders,

    #[error("Destination '{title}' is not a folder")]
    DestinationNotFolder { title: CompactString },

    #[error("Cannot transfer '{title}' into itself")]
    DestinationIsSource { title: CompactString },

    #[error("Transfer cancelled by user")]
    UserCancelled,

    #[error("Conflict check failed: {0}")]
    ConflictCheck(#[source] ProviderError),

    #[error("Could not resolve the destination folder: {0}")]
    DestinationLookup(#[source] ProviderError),
}

/// Failures of the executor itself, as opposed to per-item failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("Server-side transfer is not available between these providers")]
    RouteUnavailable,

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

/// A finished transfer in which some items did not make it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransferError {
    #[error("{} item(s) failed to transfer", .0.len())]
    PartialFailure(Vec<ItemFailure>),

    #[error("Transfer cancelled after {completed} item(s)")]
    Cancelled { completed: usize },
}
