//! Transfer and mutation engine for docshelf.
//!
//! Moving or copying entities happens in two steps:
//!
//! 1. [`plan_transfer`] validates a [`TransferRequest`], picks the route and
//!    resolves title conflicts at the destination.
//! 2. [`TransferExecutor`] runs the resulting [`PlannedTransfer`], either
//!    awaited directly or on a background task reporting through a channel.
//!
//! Deletes, renames and trash purges are single calls. The `apply_*`
//! functions patch listing sessions once a mutation has finished.

mod conflict;
mod delete;
mod error;
mod executor;
mod outcome;
mod planner;
mod progress;
mod reconcile;
mod rename;

pub use conflict::{
    ChannelResolver, ConflictPrompt, ConflictRequest, ConflictResolution, ConflictResolver,
    FixedResolver,
};
pub use delete::{DeleteEvent, DeleteReport, delete_entities, empty_trash, start_deletion};
pub use error::{ExecError, PlanError, TransferError};
pub use executor::{TransferExecutor, execute_transfer};
pub use outcome::{
    FailureReason, FailureStage, ItemFailure, ItemOutcome, ItemResult, SkipReason,
    TransferOutcome, TransferState,
};
pub use planner::{PlannedTransfer, Route, TransferRequest, plan_transfer};
pub use progress::{TransferEvent, TransferProgress};
pub use reconcile::{
    Reconciliation, apply_deletions, apply_outcome, apply_rename, apply_trash_emptied,
};
pub use rename::{rename_entity, rename_in_session, validate_title};

/// Default channel buffer size for background operation events.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
