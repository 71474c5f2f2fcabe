//! Per-item and aggregate transfer results.

use docshelf_core::{Entity, ProviderError, ProviderId, TransferMode};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::TransferError;
use crate::planner::Route;

/// Why an item was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SkipReason {
    /// The user chose to skip it, or cancelled while it was in flight.
    UserSkip,
    /// It already lives at the destination, or its title was taken and the
    /// user chose to skip conflicts.
    SamePath,
}

/// The step at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum FailureStage {
    Download,
    Upload,
    CreateFolder,
    Enumerate,
    DeleteSource,
    ServerSide,
}

/// Failure detail for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReason {
    pub stage: FailureStage,
    pub error: ProviderError,
}

impl FailureReason {
    pub fn new(stage: FailureStage, error: ProviderError) -> Self {
        Self { stage, error }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// What happened to one requested item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// The item as it now exists at the destination.
    Succeeded(Entity),
    Failed(FailureReason),
    Skipped(SkipReason),
}

/// A requested item paired with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub source: Entity,
    pub outcome: ItemOutcome,
}

/// A failed item, as carried by [`TransferError::PartialFailure`].
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub source: Entity,
    pub reason: FailureReason,
}

/// Overall state of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum TransferState {
    Succeeded,
    PartiallyFailed,
    Cancelled,
}

/// The result of executing a planned transfer.
///
/// Every item that was attempted appears exactly once in [`results`].
/// Items the executor never reached because of cancellation are listed in
/// [`not_started`] instead.
///
/// [`results`]: TransferOutcome::results
/// [`not_started`]: TransferOutcome::not_started
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub(crate) mode: TransferMode,
    pub(crate) route: Route,
    pub(crate) source_provider: ProviderId,
    pub(crate) destination_provider: ProviderId,
    pub(crate) destination: Entity,
    pub(crate) results: Vec<ItemResult>,
    pub(crate) not_started: Vec<Entity>,
    pub(crate) cancelled: bool,
}

impl TransferOutcome {
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn source_provider(&self) -> &ProviderId {
        &self.source_provider
    }

    pub fn destination_provider(&self) -> &ProviderId {
        &self.destination_provider
    }

    /// The destination folder.
    pub fn destination(&self) -> &Entity {
        &self.destination
    }

    pub fn results(&self) -> &[ItemResult] {
        &self.results
    }

    /// Items never attempted because the transfer was cancelled.
    pub fn not_started(&self) -> &[Entity] {
        &self.not_started
    }

    /// Succeeded items as `(source, created)` pairs.
    pub fn succeeded(&self) -> impl Iterator<Item = (&Entity, &Entity)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ItemOutcome::Succeeded(created) => Some((&r.source, created)),
            _ => None,
        })
    }

    /// Failed items with their reasons.
    pub fn failed(&self) -> impl Iterator<Item = (&Entity, &FailureReason)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ItemOutcome::Failed(reason) => Some((&r.source, reason)),
            _ => None,
        })
    }

    /// Skipped items with their reasons.
    pub fn skipped(&self) -> impl Iterator<Item = (&Entity, SkipReason)> {
        self.results.iter().filter_map(|r| match r.outcome {
            ItemOutcome::Skipped(reason) => Some((&r.source, reason)),
            _ => None,
        })
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped().count()
    }

    /// Overall state.
    pub fn state(&self) -> TransferState {
        if self.cancelled {
            TransferState::Cancelled
        } else if self.failed_count() > 0 {
            TransferState::PartiallyFailed
        } else {
            TransferState::Succeeded
        }
    }

    /// Check whether no item failed.
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Convert into an error when anything failed or the transfer was
    /// cancelled.
    pub fn into_result(self) -> Result<Self, TransferError> {
        if self.cancelled {
            return Err(TransferError::Cancelled {
                completed: self.succeeded_count(),
            });
        }
        if !self.is_success() {
            let failures = self
                .results
                .into_iter()
                .filter_map(|r| match r.outcome {
                    ItemOutcome::Failed(reason) => Some(ItemFailure {
                        source: r.source,
                        reason,
                    }),
                    _ => None,
                })
                .collect();
            return Err(TransferError::PartialFailure(failures));
        }
        Ok(self)
    }

    /// Get a human-readable summary of the transfer.
    pub fn summary(&self) -> String {
        let action = match self.mode {
            TransferMode::Copy => "Copied",
            TransferMode::Move => "Moved",
        };

        let mut summary = format!("{} {} items", action, self.succeeded_count());
        let failed = self.failed_count();
        if failed > 0 {
            summary.push_str(&format!(", {failed} failed"));
        }
        let skipped = self.skipped_count();
        if skipped > 0 {
            summary.push_str(&format!(", {skipped} skipped"));
        }
        if self.cancelled {
            summary.push_str(&format!(
                " (cancelled, {} not started)",
                self.not_started.len()
            ));
        }
        summary
    }
}
