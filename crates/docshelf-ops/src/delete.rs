//! Deleting entities.

use std::sync::Arc;

use docshelf_core::{
    CancellationToken, Entity, ProgressSink, Provider, ProviderError, ProviderResult,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::OPERATION_CHANNEL_SIZE;
use crate::progress::TransferProgress;

/// Result of deleting a batch of entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteReport {
    pub deleted: Vec<Entity>,
    pub failed: Vec<(Entity, ProviderError)>,
    /// Items never attempted because the batch was cancelled.
    pub not_started: Vec<Entity>,
}

impl DeleteReport {
    /// Check if every item was deleted.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.not_started.is_empty()
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.failed.is_empty() {
            format!("Deleted {} items", self.deleted.len())
        } else {
            format!(
                "Deleted {} items, {} failed",
                self.deleted.len(),
                self.failed.len()
            )
        }
    }
}

/// Result sent through the channel during a background deletion.
#[derive(Debug)]
pub enum DeleteEvent {
    Progress(TransferProgress),
    Complete(DeleteReport),
}

/// Delete entities one at a time, continuing past failures.
pub async fn delete_entities(
    provider: &dyn Provider,
    items: Vec<Entity>,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> DeleteReport {
    let mut report = DeleteReport::default();
    let total = items.len();
    let mut pending = items.into_iter().enumerate();

    while let Some((i, item)) = pending.next() {
        if cancel.is_cancelled() {
            report.not_started.push(item);
            report.not_started.extend(pending.by_ref().map(|(_, item)| item));
            break;
        }

        progress.report(i as f64 / total as f64, Some(&item.title));
        match provider.delete(&item, cancel).await {
            Ok(()) => {
                debug!(item = %item.title, "Deleted");
                report.deleted.push(item);
            }
            Err(e) => {
                warn!(item = %item.title, error = %e, "Delete failed");
                report.failed.push((item, e));
            }
        }
    }

    if total > 0 && !cancel.is_cancelled() {
        progress.report(1.0, None);
    }
    report
}

/// Start background deletion of entities.
///
/// Returns a receiver for progress updates followed by a single
/// [`DeleteEvent::Complete`].
pub fn start_deletion(
    provider: Arc<dyn Provider>,
    items: Vec<Entity>,
    cancel: CancellationToken,
) -> mpsc::Receiver<DeleteEvent> {
    let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);

    tokio::spawn(async move {
        let sink = {
            let tx = tx.clone();
            move |fraction: f64, message: Option<&str>| {
                let _ = tx.try_send(DeleteEvent::Progress(TransferProgress {
                    fraction,
                    current: message.map(str::to_string),
                }));
            }
        };
        let report = delete_entities(provider.as_ref(), items, &sink, &cancel).await;
        let _ = tx.send(DeleteEvent::Complete(report)).await;
    });

    rx
}

/// Permanently purge the provider's trash.
///
/// Sessions showing the trash should be passed to
/// [`apply_trash_emptied`](crate::apply_trash_emptied) afterwards.
pub async fn empty_trash(provider: &dyn Provider, cancel: &CancellationToken) -> ProviderResult<()> {
    provider.empty_trash(cancel).await?;
    info!(provider = %provider.id(), "Trash emptied");
    Ok(())
}
