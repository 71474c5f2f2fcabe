//! Transfer execution over the intra-provider and cross-provider routes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use docshelf_core::{
    BoxFuture, ByteStream, CancellationToken, Entity, EntityUid, ProgressSink, ProviderError,
    ProviderResult, ServerTransfer, TransferConfig, collect_children,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ExecError;
use crate::outcome::{
    FailureReason, FailureStage, ItemOutcome, ItemResult, SkipReason, TransferOutcome,
};
use crate::planner::{PlannedTransfer, Route};
use crate::progress::{ChannelSink, ProgressGate, TransferEvent};

/// Runs planned transfers.
#[derive(Debug, Clone, Default)]
pub struct TransferExecutor {
    config: TransferConfig,
}

impl TransferExecutor {
    /// Create an executor with the given transfer settings.
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Execute a plan to completion.
    ///
    /// Progress reaches `progress` as a single non-decreasing fraction.
    /// Once `cancel` fires the item in flight is abandoned and reported as
    /// skipped; later items end up in [`TransferOutcome::not_started`].
    pub async fn execute(
        &self,
        plan: PlannedTransfer,
        progress: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, ExecError> {
        let gate = Arc::new(ProgressGate::new(progress));

        if plan.route == Route::Intra
            && !plan
                .source
                .supports_server_side_transfer(plan.destination_provider.as_ref())
        {
            return Err(ExecError::RouteUnavailable);
        }

        let mut outcome = TransferOutcome {
            mode: plan.mode,
            route: plan.route,
            source_provider: plan.source.id().clone(),
            destination_provider: plan.destination_provider.id().clone(),
            destination: plan.destination.clone(),
            results: plan
                .skipped
                .iter()
                .map(|(item, reason)| ItemResult {
                    source: item.clone(),
                    outcome: ItemOutcome::Skipped(*reason),
                })
                .collect(),
            not_started: Vec::new(),
            cancelled: false,
        };

        info!(
            mode = %plan.mode,
            route = %plan.route,
            items = plan.items.len(),
            "Starting transfer"
        );

        if !plan.items.is_empty() {
            match plan.route {
                Route::Intra => self.run_intra(&plan, &gate, cancel, &mut outcome).await,
                Route::Cross => self.run_cross(&plan, &gate, cancel, &mut outcome).await,
            }
        }

        outcome.cancelled = cancel.is_cancelled();
        if !outcome.cancelled {
            gate.report(1.0, None);
        }

        info!(state = %outcome.state(), "{}", outcome.summary());
        Ok(outcome)
    }

    /// Start a transfer on a background task.
    ///
    /// Returns a receiver for progress updates followed by a single
    /// [`TransferEvent::Complete`].
    pub fn start(
        &self,
        plan: PlannedTransfer,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TransferEvent> {
        let (tx, rx) = mpsc::channel(self.config.progress_channel_size);
        let executor = self.clone();
        let sink: Arc<dyn ProgressSink> = Arc::new(ChannelSink { tx: tx.clone() });

        tokio::spawn(async move {
            let run = tokio::spawn(async move { executor.execute(plan, sink, &cancel).await });
            let result = match run.await {
                Ok(result) => result,
                Err(e) => Err(ExecError::TaskFailed(e.to_string())),
            };
            let _ = tx.send(TransferEvent::Complete(result)).await;
        });

        rx
    }

    /// One server-side call for every item.
    async fn run_intra(
        &self,
        plan: &PlannedTransfer,
        gate: &Arc<ProgressGate>,
        cancel: &CancellationToken,
        outcome: &mut TransferOutcome,
    ) {
        let transfer = ServerTransfer {
            items: &plan.items,
            destination: &plan.destination,
            mode: plan.mode,
            overwrite: plan.overwrite,
        };

        match plan
            .source
            .server_side_transfer(transfer, gate.as_ref(), cancel)
            .await
        {
            Ok(reports) => {
                let mut by_uid: HashMap<EntityUid, ProviderResult<Entity>> = reports
                    .into_iter()
                    .map(|report| (report.uid, report.result))
                    .collect();

                for item in &plan.items {
                    let item_outcome = match by_uid.remove(item.uid()) {
                        Some(Ok(created)) => ItemOutcome::Succeeded(created),
                        Some(Err(ProviderError::Cancelled)) => {
                            ItemOutcome::Skipped(SkipReason::UserSkip)
                        }
                        Some(Err(e)) => {
                            warn!(item = %item.title, error = %e, "Server-side transfer failed");
                            ItemOutcome::Failed(FailureReason::new(FailureStage::ServerSide, e))
                        }
                        None if cancel.is_cancelled() => {
                            outcome.not_started.push(item.clone());
                            continue;
                        }
                        None => ItemOutcome::Failed(FailureReason::new(
                            FailureStage::ServerSide,
                            ProviderError::Other {
                                message: "No result reported for item".to_string(),
                            },
                        )),
                    };
                    outcome.results.push(ItemResult {
                        source: item.clone(),
                        outcome: item_outcome,
                    });
                }
            }
            Err(e) => {
                let cancelled = e.is_cancelled();
                if !cancelled {
                    warn!(error = %e, "Server-side transfer call failed");
                }
                outcome.results.extend(plan.items.iter().map(|item| ItemResult {
                    source: item.clone(),
                    outcome: if cancelled {
                        ItemOutcome::Skipped(SkipReason::UserSkip)
                    } else {
                        ItemOutcome::Failed(FailureReason::new(FailureStage::ServerSide, e.clone()))
                    },
                }));
            }
        }
    }

    /// Stream every item through the device, strictly one after another.
    async fn run_cross(
        &self,
        plan: &PlannedTransfer,
        gate: &Arc<ProgressGate>,
        cancel: &CancellationToken,
        outcome: &mut TransferOutcome,
    ) {
        let total = plan.items.len();
        let mut pending = plan.items.iter().enumerate();
        let mut created_folders = HashSet::new();

        while let Some((index, item)) = pending.next() {
            if cancel.is_cancelled() {
                outcome.not_started.push(item.clone());
                outcome
                    .not_started
                    .extend(pending.by_ref().map(|(_, item)| item.clone()));
                break;
            }

            let scope = ItemScope {
                gate: Arc::clone(gate),
                index,
                total,
                title: item.title.to_string(),
            };
            scope.report(0.0);

            let item_outcome = match self
                .transfer_item(plan, item, &scope, &mut created_folders, cancel)
                .await
            {
                Ok(created) => ItemOutcome::Succeeded(created),
                Err(reason)
                    if cancel.is_cancelled() && reason.stage != FailureStage::DeleteSource =>
                {
                    ItemOutcome::Skipped(SkipReason::UserSkip)
                }
                Err(reason) => {
                    warn!(item = %item.title, %reason, "Transfer item failed");
                    ItemOutcome::Failed(reason)
                }
            };
            outcome.results.push(ItemResult {
                source: item.clone(),
                outcome: item_outcome,
            });
            scope.report(1.0);
        }
    }

    /// Copy one top-level item, then delete the source when moving.
    async fn transfer_item(
        &self,
        plan: &PlannedTransfer,
        item: &Entity,
        scope: &ItemScope,
        created_folders: &mut HashSet<EntityUid>,
        cancel: &CancellationToken,
    ) -> Result<Entity, FailureReason> {
        let created = self
            .copy_entity(plan, item, &plan.destination, Some(scope), created_folders, cancel)
            .await?;

        if plan.mode.is_move() {
            // Once the copy has landed the source delete runs to completion.
            plan.source
                .delete(item, &CancellationToken::new())
                .await
                .map_err(|e| FailureReason::new(FailureStage::DeleteSource, e))?;
        }

        debug!(item = %item.title, created = %created.id, "Item transferred");
        Ok(created)
    }

    /// Copy a file, or a folder with everything below it.
    ///
    /// Byte progress is only reported for top-level files. Folders created by
    /// this transfer are never copied again, even when they turn up while
    /// enumerating a source folder.
    fn copy_entity<'a>(
        &'a self,
        plan: &'a PlannedTransfer,
        item: &'a Entity,
        into: &'a Entity,
        scope: Option<&'a ItemScope>,
        created_folders: &'a mut HashSet<EntityUid>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Entity, FailureReason>> {
        Box::pin(async move {
            if item.is_folder() {
                let folder = plan
                    .destination_provider
                    .create_folder(into, &item.title, plan.overwrite, cancel)
                    .await
                    .map_err(|e| FailureReason::new(FailureStage::CreateFolder, e))?;
                created_folders.insert(folder.uid().clone());

                let children = collect_children(
                    plan.source.as_ref(),
                    &item.id,
                    self.config.children_page_size,
                    cancel,
                )
                .await
                .map_err(|e| FailureReason::new(FailureStage::Enumerate, e))?;

                for child in &children {
                    if created_folders.contains(child.uid()) {
                        debug!(folder = %child.title, "Skipping folder created by this transfer");
                        continue;
                    }
                    self.copy_entity(plan, child, &folder, None, &mut *created_folders, cancel)
                        .await?;
                }
                return Ok(folder);
            }

            let download = plan
                .source
                .download(item, cancel)
                .await
                .map_err(|e| FailureReason::new(FailureStage::Download, e))?;

            let source_error = Arc::new(Mutex::new(None));
            let tracked = track(
                download,
                ByteTracker {
                    seen: 0,
                    scope: scope.cloned(),
                    cancel: cancel.clone(),
                    source_error: Arc::clone(&source_error),
                },
            );

            match plan
                .destination_provider
                .upload(tracked, into, &item.title, plan.overwrite, cancel)
                .await
            {
                Ok(created) => Ok(created),
                Err(e) => {
                    let source_failed = source_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    Err(match source_failed {
                        Some(source_failed) => {
                            FailureReason::new(FailureStage::Download, source_failed)
                        }
                        None => FailureReason::new(FailureStage::Upload, e),
                    })
                }
            }
        })
    }
}

/// Execute a plan with default transfer settings.
pub async fn execute_transfer(
    plan: PlannedTransfer,
    progress: Arc<dyn ProgressSink>,
    cancel: &CancellationToken,
) -> Result<TransferOutcome, ExecError> {
    TransferExecutor::default()
        .execute(plan, progress, cancel)
        .await
}

/// Maps one item's own progress onto the overall fraction.
#[derive(Clone)]
struct ItemScope {
    gate: Arc<ProgressGate>,
    index: usize,
    total: usize,
    title: String,
}

impl ItemScope {
    fn report(&self, item_fraction: f64) {
        let overall = (self.index as f64 + item_fraction.clamp(0.0, 1.0)) / self.total as f64;
        self.gate.report(overall, Some(&self.title));
    }
}

/// Observes chunks flowing from the download into the upload.
struct ByteTracker {
    seen: u64,
    scope: Option<ItemScope>,
    cancel: CancellationToken,
    source_error: Arc<Mutex<Option<ProviderError>>>,
}

impl ByteTracker {
    fn observe(
        &mut self,
        chunk: ProviderResult<Vec<u8>>,
        len: Option<u64>,
    ) -> ProviderResult<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                *self
                    .source_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.clone());
                return Err(e);
            }
        };

        self.seen += bytes.len() as u64;
        if let (Some(scope), Some(len)) = (&self.scope, len) {
            if len > 0 {
                scope.report(self.seen as f64 / len as f64);
            }
        }

        // Progress sinks may cancel; stop before handing over another chunk.
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(bytes)
    }
}

fn track(stream: ByteStream, mut tracker: ByteTracker) -> ByteStream {
    let len = stream.len_hint();
    ByteStream::new(len, stream.map(move |chunk| tracker.observe(chunk, len)))
}
