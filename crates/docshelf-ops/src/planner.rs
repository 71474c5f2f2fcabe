//! Transfer planning: validation, routing and conflict resolution.

use std::collections::HashSet;
use std::sync::Arc;

use docshelf_core::{
    CancellationToken, Entity, Provider, ProviderError, TransferConfig, TransferMode,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};

use crate::conflict::{ConflictPrompt, ConflictResolution, ConflictResolver};
use crate::error::PlanError;
use crate::outcome::SkipReason;

/// How the bytes get from source to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum Route {
    /// One server-side call within a single backend account.
    Intra,
    /// Download from the source, upload to the destination, item by item.
    Cross,
}

/// A request to move or copy entities into a folder.
#[derive(Clone)]
pub struct TransferRequest {
    pub items: Vec<Entity>,
    pub source: Arc<dyn Provider>,
    pub destination_provider: Arc<dyn Provider>,
    pub destination: Entity,
    pub mode: TransferMode,
    /// Page size for enumerating the destination during the conflict check.
    pub page_size: usize,
}

impl TransferRequest {
    pub fn new(
        items: Vec<Entity>,
        source: Arc<dyn Provider>,
        destination_provider: Arc<dyn Provider>,
        destination: Entity,
        mode: TransferMode,
    ) -> Self {
        Self {
            items,
            source,
            destination_provider,
            destination,
            mode,
            page_size: TransferConfig::default().children_page_size,
        }
    }

    /// Take the enumeration page size from transfer settings.
    pub fn with_config(mut self, config: &TransferConfig) -> Self {
        self.page_size = config.children_page_size;
        self
    }
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("items", &self.items.len())
            .field("source", self.source.id())
            .field("destination_provider", self.destination_provider.id())
            .field("destination", &self.destination.id)
            .field("mode", &self.mode)
            .finish()
    }
}

/// A validated transfer, ready for the executor.
#[derive(Clone)]
pub struct PlannedTransfer {
    pub(crate) items: Vec<Entity>,
    pub(crate) skipped: Vec<(Entity, SkipReason)>,
    pub(crate) source: Arc<dyn Provider>,
    pub(crate) destination_provider: Arc<dyn Provider>,
    pub(crate) destination: Entity,
    pub(crate) mode: TransferMode,
    pub(crate) overwrite: bool,
    pub(crate) route: Route,
}

impl PlannedTransfer {
    /// Items the executor will attempt, in request order.
    pub fn items(&self) -> &[Entity] {
        &self.items
    }

    /// Items settled during planning.
    pub fn skipped(&self) -> &[(Entity, SkipReason)] {
        &self.skipped
    }

    pub fn destination(&self) -> &Entity {
        &self.destination
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Whether existing entities at the destination get replaced.
    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Check if there is nothing left to execute.
    pub fn is_noop(&self) -> bool {
        self.items.is_empty()
    }
}

impl std::fmt::Debug for PlannedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedTransfer")
            .field("items", &self.items.len())
            .field("skipped", &self.skipped.len())
            .field("destination", &self.destination.id)
            .field("mode", &self.mode)
            .field("overwrite", &self.overwrite)
            .field("route", &self.route)
            .finish()
    }
}

/// Validate a request, pick its route and resolve destination conflicts.
///
/// Conflicts are always checked. A failed check aborts planning unless the
/// destination provider declares its check best-effort, in which case the
/// plan proceeds as if nothing conflicted.
pub async fn plan_transfer(
    request: TransferRequest,
    resolver: &dyn ConflictResolver,
    cancel: &CancellationToken,
) -> Result<PlannedTransfer, PlanError> {
    let TransferRequest {
        items,
        source,
        destination_provider,
        destination,
        mode,
        page_size,
    } = request;

    if items.is_empty() {
        return Err(PlanError::EmptyRequest);
    }
    if items.iter().any(|item| item.provider_id() != source.id()) {
        return Err(PlanError::MixedSourceProviders);
    }
    if !destination.is_folder() {
        return Err(PlanError::DestinationNotFolder {
            title: destination.title.clone(),
        });
    }

    let same_account = source.id() == destination_provider.id();
    let mut pending = Vec::with_capacity(items.len());
    let mut skipped = Vec::new();

    for item in items.into_iter().unique_by(|item| item.uid().clone()) {
        if same_account && item.id == destination.id {
            return Err(PlanError::DestinationIsSource { title: item.title });
        }
        if same_account && item.is_child_of(&destination.id) {
            debug!(item = %item.title, "Item already in destination");
            skipped.push((item, SkipReason::SamePath));
        } else {
            pending.push(item);
        }
    }

    if same_account && pending.iter().any(Entity::is_folder) {
        reject_enclosing_folders(destination_provider.as_ref(), &pending, &destination, cancel)
            .await?;
    }

    let route = if source.supports_server_side_transfer(destination_provider.as_ref()) {
        Route::Intra
    } else {
        Route::Cross
    };

    let mut overwrite = false;
    if !pending.is_empty() {
        let conflicts = match destination_provider
            .check_conflicts(&pending, &destination, page_size, cancel)
            .await
        {
            Ok(conflicts) => conflicts,
            Err(ProviderError::Cancelled) => return Err(PlanError::UserCancelled),
            Err(e) if destination_provider.capabilities().conflict_check_best_effort => {
                warn!(error = %e, "Conflict check failed, proceeding without it");
                Vec::new()
            }
            Err(e) => return Err(PlanError::ConflictCheck(e)),
        };

        if !conflicts.is_empty() {
            let prompt = ConflictPrompt::new(conflicts, destination.title.clone());
            let resolution = resolver.resolve(&prompt).await;
            debug!(%resolution, conflicts = prompt.conflicts.len(), "Conflicts resolved");

            match resolution {
                ConflictResolution::OverwriteAll => overwrite = true,
                ConflictResolution::SkipConflicting => {
                    let (conflicting, rest): (Vec<_>, Vec<_>) =
                        pending.into_iter().partition(|item| {
                            prompt.conflicts.iter().any(|c| c.uid() == item.uid())
                        });
                    skipped.extend(conflicting.into_iter().map(|item| (item, SkipReason::SamePath)));
                    pending = rest;
                }
                ConflictResolution::Cancel => return Err(PlanError::UserCancelled),
            }
        }
    }

    info!(
        %mode,
        %route,
        items = pending.len(),
        skipped = skipped.len(),
        overwrite,
        "Transfer planned"
    );

    Ok(PlannedTransfer {
        items: pending,
        skipped,
        source,
        destination_provider,
        destination,
        mode,
        overwrite,
        route,
    })
}

/// Fail when a folder item encloses the destination at any depth.
///
/// Walks the destination's parent chain up to the root of its provider.
async fn reject_enclosing_folders(
    provider: &dyn Provider,
    items: &[Entity],
    destination: &Entity,
    cancel: &CancellationToken,
) -> Result<(), PlanError> {
    let mut visited = HashSet::new();
    let mut parent_id = destination.parent_id.clone();

    while let Some(id) = parent_id {
        if let Some(item) = items.iter().find(|item| item.is_folder() && item.id == id) {
            return Err(PlanError::DestinationIsSource {
                title: item.title.clone(),
            });
        }
        if !visited.insert(id.clone()) {
            warn!(folder = %id, "Cycle in destination ancestry");
            break;
        }

        let ancestor = provider.entity(&id, cancel).await.map_err(|e| match e {
            ProviderError::Cancelled => PlanError::UserCancelled,
            e => PlanError::DestinationLookup(e),
        })?;
        parent_id = ancestor.parent_id;
    }
    Ok(())
}
