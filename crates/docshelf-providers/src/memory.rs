//! In-memory provider.
//!
//! Deterministic ids and timestamps, optional latency, and failure injection
//! per operation make it the reference backend for engine tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use compact_str::{CompactString, ToCompactString};
use docshelf_core::{
    BoxFuture, ByteStream, CancellationToken, Capabilities, Entity, ItemReport, Page, PageQuery,
    ProgressSink, Provider, ProviderError, ProviderId, ProviderResult, ServerTransfer,
    TransferMode, with_cancel,
};
use futures::StreamExt;
use indexmap::IndexMap;
use strum::Display;
use tracing::debug;

use crate::query::page_from;

/// Id of the root folder.
pub const ROOT_ID: &str = "root";

/// Id of the trash folder. It is a second root, never listed under [`ROOT_ID`].
pub const TRASH_ID: &str = "trash";

const ROOT_TITLE: &str = "My Documents";
const TRASH_TITLE: &str = "Trash";

// 2023-11-14T22:13:20Z, start of the logical clock.
const CLOCK_BASE: i64 = 1_700_000_000;

/// Provider operations, used for failure injection and call inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Entity,
    FetchPage,
    CheckConflicts,
    ServerSideTransfer,
    Download,
    Upload,
    CreateFolder,
    Rename,
    Delete,
    EmptyTrash,
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    target: Option<CompactString>,
    error: ProviderError,
    remaining: Option<usize>,
}

impl FailureRule {
    fn matches(&self, operation: Operation, targets: &[&str]) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && self
                .target
                .as_deref()
                .is_none_or(|target| targets.contains(&target))
    }
}

#[derive(Debug, Clone)]
struct Node {
    entity: Entity,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct Store {
    nodes: IndexMap<CompactString, Node>,
    next_id: u64,
    clock: i64,
}

impl Store {
    fn next_id(&mut self) -> CompactString {
        self.next_id += 1;
        self.next_id.to_compact_string()
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::from_timestamp(CLOCK_BASE + self.clock, 0).unwrap_or_default()
    }

    fn insert(&mut self, entity: Entity, content: Vec<u8>) {
        self.nodes
            .insert(entity.id.clone(), Node { entity, content });
    }

    fn get(&self, id: &str) -> ProviderResult<&Node> {
        self.nodes.get(id).ok_or_else(|| ProviderError::not_found(id))
    }

    fn folder(&self, id: &str) -> ProviderResult<&Entity> {
        match self.nodes.get(id) {
            Some(node) if node.entity.is_folder() => Ok(&node.entity),
            _ => Err(ProviderError::not_found(id)),
        }
    }

    fn children<'a>(&'a self, folder_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |node| node.entity.is_child_of(folder_id))
    }

    fn find_child<'a>(
        &'a self,
        folder_id: &'a str,
        title: &str,
        caps: &Capabilities,
    ) -> Option<&'a Node> {
        self.children(folder_id)
            .find(|node| caps.titles_collide(&node.entity.title, title))
    }

    fn descendants(&self, folder_id: &str) -> Vec<CompactString> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([CompactString::from(folder_id)]);
        while let Some(current) = queue.pop_front() {
            for node in self.children(&current) {
                found.push(node.entity.id.clone());
                if node.entity.is_folder() {
                    queue.push_back(node.entity.id.clone());
                }
            }
        }
        found
    }

    /// Check whether `id` sits somewhere below `ancestor`.
    fn is_within(&self, id: &str, ancestor: &str) -> bool {
        let mut current = self.nodes.get(id).and_then(|n| n.entity.parent_id.clone());
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes.get(&parent).and_then(|n| n.entity.parent_id.clone());
        }
        false
    }

    fn remove_tree(&mut self, id: &str) {
        for descendant in self.descendants(id) {
            self.nodes.shift_remove(&descendant);
        }
        self.nodes.shift_remove(id);
    }

    fn copy_tree(
        &mut self,
        provider: &ProviderId,
        id: &str,
        new_parent: &str,
    ) -> ProviderResult<Entity> {
        let source = self.get(id)?.clone();
        let new_id = self.next_id();

        let mut copy = if source.entity.is_folder() {
            Entity::folder(provider, new_id.clone(), source.entity.title.clone(), Some(new_parent))
        } else {
            Entity::file(provider, new_id.clone(), source.entity.title.clone(), Some(new_parent))
        };
        copy.kind = source.entity.kind.clone();
        copy.author = source.entity.author.clone();
        self.insert(copy.clone(), source.content);

        let children: Vec<CompactString> =
            self.children(id).map(|n| n.entity.id.clone()).collect();
        for child in children {
            self.copy_tree(provider, &child, &new_id)?;
        }
        Ok(copy)
    }

    fn transfer_one(
        &mut self,
        provider: &ProviderId,
        caps: &Capabilities,
        item: &Entity,
        destination_id: &str,
        mode: TransferMode,
        overwrite: bool,
    ) -> ProviderResult<Entity> {
        self.folder(destination_id)?;
        self.get(&item.id)?;
        if item.id == destination_id || self.is_within(destination_id, &item.id) {
            return Err(ProviderError::Other {
                message: format!(
                    "Cannot {} '{}' into itself",
                    mode.to_string().to_lowercase(),
                    item.title
                ),
            });
        }

        let existing = self
            .find_child(destination_id, &item.title, caps)
            .map(|n| n.entity.id.clone());
        if let Some(existing) = existing {
            if existing == item.id {
                return Ok(self.get(&item.id)?.entity.clone());
            }
            if !overwrite {
                return Err(ProviderError::already_exists(item.title.clone()));
            }
            self.remove_tree(&existing);
        }

        match mode {
            TransferMode::Move => {
                let node = self
                    .nodes
                    .get_mut(item.id.as_str())
                    .ok_or_else(|| ProviderError::not_found(item.id.clone()))?;
                node.entity.parent_id = Some(destination_id.into());
                Ok(node.entity.clone())
            }
            TransferMode::Copy => self.copy_tree(provider, &item.id, destination_id),
        }
    }

    fn put_file(
        &mut self,
        provider: &ProviderId,
        caps: &Capabilities,
        folder_id: &str,
        title: &str,
        content: Vec<u8>,
        overwrite: bool,
    ) -> ProviderResult<Entity> {
        self.folder(folder_id)?;
        let stamp = self.tick();

        let existing = self
            .find_child(folder_id, title, caps)
            .map(|n| (n.entity.id.clone(), n.entity.is_file()));
        let id = match existing {
            Some(_) if !overwrite => return Err(ProviderError::already_exists(title)),
            Some((id, true)) => id,
            Some((id, false)) => {
                self.remove_tree(&id);
                self.next_id()
            }
            None => self.next_id(),
        };

        let entity = Entity::file(provider, id, title, Some(folder_id))
            .with_size(content.len() as u64)
            .with_updated_at(stamp);
        self.insert(entity.clone(), content);
        Ok(entity)
    }
}

fn check_title(title: &str) -> ProviderResult<()> {
    if title.trim().is_empty() {
        return Err(ProviderError::invalid_name(title, "Name cannot be empty"));
    }
    if title.contains('/') {
        return Err(ProviderError::invalid_name(title, "Name cannot contain '/'"));
    }
    Ok(())
}

/// Read a byte stream to the end, stopping as soon as `cancel` fires.
async fn drain(mut data: ByteStream, cancel: &CancellationToken) -> ProviderResult<Vec<u8>> {
    let mut buffer = Vec::with_capacity(data.len_hint().unwrap_or(0) as usize);
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            next = data.next() => next,
        };
        match next {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(buffer),
        }
    }
}

/// An in-memory backend account.
pub struct MemoryProvider {
    id: ProviderId,
    capabilities: Capabilities,
    page_size: usize,
    chunk_size: usize,
    latency: Duration,
    store: RwLock<Store>,
    failures: Mutex<Vec<FailureRule>>,
    calls: Mutex<Vec<(Operation, CompactString)>>,
}

impl MemoryProvider {
    /// Create an empty account with a root and a trash folder.
    pub fn new(id: impl Into<CompactString>) -> Self {
        let id = ProviderId::new(id);
        let mut store = Store::default();
        store.insert(Entity::folder(&id, ROOT_ID, ROOT_TITLE, None), Vec::new());
        store.insert(Entity::folder(&id, TRASH_ID, TRASH_TITLE, None), Vec::new());

        Self {
            id,
            capabilities: Capabilities {
                server_side_transfer: true,
                case_sensitive_titles: false,
                conflict_check_best_effort: false,
                server_side_paging: true,
                trash: true,
            },
            page_size: usize::MAX,
            chunk_size: 64 * 1024,
            latency: Duration::ZERO,
            store: RwLock::new(store),
            failures: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Cap the number of entities returned per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the chunk size of download streams.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Delay every operation by `latency`, and every item of a server-side
    /// transfer once more. The delay observes cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replace the reported capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Seed a folder.
    pub fn add_folder(&self, parent_id: &str, title: &str) -> Entity {
        let mut store = self.write();
        let id = store.next_id();
        let entity = Entity::folder(&self.id, id, title, Some(parent_id));
        store.insert(entity.clone(), Vec::new());
        entity
    }

    /// Seed a file.
    pub fn add_file(&self, parent_id: &str, title: &str, content: impl Into<Vec<u8>>) -> Entity {
        let content = content.into();
        let mut store = self.write();
        let id = store.next_id();
        let stamp = store.tick();
        let entity = Entity::file(&self.id, id, title, Some(parent_id))
            .with_size(content.len() as u64)
            .with_updated_at(stamp);
        store.insert(entity.clone(), content);
        entity
    }

    /// Make `operation` fail with `error`.
    ///
    /// With a target the rule only applies to calls on an entity whose id or
    /// title equals it (for `upload`, the uploaded title or destination id).
    pub fn fail_on(&self, operation: Operation, target: Option<&str>, error: ProviderError) {
        self.push_rule(operation, target, error, None);
    }

    /// Like [`MemoryProvider::fail_on`], but the rule fires only once.
    pub fn fail_once_on(&self, operation: Operation, target: Option<&str>, error: ProviderError) {
        self.push_rule(operation, target, error, Some(1));
    }

    /// Remove every failure rule.
    pub fn clear_failures(&self) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Targets of every recorded call to `operation`, in call order.
    pub fn calls(&self, operation: Operation) -> Vec<CompactString> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, target)| target.clone())
            .collect()
    }

    /// Current direct children of a folder, in insertion order.
    pub fn children(&self, folder_id: &str) -> Vec<Entity> {
        self.read()
            .children(folder_id)
            .map(|n| n.entity.clone())
            .collect()
    }

    /// Find a direct child by title.
    pub fn find(&self, folder_id: &str, title: &str) -> Option<Entity> {
        self.read()
            .find_child(folder_id, title, &self.capabilities)
            .map(|n| n.entity.clone())
    }

    /// Content of a stored file.
    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.read()
            .nodes
            .get(id)
            .filter(|n| n.entity.is_file())
            .map(|n| n.content.clone())
    }

    fn push_rule(
        &self,
        operation: Operation,
        target: Option<&str>,
        error: ProviderError,
        remaining: Option<usize>,
    ) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailureRule {
                operation,
                target: target.map(CompactString::from),
                error,
                remaining,
            });
    }

    fn read(&self) -> RwLockReadGuard<'_, Store> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Store> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected(&self, operation: Operation, targets: &[&str]) -> ProviderResult<()> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.iter_mut().find(|rule| rule.matches(operation, targets)) {
            Some(rule) => {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                debug!(%operation, ?targets, "Injected failure");
                Err(rule.error.clone())
            }
            None => Ok(()),
        }
    }

    /// Record the call, apply latency and cancellation, then failure rules.
    async fn enter(
        &self,
        operation: Operation,
        targets: &[&str],
        cancel: &CancellationToken,
    ) -> ProviderResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((operation, targets.first().copied().unwrap_or_default().into()));

        self.delay(cancel).await?;
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.injected(operation, targets)
    }

    /// Sleep for the configured latency, observing cancellation.
    async fn delay(&self, cancel: &CancellationToken) -> ProviderResult<()> {
        if self.latency.is_zero() {
            return Ok(());
        }
        with_cancel(cancel, async {
            tokio::time::sleep(self.latency).await;
            Ok(())
        })
        .await
    }
}

impl Provider for MemoryProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn display_name(&self) -> String {
        format!("Memory ({})", self.id)
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn root(&self) -> Entity {
        Entity::folder(&self.id, ROOT_ID, ROOT_TITLE, None)
    }

    fn entity<'a>(
        &'a self,
        id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        Box::pin(async move {
            self.enter(Operation::Entity, &[id], cancel).await?;
            let store = self.read();
            store.get(id).map(|n| n.entity.clone())
        })
    }

    fn fetch_page<'a>(
        &'a self,
        query: &'a PageQuery,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Page>> {
        Box::pin(async move {
            self.enter(Operation::FetchPage, &[query.folder_id.as_str()], cancel)
                .await?;
            let store = self.read();
            store.folder(&query.folder_id)?;

            // Search spans every folder below the listed one.
            let candidates: Vec<Entity> = if query.search.is_some() {
                store
                    .descendants(&query.folder_id)
                    .iter()
                    .filter_map(|id| store.nodes.get(id))
                    .map(|n| n.entity.clone())
                    .collect()
            } else {
                store
                    .children(&query.folder_id)
                    .map(|n| n.entity.clone())
                    .collect()
            };

            let page = page_from(candidates, query, self.page_size);
            debug!(
                folder = %query.folder_id,
                page = query.page,
                returned = page.entities.len(),
                total = page.total,
                "Fetched page"
            );
            Ok(page)
        })
    }

    fn check_conflicts<'a>(
        &'a self,
        items: &'a [Entity],
        destination: &'a Entity,
        _page_size: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Vec<Entity>>> {
        Box::pin(async move {
            self.enter(Operation::CheckConflicts, &[destination.id.as_str()], cancel)
                .await?;
            let store = self.read();
            store.folder(&destination.id)?;
            Ok(items
                .iter()
                .filter(|item| {
                    store
                        .children(&destination.id)
                        .any(|n| {
                            n.entity.uid() != item.uid()
                                && self.capabilities.titles_collide(&n.entity.title, &item.title)
                        })
                })
                .cloned()
                .collect())
        })
    }

    fn server_side_transfer<'a>(
        &'a self,
        transfer: ServerTransfer<'a>,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Vec<ItemReport>>> {
        Box::pin(async move {
            let ServerTransfer {
                items,
                destination,
                mode,
                overwrite,
            } = transfer;
            self.enter(Operation::ServerSideTransfer, &[destination.id.as_str()], cancel)
                .await?;

            let total = items.len().max(1) as f64;
            let mut reports = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                // Stop without rollback; unreported items were never touched.
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = self.delay(cancel).await {
                    reports.push(ItemReport {
                        uid: item.uid().clone(),
                        result: Err(e),
                    });
                    break;
                }
                let result = self
                    .injected(Operation::ServerSideTransfer, &[item.id.as_str(), item.title.as_str()])
                    .and_then(|()| {
                        self.write().transfer_one(
                            &self.id,
                            &self.capabilities,
                            item,
                            &destination.id,
                            mode,
                            overwrite,
                        )
                    });
                progress.report((index + 1) as f64 / total, Some(&item.title));
                reports.push(ItemReport {
                    uid: item.uid().clone(),
                    result,
                });
            }
            Ok(reports)
        })
    }

    fn download<'a>(
        &'a self,
        entity: &'a Entity,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<ByteStream>> {
        Box::pin(async move {
            self.enter(Operation::Download, &[entity.id.as_str(), entity.title.as_str()], cancel)
                .await?;
            let store = self.read();
            let node = store.get(&entity.id)?;
            if node.entity.is_folder() {
                return Err(ProviderError::Unsupported {
                    operation: "download folder",
                });
            }
            Ok(ByteStream::from_bytes(node.content.clone(), self.chunk_size))
        })
    }

    fn upload<'a>(
        &'a self,
        data: ByteStream,
        destination: &'a Entity,
        title: &'a str,
        overwrite: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        Box::pin(async move {
            self.enter(Operation::Upload, &[title, destination.id.as_str()], cancel)
                .await?;
            check_title(title)?;
            let content = drain(data, cancel).await?;
            self.write().put_file(
                &self.id,
                &self.capabilities,
                &destination.id,
                title,
                content,
                overwrite,
            )
        })
    }

    fn create_folder<'a>(
        &'a self,
        parent: &'a Entity,
        title: &'a str,
        reuse_existing: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        Box::pin(async move {
            self.enter(Operation::CreateFolder, &[title, parent.id.as_str()], cancel)
                .await?;
            check_title(title)?;
            let mut store = self.write();
            store.folder(&parent.id)?;
            if let Some(existing) = store.find_child(&parent.id, title, &self.capabilities) {
                if existing.entity.is_folder() && reuse_existing {
                    return Ok(existing.entity.clone());
                }
                return Err(ProviderError::already_exists(title));
            }

            let id = store.next_id();
            let folder = Entity::folder(&self.id, id, title, Some(&parent.id));
            store.insert(folder.clone(), Vec::new());
            Ok(folder)
        })
    }

    fn rename<'a>(
        &'a self,
        entity: &'a Entity,
        new_title: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        Box::pin(async move {
            self.enter(Operation::Rename, &[entity.id.as_str(), entity.title.as_str()], cancel)
                .await?;
            check_title(new_title)?;
            let mut store = self.write();
            let Some(parent) = store.get(&entity.id)?.entity.parent_id.clone() else {
                return Err(ProviderError::permission_denied(entity.id.clone()));
            };
            let taken = store
                .find_child(&parent, new_title, &self.capabilities)
                .is_some_and(|other| other.entity.id != entity.id);
            if taken {
                return Err(ProviderError::already_exists(new_title));
            }

            let stamp = store.tick();
            let node = store
                .nodes
                .get_mut(entity.id.as_str())
                .ok_or_else(|| ProviderError::not_found(entity.id.clone()))?;
            let mut renamed = node.entity.clone();
            renamed.title = new_title.into();
            if renamed.is_file() {
                renamed = renamed.with_updated_at(stamp);
            }
            node.entity = renamed.clone();
            Ok(renamed)
        })
    }

    fn delete<'a>(
        &'a self,
        entity: &'a Entity,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.enter(Operation::Delete, &[entity.id.as_str(), entity.title.as_str()], cancel)
                .await?;
            let mut store = self.write();
            if store.get(&entity.id)?.entity.parent_id.is_none() {
                return Err(ProviderError::permission_denied(entity.id.clone()));
            }

            if self.capabilities.trash && !store.is_within(&entity.id, TRASH_ID) {
                if let Some(node) = store.nodes.get_mut(entity.id.as_str()) {
                    node.entity.parent_id = Some(TRASH_ID.into());
                }
            } else {
                store.remove_tree(&entity.id);
            }
            Ok(())
        })
    }

    fn empty_trash<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.enter(Operation::EmptyTrash, &[TRASH_ID], cancel).await?;
            if !self.capabilities.trash {
                return Err(ProviderError::Unsupported {
                    operation: "empty_trash",
                });
            }
            let mut store = self.write();
            let trashed: Vec<CompactString> = store
                .children(TRASH_ID)
                .map(|n| n.entity.id.clone())
                .collect();
            for id in trashed {
                store.remove_tree(&id);
            }
            Ok(())
        })
    }

    fn trash_folder_id(&self) -> Option<CompactString> {
        self.capabilities.trash.then(|| TRASH_ID.into())
    }
}
