//! Listing session state machine.
//!
//! A session holds the paginated view of one folder on one provider:
//! accumulated entities, the page cursor, the reported total and the active
//! sort/filter/search parameters.
//!
//! Fetches are split in three phases so the provider call can run on any
//! executor while the session itself stays on the caller's context:
//!
//! 1. `begin_*` updates the state and hands out a [`PageTicket`].
//! 2. [`PageTicket::run`] performs the provider call. The returned future is
//!    `'static` and may be spawned.
//! 3. [`ListingSession::finish`] applies the result, discarding it when a
//!    newer request was submitted in the meantime.
//!
//! The async methods (`load_first_page`, `set_sort`...) chain the three
//! phases for callers that drive the session from a single task.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use compact_str::CompactString;
use docshelf_core::{
    CancellationToken, Entity, EntityUid, FilterSpec, ListingConfig, Page, PageQuery, Provider,
    ProviderError, ProviderResult, SortSpec, normalize_search,
};
use strum::Display;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::debounce::spawn_search_debouncer;
use crate::error::{ListingError, ListingResult};

/// Load state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ListingState {
    /// Nothing loaded yet, or reset.
    Empty,
    /// First page in flight.
    Loading,
    /// At least the first page is loaded and no fetch is in flight.
    Loaded,
    /// A further page is in flight.
    LoadingMore,
    /// The first page failed.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    First,
    Next,
}

/// One page request handed out by a session.
pub struct PageTicket {
    provider: Arc<dyn Provider>,
    query: PageQuery,
    generation: u64,
    kind: FetchKind,
    cancel: CancellationToken,
}

impl PageTicket {
    /// The query this ticket will send.
    pub fn query(&self) -> &PageQuery {
        &self.query
    }

    /// Token that fires when the session supersedes this request.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Perform the provider call.
    pub fn run(&self) -> impl Future<Output = ProviderResult<Page>> + Send + 'static {
        let provider = Arc::clone(&self.provider);
        let query = self.query.clone();
        let cancel = self.cancel.clone();
        async move { provider.fetch_page(&query, &cancel).await }
    }
}

impl std::fmt::Debug for PageTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTicket")
            .field("query", &self.query)
            .field("generation", &self.generation)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Paginated view state over one folder on one provider.
pub struct ListingSession {
    provider: Arc<dyn Provider>,
    folder_id: CompactString,
    config: ListingConfig,
    sort: SortSpec,
    filter: FilterSpec,
    search: Option<CompactString>,
    page: usize,
    buffer: Vec<Entity>,
    total: usize,
    state: ListingState,
    last_error: Option<ProviderError>,
    generation: u64,
    in_flight: Option<CancellationToken>,
}

impl ListingSession {
    /// Create an empty session over `folder_id`.
    pub fn new(
        provider: Arc<dyn Provider>,
        folder_id: impl Into<CompactString>,
        config: ListingConfig,
    ) -> Self {
        Self {
            provider,
            folder_id: folder_id.into(),
            config,
            sort: SortSpec::default(),
            filter: FilterSpec::default(),
            search: None,
            page: 0,
            buffer: Vec::new(),
            total: 0,
            state: ListingState::Empty,
            last_error: None,
            generation: 0,
            in_flight: None,
        }
    }

    /// Create an empty session over the provider's root folder.
    pub fn for_root(provider: Arc<dyn Provider>, config: ListingConfig) -> Self {
        let root = provider.root();
        Self::new(provider, root.id, config)
    }

    // --- accessors ---

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    pub fn config(&self) -> &ListingConfig {
        &self.config
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    /// The normalized search term, if searching.
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Entities in arrival order.
    pub fn buffer(&self) -> &[Entity] {
        &self.buffer
    }

    /// Total item count as last reported by the provider.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn state(&self) -> ListingState {
        self.state
    }

    /// Zero-based cursor of the last requested page.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Check whether another page can be requested.
    pub fn has_more(&self) -> bool {
        matches!(self.state, ListingState::Loaded | ListingState::LoadingMore)
            && self.buffer.len() < self.total
    }

    /// The error of the last failed fetch, kept for retry affordances.
    pub fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    /// Look up a buffered entity.
    pub fn get(&self, uid: &EntityUid) -> Option<&Entity> {
        self.buffer.iter().find(|e| e.uid() == uid)
    }

    // --- split-phase fetches ---

    /// Reset the buffer and start loading the first page.
    ///
    /// Supersedes any fetch in flight.
    pub fn begin_first_page(&mut self) -> PageTicket {
        self.clear();
        self.state = ListingState::Loading;
        self.issue(FetchKind::First)
    }

    /// Start loading the page after the last one.
    pub fn begin_next_page(&mut self) -> ListingResult<PageTicket> {
        match self.state {
            ListingState::Loading | ListingState::LoadingMore => return Err(ListingError::Busy),
            ListingState::Empty | ListingState::Error => return Err(ListingError::NotLoaded),
            ListingState::Loaded => {}
        }
        if !self.has_more() {
            return Err(ListingError::NoMorePages);
        }
        self.page += 1;
        self.state = ListingState::LoadingMore;
        Ok(self.issue(FetchKind::Next))
    }

    /// Apply the result of a ticket's fetch.
    ///
    /// Returns the number of entities added to the buffer.
    pub fn finish(
        &mut self,
        ticket: PageTicket,
        result: ProviderResult<Page>,
    ) -> ListingResult<usize> {
        if ticket.generation != self.generation {
            debug!(
                folder = %self.folder_id,
                page = ticket.query.page,
                "Discarding superseded page"
            );
            return Err(ListingError::Superseded);
        }
        self.in_flight = None;

        match (ticket.kind, result) {
            (FetchKind::First, Ok(page)) => {
                let entities = self.accept(page.entities);
                let added = entities.len();
                self.buffer = entities;
                self.total = page.total.max(added);
                self.state = ListingState::Loaded;
                self.last_error = None;
                debug!(folder = %self.folder_id, added, total = self.total, "Loaded first page");
                Ok(added)
            }
            (FetchKind::First, Err(error)) => {
                warn!(folder = %self.folder_id, %error, "First page failed");
                self.state = ListingState::Error;
                self.last_error = Some(error.clone());
                Err(error.into())
            }
            (FetchKind::Next, Ok(page)) => {
                let entities = self.accept(page.entities);
                let added = entities.len();
                self.buffer.extend(entities);
                self.total = if added == 0 {
                    // The provider ran dry before its reported total.
                    self.buffer.len()
                } else {
                    page.total.max(self.buffer.len())
                };
                self.state = ListingState::Loaded;
                self.last_error = None;
                debug!(
                    folder = %self.folder_id,
                    page = self.page,
                    added,
                    total = self.total,
                    "Loaded next page"
                );
                Ok(added)
            }
            (FetchKind::Next, Err(error)) => {
                warn!(folder = %self.folder_id, page = self.page, %error, "Next page failed");
                self.page = self.page.saturating_sub(1);
                self.state = ListingState::Loaded;
                self.last_error = Some(error.clone());
                Err(error.into())
            }
        }
    }

    /// Store a new sort order and start reloading.
    pub fn apply_sort(&mut self, sort: SortSpec) -> PageTicket {
        self.sort = sort;
        self.begin_first_page()
    }

    /// Store new filter parameters and start reloading.
    pub fn apply_filter(&mut self, filter: FilterSpec) -> PageTicket {
        self.filter = filter;
        self.begin_first_page()
    }

    /// Start a search debouncer with this session's quiet window.
    ///
    /// Raw keystrokes go into the sender. Each term the receiver yields is
    /// meant for [`ListingSession::set_search`] or
    /// [`ListingSession::apply_search`], with `None` passed as `""`.
    pub fn search_debouncer(
        &self,
    ) -> (mpsc::Sender<String>, mpsc::Receiver<Option<CompactString>>) {
        spawn_search_debouncer(self.config.search_debounce())
    }

    /// Normalize and store a search term, starting a reload when it changed.
    pub fn apply_search(&mut self, raw: &str) -> Option<PageTicket> {
        let term = normalize_search(raw);
        if term == self.search {
            return None;
        }
        self.search = term;
        Some(self.begin_first_page())
    }

    // --- async conveniences ---

    /// Reset and load the first page.
    pub async fn load_first_page(&mut self) -> ListingResult<usize> {
        let ticket = self.begin_first_page();
        self.complete(ticket).await
    }

    /// Load and append the next page.
    pub async fn load_next_page(&mut self) -> ListingResult<usize> {
        let ticket = self.begin_next_page()?;
        self.complete(ticket).await
    }

    /// Re-issue the request that last failed.
    pub async fn retry(&mut self) -> ListingResult<usize> {
        match self.state {
            ListingState::Empty | ListingState::Error => self.load_first_page().await,
            _ => self.load_next_page().await,
        }
    }

    pub async fn set_sort(&mut self, sort: SortSpec) -> ListingResult<usize> {
        let ticket = self.apply_sort(sort);
        self.complete(ticket).await
    }

    pub async fn set_filter(&mut self, filter: FilterSpec) -> ListingResult<usize> {
        let ticket = self.apply_filter(filter);
        self.complete(ticket).await
    }

    /// Set the search term. Returns `false` when the normalized term is
    /// unchanged and nothing was reloaded.
    pub async fn set_search(&mut self, raw: &str) -> ListingResult<bool> {
        match self.apply_search(raw) {
            Some(ticket) => self.complete(ticket).await.map(|_| true),
            None => Ok(false),
        }
    }

    // --- lifecycle ---

    /// Point the session at another folder. The session is left empty.
    pub fn change_folder(&mut self, folder_id: impl Into<CompactString>) {
        self.folder_id = folder_id.into();
        self.reset();
    }

    /// Point the session at another provider and folder. The session is
    /// left empty.
    pub fn change_provider(
        &mut self,
        provider: Arc<dyn Provider>,
        folder_id: impl Into<CompactString>,
    ) {
        self.provider = provider;
        self.change_folder(folder_id);
    }

    /// Drop every loaded entity and cancel any fetch in flight.
    pub fn reset(&mut self) {
        self.clear();
        self.state = ListingState::Empty;
        self.last_error = None;
    }

    // --- local mutations, never calling the provider ---

    /// Insert an entity at `index` (clamped). Returns `false` when an entity
    /// with the same uid is already buffered.
    pub fn insert(&mut self, index: usize, entity: Entity) -> bool {
        if self.get(entity.uid()).is_some() {
            return false;
        }
        let index = index.min(self.buffer.len());
        self.buffer.insert(index, entity);
        self.total += 1;
        true
    }

    /// Remove an entity by uid.
    pub fn remove(&mut self, uid: &EntityUid) -> Option<Entity> {
        let index = self.buffer.iter().position(|e| e.uid() == uid)?;
        self.total = self.total.saturating_sub(1);
        Some(self.buffer.remove(index))
    }

    /// Apply an authoritative update to the entity with `uid`, keeping its
    /// position and uid.
    pub fn replace(&mut self, uid: &EntityUid, update: Entity) -> bool {
        self.buffer
            .iter_mut()
            .find(|e| e.uid() == uid)
            .is_some_and(|entity| entity.refresh_from(update))
    }

    // --- internals ---

    async fn complete(&mut self, ticket: PageTicket) -> ListingResult<usize> {
        let result = ticket.run().await;
        self.finish(ticket, result)
    }

    fn clear(&mut self) {
        self.supersede();
        self.page = 0;
        self.buffer.clear();
        self.total = 0;
    }

    fn supersede(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
        self.generation += 1;
    }

    fn issue(&mut self, kind: FetchKind) -> PageTicket {
        if kind == FetchKind::Next {
            self.generation += 1;
        }
        let cancel = CancellationToken::new();
        self.in_flight = Some(cancel.clone());

        let mut query = PageQuery::first(self.folder_id.clone(), self.config.page_size);
        query.page = self.page;
        query.sort = self.sort;
        query.filter = self.filter.clone();
        query.search = self.search.clone();

        debug!(folder = %self.folder_id, page = query.page, "Requesting page");
        PageTicket {
            provider: Arc::clone(&self.provider),
            query,
            generation: self.generation,
            kind,
            cancel,
        }
    }

    /// Keep entities that belong in this view and are not buffered yet.
    fn accept(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let enforce_parent = self.config.enforce_parent && self.search.is_none();
        let mut seen: HashSet<EntityUid> = self.buffer.iter().map(|e| e.uid().clone()).collect();
        let received = entities.len();

        let accepted: Vec<Entity> = entities
            .into_iter()
            .filter(|e| !enforce_parent || e.is_child_of(&self.folder_id))
            .filter(|e| seen.insert(e.uid().clone()))
            .collect();

        if accepted.len() < received {
            warn!(
                folder = %self.folder_id,
                dropped = received - accepted.len(),
                "Dropped foreign or duplicate entities from page"
            );
        }
        accepted
    }
}

impl Drop for ListingSession {
    fn drop(&mut self) {
        if let Some(token) = self.in_flight.take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for ListingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingSession")
            .field("provider", self.provider.id())
            .field("folder_id", &self.folder_id)
            .field("state", &self.state)
            .field("page", &self.page)
            .field("buffered", &self.buffer.len())
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use docshelf_core::ProviderId;
    use docshelf_providers::MemoryProvider;

    use super::*;

    fn session() -> ListingSession {
        let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new("mem"));
        ListingSession::new(provider, "root", ListingConfig::default())
    }

    #[test]
    fn test_accept_drops_foreign_parents_outside_search() {
        let mut session = session();
        let p = ProviderId::new("mem");
        let entities = vec![
            Entity::file(&p, "1", "here.txt", Some("root")),
            Entity::file(&p, "2", "elsewhere.txt", Some("other")),
        ];

        assert_eq!(session.accept(entities.clone()).len(), 1);

        session.search = Some("txt".into());
        assert_eq!(session.accept(entities).len(), 2);
    }

    #[test]
    fn test_accept_skips_buffered_uids() {
        let mut session = session();
        let p = ProviderId::new("mem");
        let file = Entity::file(&p, "1", "a.txt", Some("root"));
        session.buffer.push(file.clone());

        assert!(session.accept(vec![file]).is_empty());
    }

    #[test]
    fn test_next_page_requires_loaded_state() {
        let mut session = session();
        assert_eq!(
            session.begin_next_page().unwrap_err(),
            ListingError::NotLoaded
        );

        let _ticket = session.begin_first_page();
        assert_eq!(session.begin_next_page().unwrap_err(), ListingError::Busy);
    }

    #[test]
    fn test_local_mutations_track_total() {
        let mut session = session();
        let p = ProviderId::new("mem");
        let a = Entity::file(&p, "1", "a.txt", Some("root"));
        let b = Entity::file(&p, "2", "b.txt", Some("root"));

        assert!(session.insert(0, a.clone()));
        assert!(session.insert(0, b.clone()));
        assert!(!session.insert(5, a.clone()));
        assert_eq!(session.total(), 2);
        assert_eq!(session.buffer()[0].title, "b.txt");

        let renamed = Entity::file(&p, "1", "renamed.txt", Some("root"));
        assert!(session.replace(a.uid(), renamed));
        assert_eq!(session.get(a.uid()).unwrap().title, "renamed.txt");

        assert!(session.remove(b.uid()).is_some());
        assert!(session.remove(b.uid()).is_none());
        assert_eq!(session.total(), 1);
    }
}
