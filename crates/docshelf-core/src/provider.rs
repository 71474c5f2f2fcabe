//! The provider capability interface.
//!
//! Every storage backend (device storage, the document cloud, OAuth drives,
//! WebDAV servers...) is exposed to the engine through [`Provider`]. The
//! engine never branches on the concrete backend: every cross-cutting decision
//! goes through [`Provider::capabilities`] and
//! [`Provider::supports_server_side_transfer`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use compact_str::CompactString;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Entity, EntityUid, Page, PageQuery, ProgressSink, ProviderError, ProviderId, ProviderResult};

/// Type alias for boxed futures returned by provider methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether a transfer keeps or removes the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    /// Check if this is a move.
    pub fn is_move(&self) -> bool {
        matches!(self, Self::Move)
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
        }
    }
}

/// Capability flags a provider reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Can move/copy within this account without streaming through the device.
    pub server_side_transfer: bool,
    /// Title collisions are case-sensitive. Case-insensitive otherwise.
    pub case_sensitive_titles: bool,
    /// `check_conflicts` is a known best-effort check: when it fails the
    /// engine may proceed as if no conflicts were found.
    pub conflict_check_best_effort: bool,
    /// Paging, sorting and filtering happen on the server. When false the
    /// provider enumerates the whole folder for every page.
    pub server_side_paging: bool,
    /// Deleted entities go to a trash that `empty_trash` can purge.
    pub trash: bool,
}

impl Capabilities {
    /// Check whether two titles collide under this provider's rules.
    pub fn titles_collide(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive_titles {
            a == b
        } else {
            a.to_lowercase() == b.to_lowercase()
        }
    }
}

/// A stream of byte chunks with an optional length hint.
pub struct ByteStream {
    len: Option<u64>,
    chunks: BoxStream<'static, ProviderResult<Vec<u8>>>,
}

impl ByteStream {
    /// Wrap a chunk stream.
    pub fn new(
        len: Option<u64>,
        chunks: impl Stream<Item = ProviderResult<Vec<u8>>> + Send + 'static,
    ) -> Self {
        Self {
            len,
            chunks: chunks.boxed(),
        }
    }

    /// Stream an in-memory buffer in chunks of `chunk_size` bytes.
    pub fn from_bytes(data: Vec<u8>, chunk_size: usize) -> Self {
        let len = data.len() as u64;
        let chunk_size = chunk_size.max(1);
        let chunks: Vec<ProviderResult<Vec<u8>>> =
            data.chunks(chunk_size).map(|c| Ok(c.to_vec())).collect();
        Self::new(Some(len), stream::iter(chunks))
    }

    /// Expected total length in bytes, if known.
    pub fn len_hint(&self) -> Option<u64> {
        self.len
    }

    /// Read the whole stream into memory.
    pub async fn collect_bytes(mut self) -> ProviderResult<Vec<u8>> {
        let mut data = Vec::with_capacity(self.len.unwrap_or(0) as usize);
        while let Some(chunk) = self.chunks.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }
}

impl Stream for ByteStream {
    type Item = ProviderResult<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Arguments of a server-side move/copy.
#[derive(Debug, Clone, Copy)]
pub struct ServerTransfer<'a> {
    pub items: &'a [Entity],
    pub destination: &'a Entity,
    pub mode: TransferMode,
    pub overwrite: bool,
}

/// Per-item result reported by a server-side transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    /// Uid of the source item.
    pub uid: EntityUid,
    /// The entity as it now exists at the destination, or the item's error.
    pub result: ProviderResult<Entity>,
}

/// Trait that every storage backend must implement.
///
/// All operations take the caller's cancellation token. Once it fires,
/// in-flight calls must terminate promptly with [`ProviderError::Cancelled`]
/// and the provider must not retry on its own.
pub trait Provider: Send + Sync {
    /// Identity of this backend account.
    fn id(&self) -> &ProviderId;

    /// Human-readable name for this provider instance.
    fn display_name(&self) -> String {
        self.id().to_string()
    }

    /// Capability flags.
    fn capabilities(&self) -> Capabilities;

    /// Check whether items can be moved/copied into `into` with one
    /// server-side call.
    ///
    /// True only when both sides are the same backend account.
    fn supports_server_side_transfer(&self, into: &dyn Provider) -> bool {
        self.capabilities().server_side_transfer && self.id() == into.id()
    }

    /// The root folder of this provider.
    fn root(&self) -> Entity;

    /// Look up a single entity by id.
    fn entity<'a>(
        &'a self,
        id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>>;

    /// Fetch one page of a folder listing.
    ///
    /// Repeated calls with the same query return a consistent snapshot modulo
    /// remote changes.
    fn fetch_page<'a>(
        &'a self,
        query: &'a PageQuery,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Page>>;

    /// Return the subset of `items` whose title collides with an entity
    /// directly inside `destination`.
    ///
    /// The default enumerates the destination `page_size` entries at a time
    /// and compares titles with [`Capabilities::titles_collide`].
    fn check_conflicts<'a>(
        &'a self,
        items: &'a [Entity],
        destination: &'a Entity,
        page_size: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Vec<Entity>>> {
        Box::pin(async move {
            let existing = collect_children(self, &destination.id, page_size, cancel).await?;
            let caps = self.capabilities();
            Ok(items
                .iter()
                .filter(|item| {
                    existing
                        .iter()
                        .any(|e| caps.titles_collide(&e.title, &item.title))
                })
                .cloned()
                .collect())
        })
    }

    /// Move or copy items within this account. Only called when
    /// [`Provider::supports_server_side_transfer`] is true.
    fn server_side_transfer<'a>(
        &'a self,
        transfer: ServerTransfer<'a>,
        progress: &'a dyn ProgressSink,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Vec<ItemReport>>> {
        let _ = (transfer, progress, cancel);
        Box::pin(async {
            Err(ProviderError::Unsupported {
                operation: "server_side_transfer",
            })
        })
    }

    /// Open a file's content for reading.
    fn download<'a>(
        &'a self,
        entity: &'a Entity,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<ByteStream>>;

    /// Store `data` as `title` inside `destination`.
    ///
    /// Fails with [`ProviderError::AlreadyExists`] when the title is taken and
    /// `overwrite` is false.
    fn upload<'a>(
        &'a self,
        data: ByteStream,
        destination: &'a Entity,
        title: &'a str,
        overwrite: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>>;

    /// Create a folder, or return the existing one with that title when
    /// `reuse_existing` is true.
    fn create_folder<'a>(
        &'a self,
        parent: &'a Entity,
        title: &'a str,
        reuse_existing: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>>;

    /// Rename an entity in place.
    fn rename<'a>(
        &'a self,
        entity: &'a Entity,
        new_title: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>>;

    /// Delete an entity (recursively for folders).
    fn delete<'a>(
        &'a self,
        entity: &'a Entity,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<()>>;

    /// Permanently purge the trash.
    fn empty_trash<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, ProviderResult<()>> {
        let _ = cancel;
        Box::pin(async {
            Err(ProviderError::Unsupported {
                operation: "empty_trash",
            })
        })
    }

    /// Id of the folder that holds trashed entities, if any.
    fn trash_folder_id(&self) -> Option<CompactString> {
        None
    }
}

/// Enumerate every direct child of a folder by walking all pages.
///
/// Providers without server-side paging list the whole folder for every
/// page, so they are asked for everything at once instead of `page_size`
/// entries.
pub async fn collect_children<P: Provider + ?Sized>(
    provider: &P,
    folder_id: &str,
    page_size: usize,
    cancel: &CancellationToken,
) -> ProviderResult<Vec<Entity>> {
    let page_size = if provider.capabilities().server_side_paging {
        page_size.max(1)
    } else {
        usize::MAX
    };
    let mut query = PageQuery::first(folder_id, page_size);
    let mut children = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        let page = provider.fetch_page(&query, cancel).await?;
        let received = page.entities.len();
        children.extend(page.entities);
        if received == 0 || children.len() >= page.total {
            break;
        }
        query.page += 1;
    }
    Ok(children)
}

/// Run a provider future, resolving to [`ProviderError::Cancelled`] as soon
/// as `cancel` fires.
pub async fn with_cancel<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = fut => result,
    }
}
