//! Device storage provider rooted at a directory.
//!
//! Entity ids are `/`-separated paths relative to the root (`/` is the root
//! itself). Deleted entities move into a private trash directory under the
//! root, which listings never show.

use std::fs::{self, Metadata};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use compact_str::{CompactString, format_compact};
use docshelf_core::{
    BoxFuture, ByteStream, CancellationToken, Capabilities, Entity, ItemReport, Page, PageQuery,
    ProgressSink, Provider, ProviderError, ProviderId, ProviderResult, ServerTransfer,
    TransferMode, with_cancel,
};
use futures::StreamExt;
use jwalk::{Parallelism, WalkDir};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::query::page_from;

/// Name of the private trash directory under the provider root.
pub const TRASH_DIR: &str = ".trash";

/// Suffix of in-progress uploads.
const PART_SUFFIX: &str = ".docshelf-part";

const ROOT_ID: &str = "/";

/// A provider over one directory of the device.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    id: ProviderId,
    root: PathBuf,
    title: CompactString,
    chunk_size: usize,
}

impl LocalProvider {
    /// Open a provider over an existing directory.
    ///
    /// Two providers opened on the same canonical root share an id and are
    /// therefore the same account.
    pub fn open(root: impl AsRef<Path>) -> ProviderResult<Self> {
        let requested = root.as_ref();
        let root = requested
            .canonicalize()
            .map_err(|e| ProviderError::io(requested.display().to_string(), e))?;
        if !root.is_dir() {
            return Err(ProviderError::Other {
                message: format!("{} is not a directory", root.display()),
            });
        }

        let title = root
            .file_name()
            .map(|name| CompactString::from(name.to_string_lossy()))
            .unwrap_or_else(|| ROOT_ID.into());

        Ok(Self {
            id: ProviderId::new(format_compact!("local:{}", root.display())),
            root,
            title,
            chunk_size: 64 * 1024,
        })
    }

    /// Set the read chunk size of download streams.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// The canonical root directory.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Resolve an entity id to a path inside the root.
    ///
    /// Ids that would escape the root are refused.
    pub fn resolve(&self, id: &str) -> ProviderResult<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(id.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(ProviderError::permission_denied(id)),
            }
        }
        Ok(path)
    }

    fn trash_path(&self) -> PathBuf {
        self.root.join(TRASH_DIR)
    }

    fn id_for(&self, path: &Path) -> CompactString {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return path.to_string_lossy().into();
        };
        if relative.as_os_str().is_empty() {
            return ROOT_ID.into();
        }
        let mut id = CompactString::default();
        for component in relative.components() {
            id.push('/');
            id.push_str(&component.as_os_str().to_string_lossy());
        }
        id
    }

    fn entity_at(&self, path: &Path, metadata: &Metadata) -> Entity {
        let id = self.id_for(path);
        if id == ROOT_ID {
            return Entity::folder(&self.id, id, self.title.clone(), None);
        }

        let title = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = path.parent().map(|p| self.id_for(p));

        if metadata.is_dir() {
            return Entity::folder(&self.id, id, title, parent.as_deref());
        }
        let file = Entity::file(&self.id, id, title, parent.as_deref()).with_size(metadata.len());
        match metadata.modified() {
            Ok(modified) => file.with_updated_at(DateTime::<Utc>::from(modified)),
            Err(_) => file,
        }
    }

    fn stat(&self, path: &Path) -> ProviderResult<Entity> {
        let metadata = fs::metadata(path).map_err(|e| ProviderError::io(self.id_for(path), e))?;
        Ok(self.entity_at(path, &metadata))
    }

    fn folder_path(&self, id: &str) -> ProviderResult<PathBuf> {
        let path = self.resolve(id)?;
        let metadata = fs::metadata(&path).map_err(|e| ProviderError::io(id, e))?;
        if !metadata.is_dir() {
            return Err(ProviderError::not_found(id));
        }
        Ok(path)
    }

    /// Path of `title` inside `dir`, refusing titles that are not one plain
    /// path component.
    fn child_path(&self, dir: &Path, title: &str) -> ProviderResult<PathBuf> {
        let mut components = Path::new(title).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !title.ends_with(PART_SUFFIX) => {
                Ok(dir.join(title))
            }
            _ => Err(ProviderError::invalid_name(title, "Not a valid file name")),
        }
    }

    fn is_hidden_entry(&self, path: &Path) -> bool {
        path == self.trash_path()
            || path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().ends_with(PART_SUFFIX))
    }

    fn list_children(&self, folder: &Path) -> ProviderResult<Vec<Entity>> {
        let entries = fs::read_dir(folder).map_err(|e| ProviderError::io(self.id_for(folder), e))?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(folder = %folder.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if self.is_hidden_entry(&path) {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => children.push(self.entity_at(&path, &metadata)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping entry without metadata"),
            }
        }
        Ok(children)
    }

    fn walk_descendants(&self, folder: &Path) -> Vec<Entity> {
        let trash = self.trash_path();
        let in_trash = folder.starts_with(&trash);
        WalkDir::new(folder)
            .parallelism(Parallelism::Serial)
            .skip_hidden(false)
            .follow_links(false)
            .min_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry during search");
                    None
                }
            })
            .filter(|entry| {
                let path = entry.path();
                !self.is_hidden_entry(&path) && (in_trash || !path.starts_with(&trash))
            })
            .filter_map(|entry| {
                let path = entry.path();
                entry
                    .metadata()
                    .ok()
                    .map(|metadata| self.entity_at(&path, &metadata))
            })
            .collect()
    }

    fn list(&self, query: &PageQuery) -> ProviderResult<Page> {
        let folder = self.folder_path(&query.folder_id)?;
        let entities = if query.search.is_some() {
            self.walk_descendants(&folder)
        } else {
            self.list_children(&folder)?
        };
        Ok(page_from(entities, query, usize::MAX))
    }

    fn transfer_item(
        &self,
        item: &Entity,
        destination_id: &str,
        mode: TransferMode,
        overwrite: bool,
    ) -> ProviderResult<Entity> {
        let source = self.resolve(&item.id)?;
        if source == self.root {
            return Err(ProviderError::permission_denied(item.id.clone()));
        }
        let destination = self.folder_path(destination_id)?;
        let target = self.child_path(&destination, &item.title)?;
        if target == source {
            return self.stat(&source);
        }
        if item.is_folder() && destination.starts_with(&source) {
            return Err(ProviderError::Other {
                message: format!(
                    "Cannot {} '{}' into itself",
                    mode.to_string().to_lowercase(),
                    item.title
                ),
            });
        }

        if fs::symlink_metadata(&target).is_ok() {
            if !overwrite {
                return Err(ProviderError::already_exists(item.title.clone()));
            }
            remove_path(&target).map_err(|e| ProviderError::io(self.id_for(&target), e))?;
        }

        let result = match mode {
            TransferMode::Move => fs::rename(&source, &target),
            TransferMode::Copy => copy_recursive(&source, &target),
        };
        result.map_err(|e| ProviderError::io(item.id.clone(), e))?;
        self.stat(&target)
    }

    fn create_folder_at(
        &self,
        parent_id: &str,
        title: &str,
        reuse_existing: bool,
    ) -> ProviderResult<Entity> {
        let parent = self.folder_path(parent_id)?;
        let path = self.child_path(&parent, title)?;
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() && reuse_existing => {
                return Ok(self.entity_at(&path, &metadata));
            }
            Ok(_) => return Err(ProviderError::already_exists(title)),
            Err(_) => {}
        }
        fs::create_dir(&path).map_err(|e| ProviderError::io(self.id_for(&path), e))?;
        self.stat(&path)
    }

    fn rename_at(&self, entity: &Entity, new_title: &str) -> ProviderResult<Entity> {
        let source = self.resolve(&entity.id)?;
        if source == self.root {
            return Err(ProviderError::permission_denied(entity.id.clone()));
        }
        let parent = source
            .parent()
            .ok_or_else(|| ProviderError::permission_denied(entity.id.clone()))?;
        let target = self.child_path(parent, new_title)?;

        // A case-only rename targets the same file on case-insensitive
        // filesystems, so compare canonical paths before refusing.
        if target != source && fs::symlink_metadata(&target).is_ok() {
            let same = match (target.canonicalize(), source.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
            if !same {
                return Err(ProviderError::already_exists(new_title));
            }
        }

        fs::rename(&source, &target).map_err(|e| ProviderError::io(entity.id.clone(), e))?;
        self.stat(&target)
    }

    fn delete_at(&self, entity: &Entity) -> ProviderResult<()> {
        let path = self.resolve(&entity.id)?;
        if path == self.root || path == self.trash_path() {
            return Err(ProviderError::permission_denied(entity.id.clone()));
        }
        fs::symlink_metadata(&path).map_err(|e| ProviderError::io(entity.id.clone(), e))?;

        if path.starts_with(self.trash_path()) {
            return remove_path(&path).map_err(|e| ProviderError::io(entity.id.clone(), e));
        }

        let trash = self.trash_path();
        fs::create_dir_all(&trash).map_err(|e| ProviderError::io(TRASH_DIR, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = unique_path(&trash, &name);
        fs::rename(&path, &target).map_err(|e| ProviderError::io(entity.id.clone(), e))
    }

    fn purge_trash(&self) -> ProviderResult<()> {
        let trash = self.trash_path();
        let entries = match fs::read_dir(&trash) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ProviderError::io(TRASH_DIR, e)),
        };
        for entry in entries {
            let path = entry.map_err(|e| ProviderError::io(TRASH_DIR, e))?.path();
            remove_path(&path).map_err(|e| ProviderError::io(self.id_for(&path), e))?;
        }
        Ok(())
    }
}

/// Run blocking filesystem work off the runtime, resolving early on cancel.
async fn blocking<T, F>(cancel: &CancellationToken, work: F) -> ProviderResult<T>
where
    F: FnOnce() -> ProviderResult<T> + Send + 'static,
    T: Send + 'static,
{
    with_cancel(cancel, async move {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| ProviderError::Other {
                message: format!("Task failed: {e}"),
            })?
    })
    .await
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn copy_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    if !fs::metadata(source)?.is_dir() {
        return fs::copy(source, dest).map(|_| ());
    }
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

/// First free path for `name` in `dir`, trying "name (1).ext", "name (2).ext"...
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if fs::symlink_metadata(&candidate).is_err() {
        return candidate;
    }

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    for i in 1.. {
        let renamed = match extension {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        };
        let candidate = dir.join(renamed);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
    }
    candidate
}

impl Provider for LocalProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn display_name(&self) -> String {
        format!("On this device ({})", self.root.display())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            server_side_transfer: true,
            case_sensitive_titles: !cfg!(any(target_os = "macos", target_os = "windows")),
            conflict_check_best_effort: false,
            server_side_paging: false,
            trash: true,
        }
    }

    fn root(&self) -> Entity {
        Entity::folder(&self.id, ROOT_ID, self.title.clone(), None)
    }

    fn entity<'a>(
        &'a self,
        id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        let this = self.clone();
        let id = CompactString::from(id);
        Box::pin(blocking(cancel, move || {
            let path = this.resolve(&id)?;
            this.stat(&path)
        }))
    }

    fn fetch_page<'a>(
        &'a self,
        query: &'a PageQuery,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Page>> {
        let this = self.clone();
        let owned = query.clone();
        Box::pin(async move {
            let page = blocking(cancel, move || this.list(&owned)).await?;
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
            let total = items.len().max(1) as f64;
            let mut reports = Vec::with_capacity(items.len());

            for (index, item) in items.iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                let this = self.clone();
                let owned = item.clone();
                let destination_id = destination.id.clone();
                let result = blocking(cancel, move || {
                    this.transfer_item(&owned, &destination_id, mode, overwrite)
                })
                .await;

                // The blocking copy keeps running once abandoned, so the
                // item in flight is reported rather than left unmentioned.
                let cancelled = matches!(result, Err(ProviderError::Cancelled));
                reports.push(ItemReport {
                    uid: item.uid().clone(),
                    result,
                });
                if cancelled {
                    break;
                }
                progress.report((index + 1) as f64 / total, Some(&item.title));
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
            if entity.is_folder() {
                return Err(ProviderError::Unsupported {
                    operation: "download folder",
                });
            }
            let path = self.resolve(&entity.id)?;
            let id = entity.id.clone();
            let file = with_cancel(cancel, async {
                tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| ProviderError::io(id.clone(), e))
            })
            .await?;
            let len = file.metadata().await.ok().map(|m| m.len());

            let chunks = ReaderStream::with_capacity(file, self.chunk_size).map(move |chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ProviderError::io(id.clone(), e))
            });
            Ok(ByteStream::new(len, chunks))
        })
    }

    fn upload<'a>(
        &'a self,
        mut data: ByteStream,
        destination: &'a Entity,
        title: &'a str,
        overwrite: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        Box::pin(async move {
            let folder = self.folder_path(&destination.id)?;
            let target = self.child_path(&folder, title)?;
            if !overwrite && tokio::fs::symlink_metadata(&target).await.is_ok() {
                return Err(ProviderError::already_exists(title));
            }

            let part = folder.join(format!(".{title}{PART_SUFFIX}"));
            let part_id = self.id_for(&part);
            let mut file = tokio::fs::File::create(&part)
                .await
                .map_err(|e| ProviderError::io(part_id.clone(), e))?;

            let written: ProviderResult<()> = async {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                        next = data.next() => next,
                    };
                    let Some(chunk) = next else { break };
                    file.write_all(&chunk?)
                        .await
                        .map_err(|e| ProviderError::io(part_id.clone(), e))?;
                }
                file.flush()
                    .await
                    .map_err(|e| ProviderError::io(part_id.clone(), e))
            }
            .await;
            drop(file);

            if let Err(e) = written {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }

            let this = self.clone();
            let finish = blocking(cancel, move || {
                if fs::symlink_metadata(&target).is_ok() {
                    if !overwrite {
                        let _ = fs::remove_file(&part);
                        return Err(ProviderError::already_exists(this.id_for(&target)));
                    }
                    remove_path(&target).map_err(|e| ProviderError::io(this.id_for(&target), e))?;
                }
                fs::rename(&part, &target).map_err(|e| ProviderError::io(this.id_for(&target), e))?;
                this.stat(&target)
            });
            finish.await
        })
    }

    fn create_folder<'a>(
        &'a self,
        parent: &'a Entity,
        title: &'a str,
        reuse_existing: bool,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        let this = self.clone();
        let parent_id = parent.id.clone();
        let title = CompactString::from(title);
        Box::pin(blocking(cancel, move || {
            this.create_folder_at(&parent_id, &title, reuse_existing)
        }))
    }

    fn rename<'a>(
        &'a self,
        entity: &'a Entity,
        new_title: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<Entity>> {
        let this = self.clone();
        let entity = entity.clone();
        let new_title = CompactString::from(new_title);
        Box::pin(blocking(cancel, move || this.rename_at(&entity, &new_title)))
    }

    fn delete<'a>(
        &'a self,
        entity: &'a Entity,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<()>> {
        let this = self.clone();
        let entity = entity.clone();
        Box::pin(blocking(cancel, move || this.delete_at(&entity)))
    }

    fn empty_trash<'a>(&'a self, cancel: &'a CancellationToken) -> BoxFuture<'a, ProviderResult<()>> {
        let this = self.clone();
        Box::pin(blocking(cancel, move || this.purge_trash()))
    }

    fn trash_folder_id(&self) -> Option<CompactString> {
        Some(format_compact!("/{TRASH_DIR}"))
    }
}
