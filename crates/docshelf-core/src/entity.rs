//! File and folder entity types.

use std::fmt;

use chrono::{DateTime, Utc};
use compact_str::{CompactString, format_compact};
use serde::{Deserialize, Serialize};

/// Identifier of one provider instance.
///
/// Two providers with equal ids are the same backend *account*, not merely
/// the same backend type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(CompactString);

impl ProviderId {
    /// Create a new provider id.
    pub fn new(id: impl Into<CompactString>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine-assigned identifier, unique within one listing session.
///
/// Used for selection sets and diffing. Never sent to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityUid(CompactString);

impl EntityUid {
    /// Compose a uid from the owning provider and the backend-native id.
    pub fn compose(provider: &ProviderId, id: &str) -> Self {
        Self(format_compact!("{provider}:{id}"))
    }

    /// Get the uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind-specific entity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A regular document.
    File {
        /// Size in bytes, `None` until the backend resolves it.
        size: Option<u64>,
        /// Last modification time.
        updated_at: Option<DateTime<Utc>>,
        /// Opaque content version token.
        content_version: Option<CompactString>,
    },
    /// A folder.
    Folder {
        /// Server-reported child count. May be stale.
        item_count_hint: Option<u64>,
    },
}

impl EntityKind {
    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        matches!(self, Self::Folder { .. })
    }
}

/// A file or folder as understood by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    uid: EntityUid,
    provider: ProviderId,

    /// Backend-native identifier, stable within one provider.
    pub id: CompactString,

    /// Display name, used for collision checks at a destination.
    pub title: CompactString,

    /// Containing folder, `None` for roots.
    pub parent_id: Option<CompactString>,

    /// Creator or owner display name, if the backend reports one.
    pub author: Option<CompactString>,

    /// Kind and kind-specific metadata.
    pub kind: EntityKind,
}

impl Entity {
    fn new(
        provider: &ProviderId,
        id: impl Into<CompactString>,
        title: impl Into<CompactString>,
        parent_id: Option<&str>,
        kind: EntityKind,
    ) -> Self {
        let id = id.into();
        Self {
            uid: EntityUid::compose(provider, &id),
            provider: provider.clone(),
            id,
            title: title.into(),
            parent_id: parent_id.map(CompactString::from),
            author: None,
            kind,
        }
    }

    /// Create a file entity with unknown size and timestamps.
    pub fn file(
        provider: &ProviderId,
        id: impl Into<CompactString>,
        title: impl Into<CompactString>,
        parent_id: Option<&str>,
    ) -> Self {
        Self::new(
            provider,
            id,
            title,
            parent_id,
            EntityKind::File {
                size: None,
                updated_at: None,
                content_version: None,
            },
        )
    }

    /// Create a folder entity.
    pub fn folder(
        provider: &ProviderId,
        id: impl Into<CompactString>,
        title: impl Into<CompactString>,
        parent_id: Option<&str>,
    ) -> Self {
        Self::new(
            provider,
            id,
            title,
            parent_id,
            EntityKind::Folder {
                item_count_hint: None,
            },
        )
    }

    /// Set the file size. No effect on folders.
    pub fn with_size(mut self, bytes: u64) -> Self {
        if let EntityKind::File { size, .. } = &mut self.kind {
            *size = Some(bytes);
        }
        self
    }

    /// Set the modification time. No effect on folders.
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        if let EntityKind::File { updated_at, .. } = &mut self.kind {
            *updated_at = Some(at);
        }
        self
    }

    /// Set the content version token. No effect on folders.
    pub fn with_content_version(mut self, version: impl Into<CompactString>) -> Self {
        if let EntityKind::File {
            content_version, ..
        } = &mut self.kind
        {
            *content_version = Some(version.into());
        }
        self
    }

    /// Set the folder item count hint. No effect on files.
    pub fn with_item_count_hint(mut self, count: u64) -> Self {
        if let EntityKind::Folder { item_count_hint } = &mut self.kind {
            *item_count_hint = Some(count);
        }
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<CompactString>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// The session-unique identifier. Immutable once assigned.
    pub fn uid(&self) -> &EntityUid {
        &self.uid
    }

    /// The provider this entity belongs to.
    pub fn provider_id(&self) -> &ProviderId {
        &self.provider
    }

    /// Check if this entity is a file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Check if this entity is a folder.
    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    /// File size in bytes, if known.
    pub fn size(&self) -> Option<u64> {
        match &self.kind {
            EntityKind::File { size, .. } => *size,
            EntityKind::Folder { .. } => None,
        }
    }

    /// Modification time, if known.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match &self.kind {
            EntityKind::File { updated_at, .. } => *updated_at,
            EntityKind::Folder { .. } => None,
        }
    }

    /// Lowercased title extension, used for type ordering and filters.
    pub fn extension(&self) -> Option<String> {
        if self.is_folder() {
            return None;
        }
        let (stem, ext) = self.title.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    /// Check whether this entity lives directly inside `folder_id`.
    pub fn is_child_of(&self, folder_id: &str) -> bool {
        self.parent_id.as_deref() == Some(folder_id)
    }

    /// Apply an authoritative update received from the backend.
    ///
    /// Copies id, title, parent, author and kind metadata while keeping this
    /// entity's uid. Returns `false` without touching anything when the update
    /// comes from a different provider.
    pub fn refresh_from(&mut self, update: Entity) -> bool {
        if update.provider != self.provider {
            return false;
        }
        self.id = update.id;
        self.title = update.title;
        self.parent_id = update.parent_id;
        self.author = update.author;
        self.kind = update.kind;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderId {
        ProviderId::new("cloud:alice")
    }

    #[test]
    fn test_uid_composed_from_provider_and_id() {
        let file = Entity::file(&provider(), "42", "Report.docx", Some("7"));
        assert_eq!(file.uid().as_str(), "cloud:alice:42");
        assert_eq!(file.provider_id(), &provider());
    }

    #[test]
    fn test_kind_setters_only_touch_matching_kind() {
        let folder = Entity::folder(&provider(), "1", "Docs", None).with_size(10);
        assert_eq!(folder.size(), None);

        let file = Entity::file(&provider(), "2", "a.txt", Some("1"))
            .with_size(10)
            .with_item_count_hint(3);
        assert_eq!(file.size(), Some(10));
        assert!(file.is_file());
    }

    #[test]
    fn test_extension() {
        let p = provider();
        assert_eq!(
            Entity::file(&p, "1", "Deck.PPTX", None).extension().as_deref(),
            Some("pptx")
        );
        assert_eq!(Entity::file(&p, "2", ".hidden", None).extension(), None);
        assert_eq!(Entity::file(&p, "3", "README", None).extension(), None);
        assert_eq!(Entity::folder(&p, "4", "a.b", None).extension(), None);
    }

    #[test]
    fn test_refresh_keeps_uid() {
        let p = provider();
        let mut file = Entity::file(&p, "old", "a.txt", Some("root"));
        let uid = file.uid().clone();

        let renamed = Entity::file(&p, "new", "b.txt", Some("root")).with_size(5);
        assert!(file.refresh_from(renamed));
        assert_eq!(file.uid(), &uid);
        assert_eq!(file.id, "new");
        assert_eq!(file.title, "b.txt");
        assert_eq!(file.size(), Some(5));
    }

    #[test]
    fn test_refresh_rejects_foreign_provider() {
        let mut file = Entity::file(&provider(), "1", "a.txt", None);
        let other = Entity::file(&ProviderId::new("dav:bob"), "1", "b.txt", None);
        assert!(!file.refresh_from(other));
        assert_eq!(file.title, "a.txt");
    }
}
