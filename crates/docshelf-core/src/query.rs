//! Listing query parameters forwarded to providers.

use std::cmp::Ordering;

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::Entity;

/// Field a listing is ordered by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortField {
    Name,
    #[default]
    Date,
    Size,
    Type,
    Author,
}

/// Ordering of a listing: a field and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub ascending: bool,
}

impl SortSpec {
    /// Create a sort spec.
    pub fn new(field: SortField, ascending: bool) -> Self {
        Self { field, ascending }
    }

    /// Ascending order by `field`.
    pub fn ascending(field: SortField) -> Self {
        Self::new(field, true)
    }

    /// Descending order by `field`.
    pub fn descending(field: SortField) -> Self {
        Self::new(field, false)
    }

    /// Compare two entities under this spec.
    ///
    /// Ties on the primary field fall back to a case-insensitive title
    /// comparison so the order is total and stable across pages.
    pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        let primary = match self.field {
            SortField::Name => Ordering::Equal,
            SortField::Date => a.updated_at().cmp(&b.updated_at()),
            SortField::Size => a.size().cmp(&b.size()),
            SortField::Type => a.extension().cmp(&b.extension()),
            SortField::Author => a.author.cmp(&b.author),
        };
        let ordering = primary.then_with(|| title_key(a).cmp(&title_key(b)));
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

impl Default for SortSpec {
    /// Most recently updated first.
    fn default() -> Self {
        Self::descending(SortField::Date)
    }
}

fn title_key(entity: &Entity) -> CompactString {
    entity.title.to_lowercase()
}

/// Opaque key/value filter parameters.
///
/// The engine forwards these verbatim; only providers interpret them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(IndexMap<String, String>);

impl FilterSpec {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a filter parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Add or replace a filter parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Check if no filter is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FilterSpec {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Normalize a raw search input.
///
/// Trims and lowercases; blank input means "no search".
pub fn normalize_search(raw: &str) -> Option<CompactString> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(CompactString::from(trimmed.to_lowercase()))
    }
}

/// One page request as sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageQuery {
    /// Folder being listed.
    pub folder_id: CompactString,
    /// Zero-based page cursor.
    pub page: usize,
    /// Requested page size. Providers may return fewer entries.
    pub page_size: usize,
    pub sort: SortSpec,
    pub filter: FilterSpec,
    /// Normalized search term, if searching.
    pub search: Option<CompactString>,
}

impl PageQuery {
    /// A plain query for the first page of a folder.
    pub fn first(folder_id: impl Into<CompactString>, page_size: usize) -> Self {
        Self {
            folder_id: folder_id.into(),
            page: 0,
            page_size,
            sort: SortSpec::default(),
            filter: FilterSpec::default(),
            search: None,
        }
    }

    /// The same query for another page.
    pub fn at_page(&self, page: usize) -> Self {
        Self {
            page,
            ..self.clone()
        }
    }

    /// Index of the first entry on this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub entities: Vec<Entity>,
    /// Authoritative total item count for the whole listing.
    pub total: usize,
}

impl Page {
    /// Create a page.
    pub fn new(entities: Vec<Entity>, total: usize) -> Self {
        Self { entities, total }
    }
}
