//! Client-side evaluation of listing queries.
//!
//! Providers without server-side paging enumerate the whole folder and run
//! the query here.

use docshelf_core::{Entity, FilterSpec, Page, PageQuery};

/// Check whether an entity satisfies every recognized filter parameter.
///
/// Recognized keys are `type` (`file` or `folder`), `extension` and
/// `author`. Unknown keys are ignored.
pub fn matches_filter(entity: &Entity, filter: &FilterSpec) -> bool {
    filter.iter().all(|(key, value)| match key {
        "type" => match value {
            "file" => entity.is_file(),
            "folder" => entity.is_folder(),
            _ => true,
        },
        "extension" => entity
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(value.trim_start_matches('.'))),
        "author" => entity
            .author
            .as_deref()
            .is_some_and(|author| author.eq_ignore_ascii_case(value)),
        _ => true,
    })
}

/// Check whether an entity's title contains a normalized search term.
pub fn matches_search(entity: &Entity, term: &str) -> bool {
    entity.title.to_lowercase().contains(term)
}

/// Filter, search, sort and slice `entities` into the page `query` asks for.
///
/// `max_page_size` caps the requested page size. The reported total counts
/// every matching entity, not just the returned slice.
pub fn page_from(mut entities: Vec<Entity>, query: &PageQuery, max_page_size: usize) -> Page {
    entities.retain(|e| matches_filter(e, &query.filter));
    if let Some(term) = &query.search {
        entities.retain(|e| matches_search(e, term));
    }
    entities.sort_by(|a, b| query.sort.compare(a, b));

    let total = entities.len();
    let size = query.page_size.min(max_page_size).max(1);
    let entities = entities
        .into_iter()
        .skip(query.page.saturating_mul(size))
        .take(size)
        .collect();

    Page::new(entities, total)
}
