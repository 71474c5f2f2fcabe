use chrono::{TimeZone, Utc};
use docshelf_core::{
    Capabilities, EngineConfig, Entity, EntityKind, EntityUid, FilterSpec, ListingConfig, PageQuery,
    ProviderError, ProviderId, SortField, SortSpec, TransferMode, normalize_search,
};

fn provider() -> ProviderId {
    ProviderId::new("cloud:portal.example.com")
}

#[test]
fn test_uid_uniqueness_across_providers() {
    let a = Entity::file(&provider(), "17", "a.docx", Some("1"));
    let b = Entity::file(&ProviderId::new("dav:files.example.com"), "17", "a.docx", Some("1"));

    assert_eq!(a.id, b.id);
    assert_ne!(a.uid(), b.uid());
    assert_eq!(a.uid(), &EntityUid::compose(&provider(), "17"));
}

#[test]
fn test_file_metadata() {
    let updated = Utc.with_ymd_and_hms(2024, 8, 24, 10, 0, 0).unwrap();
    let file = Entity::file(&provider(), "1", "Budget.xlsx", Some("root"))
        .with_size(2048)
        .with_updated_at(updated)
        .with_content_version("v3")
        .with_author("Pavel");

    assert!(file.is_file());
    assert!(!file.is_folder());
    assert_eq!(file.size(), Some(2048));
    assert_eq!(file.updated_at(), Some(updated));
    assert_eq!(file.author.as_deref(), Some("Pavel"));
    assert!(file.is_child_of("root"));
    assert!(!file.is_child_of("other"));

    match &file.kind {
        EntityKind::File {
            content_version, ..
        } => assert_eq!(content_version.as_deref(), Some("v3")),
        EntityKind::Folder { .. } => panic!("Expected file kind"),
    }
}

#[test]
fn test_folder_metadata() {
    let folder = Entity::folder(&provider(), "9", "Projects", None).with_item_count_hint(12);

    assert!(folder.is_folder());
    assert_eq!(folder.parent_id, None);
    assert_eq!(folder.size(), None);
    assert_eq!(
        folder.kind,
        EntityKind::Folder {
            item_count_hint: Some(12)
        }
    );
}

#[test]
fn test_sort_by_date_places_unknown_dates_first_when_ascending() {
    let p = provider();
    let older = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let newer = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let mut items = vec![
        Entity::file(&p, "1", "new.txt", None).with_updated_at(newer),
        Entity::folder(&p, "2", "folder", None),
        Entity::file(&p, "3", "old.txt", None).with_updated_at(older),
    ];

    let spec = SortSpec::ascending(SortField::Date);
    items.sort_by(|a, b| spec.compare(a, b));
    let titles: Vec<_> = items.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["folder", "old.txt", "new.txt"]);

    // Default is most recent first
    let spec = SortSpec::default();
    items.sort_by(|a, b| spec.compare(a, b));
    assert_eq!(items[0].title, "new.txt");
}

#[test]
fn test_sort_by_type_and_author() {
    let p = provider();
    let mut items = vec![
        Entity::file(&p, "1", "b.pdf", None).with_author("zoe"),
        Entity::file(&p, "2", "a.docx", None).with_author("adam"),
        Entity::file(&p, "3", "c.docx", None),
    ];

    let spec = SortSpec::ascending(SortField::Type);
    items.sort_by(|a, b| spec.compare(a, b));
    let titles: Vec<_> = items.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["a.docx", "c.docx", "b.pdf"]);

    let spec = SortSpec::ascending(SortField::Author);
    items.sort_by(|a, b| spec.compare(a, b));
    let titles: Vec<_> = items.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["c.docx", "a.docx", "b.pdf"]);
}

#[test]
fn test_filter_spec_from_iter() {
    let filter: FilterSpec = [("type", "file"), ("extension", "docx")].into_iter().collect();
    assert_eq!(filter.get("extension"), Some("docx"));
    assert!(!filter.is_empty());
    assert!(FilterSpec::new().is_empty());
}

#[test]
fn test_page_query_roundtrip_fields() {
    let mut query = PageQuery::first("root", 10);
    query.search = normalize_search(" Q3 ");
    query.filter = FilterSpec::new().with("type", "folder");

    let next = query.at_page(1);
    assert_eq!(next.page, 1);
    assert_eq!(next.search.as_deref(), Some("q3"));
    assert_eq!(next.filter, query.filter);
    assert_eq!(next.offset(), 10);
}

#[test]
fn test_capabilities_default_is_case_insensitive() {
    let caps = Capabilities::default();
    assert!(caps.titles_collide("B.docx", "b.DOCX"));
    assert!(!caps.server_side_transfer);
}

#[test]
fn test_transfer_mode() {
    assert!(TransferMode::Move.is_move());
    assert!(!TransferMode::Copy.is_move());
    assert_eq!(TransferMode::Copy.to_string(), "Copy");
}

#[test]
fn test_provider_error_messages() {
    assert_eq!(
        ProviderError::network("timed out").to_string(),
        "Network error: timed out"
    );
    assert_eq!(ProviderError::not_found("42").to_string(), "Not found: 42");
    assert!(ProviderError::auth("expired").is_retryable());
}

#[test]
fn test_config_defaults_match() {
    let config = EngineConfig::default();
    assert_eq!(config.listing, ListingConfig::default());
    assert_eq!(config.listing.page_size, 40);
    assert_eq!(config.listing.search_debounce_ms, 750);
}
