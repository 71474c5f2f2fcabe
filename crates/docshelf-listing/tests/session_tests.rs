use std::sync::Arc;
use std::time::Duration;

use docshelf_core::{
    FilterSpec, ListingConfig, Provider, ProviderError, SortField, SortSpec,
};
use docshelf_listing::{ListingError, ListingSession, ListingState};
use docshelf_providers::{MemoryProvider, Operation, ROOT_ID};

fn seeded(count: usize) -> Arc<MemoryProvider> {
    let provider = MemoryProvider::new("cloud:alice");
    for i in 0..count {
        provider.add_file(ROOT_ID, &format!("doc{i:02}.docx"), vec![0u8; i]);
    }
    Arc::new(provider)
}

fn session_over(provider: &Arc<MemoryProvider>, page_size: usize) -> ListingSession {
    let config = ListingConfig::builder().page_size(page_size).build().unwrap();
    let provider: Arc<dyn Provider> = provider.clone();
    ListingSession::new(provider, ROOT_ID, config)
}

#[tokio::test]
async fn test_twenty_five_entities_in_pages_of_ten() {
    let provider = seeded(25);
    let mut session = session_over(&provider, 10);

    session.load_first_page().await.unwrap();
    assert_eq!(session.buffer().len(), 10);
    assert_eq!(session.total(), 25);
    assert!(session.has_more());

    session.load_next_page().await.unwrap();
    session.load_next_page().await.unwrap();
    assert_eq!(session.buffer().len(), 25);
    assert_eq!(session.total(), 25);
    assert!(!session.has_more());
    assert_eq!(session.page(), 2);

    assert_eq!(
        session.load_next_page().await.unwrap_err(),
        ListingError::NoMorePages
    );
}

#[tokio::test]
async fn test_pagination_is_monotonic() {
    let provider = seeded(17);
    let mut session = session_over(&provider, 4);
    session.load_first_page().await.unwrap();

    let mut previous = session.buffer().len();
    while session.has_more() {
        session.load_next_page().await.unwrap();
        let len = session.buffer().len();
        assert!(len >= previous);
        assert!(len <= session.total());
        previous = len;
    }
    assert_eq!(previous, 17);
}

#[tokio::test]
async fn test_pages_append_without_reordering() {
    let provider = seeded(6);
    let mut session = session_over(&provider, 3);
    session
        .set_sort(SortSpec::ascending(SortField::Name))
        .await
        .unwrap();
    let first: Vec<_> = session.buffer().iter().map(|e| e.uid().clone()).collect();

    session.load_next_page().await.unwrap();
    let all: Vec<_> = session.buffer().iter().map(|e| e.title.as_str()).collect();
    assert_eq!(
        all,
        ["doc00.docx", "doc01.docx", "doc02.docx", "doc03.docx", "doc04.docx", "doc05.docx"]
    );
    assert_eq!(session.buffer()[0].uid(), &first[0]);
}

#[tokio::test]
async fn test_parameter_change_resets_before_fetch() {
    let provider = seeded(12);
    let mut session = session_over(&provider, 5);
    session.load_first_page().await.unwrap();
    session.load_next_page().await.unwrap();
    assert_eq!(session.page(), 1);

    let ticket = session.apply_sort(SortSpec::ascending(SortField::Size));
    assert_eq!(session.page(), 0);
    assert!(session.buffer().is_empty());
    assert_eq!(session.state(), ListingState::Loading);
    assert_eq!(ticket.query().page, 0);
    let result = ticket.run().await;
    session.finish(ticket, result).unwrap();
    assert_eq!(session.buffer()[0].title, "doc00.docx");

    let ticket = session.apply_filter(FilterSpec::new().with("type", "folder"));
    assert!(session.buffer().is_empty());
    assert_eq!(ticket.query().filter.get("type"), Some("folder"));
    let result = ticket.run().await;
    assert_eq!(session.finish(ticket, result).unwrap(), 0);
    assert_eq!(session.total(), 0);

    let ticket = session.apply_search("doc1").unwrap();
    assert_eq!(session.page(), 0);
    assert!(session.buffer().is_empty());
    assert_eq!(ticket.query().search.as_deref(), Some("doc1"));
}

#[tokio::test]
async fn test_superseded_result_is_discarded() {
    let provider = seeded(8);
    provider.add_file(ROOT_ID, "budget.xlsx", "b");
    let mut session = session_over(&provider, 40);

    let stale = session.begin_first_page();
    let fresh = session.apply_search("budget").unwrap();
    assert!(stale.cancel_token().is_cancelled());

    // Results arrive in reverse submission order
    let fresh_result = fresh.run().await;
    let stale_result = stale.run().await;

    assert_eq!(session.finish(fresh, fresh_result).unwrap(), 1);
    assert_eq!(
        session.finish(stale, stale_result).unwrap_err(),
        ListingError::Superseded
    );
    assert_eq!(session.buffer().len(), 1);
    assert_eq!(session.buffer()[0].title, "budget.xlsx");
}

#[tokio::test]
async fn test_ticket_future_can_be_spawned() {
    let provider = seeded(3);
    let mut session = session_over(&provider, 40);

    let ticket = session.begin_first_page();
    let handle = tokio::spawn(ticket.run());
    let result = handle.await.unwrap();

    assert_eq!(session.finish(ticket, result).unwrap(), 3);
}

#[tokio::test]
async fn test_first_page_failure_and_retry() {
    let provider = seeded(5);
    provider.fail_once_on(
        Operation::FetchPage,
        None,
        ProviderError::network("timed out"),
    );
    let mut session = session_over(&provider, 40);

    let err = session.load_first_page().await.unwrap_err();
    assert_eq!(err, ListingError::Provider(ProviderError::network("timed out")));
    assert_eq!(session.state(), ListingState::Error);
    assert!(session.buffer().is_empty());
    assert!(session.last_error().is_some());
    assert!(!session.has_more());

    session.retry().await.unwrap();
    assert_eq!(session.state(), ListingState::Loaded);
    assert_eq!(session.buffer().len(), 5);
    assert!(session.last_error().is_none());
}

#[tokio::test]
async fn test_next_page_failure_reverts_cursor() {
    let provider = seeded(10);
    let mut session = session_over(&provider, 4);
    session.load_first_page().await.unwrap();

    provider.fail_once_on(Operation::FetchPage, None, ProviderError::auth("expired"));
    assert!(session.load_next_page().await.is_err());
    assert_eq!(session.page(), 0);
    assert_eq!(session.state(), ListingState::Loaded);
    assert_eq!(session.buffer().len(), 4);
    assert_eq!(session.last_error(), Some(&ProviderError::auth("expired")));

    session.retry().await.unwrap();
    assert_eq!(session.page(), 1);
    assert_eq!(session.buffer().len(), 8);

    // The retried request asked for the same page
    let pages = provider.calls(Operation::FetchPage);
    assert_eq!(pages.len(), 3);
}

#[tokio::test]
async fn test_search_spans_folders_and_unchanged_term_skips_reload() {
    let provider = seeded(2);
    let nested = provider.add_folder(ROOT_ID, "Projects");
    provider.add_file(&nested.id, "doc-plan.docx", "p");
    let mut session = session_over(&provider, 40);
    session.load_first_page().await.unwrap();
    assert_eq!(session.total(), 3);

    assert!(session.set_search("  DOC ").await.unwrap());
    assert_eq!(session.search(), Some("doc"));
    assert_eq!(session.total(), 3);
    assert!(session.buffer().iter().any(|e| e.is_child_of(&nested.id)));

    let calls = provider.calls(Operation::FetchPage).len();
    assert!(!session.set_search("doc").await.unwrap());
    assert_eq!(provider.calls(Operation::FetchPage).len(), calls);

    assert!(session.set_search("").await.unwrap());
    assert_eq!(session.search(), None);
    assert_eq!(session.total(), 3);
}

#[tokio::test]
async fn test_change_folder_and_provider_reset() {
    let provider = seeded(3);
    let folder = provider.add_folder(ROOT_ID, "Inbox");
    provider.add_file(&folder.id, "mail.pdf", "m");
    let mut session = session_over(&provider, 40);
    session.load_first_page().await.unwrap();

    session.change_folder(folder.id.clone());
    assert_eq!(session.state(), ListingState::Empty);
    assert!(session.buffer().is_empty());
    assert_eq!(session.total(), 0);
    session.load_first_page().await.unwrap();
    assert_eq!(session.buffer()[0].title, "mail.pdf");

    let other: Arc<dyn Provider> = Arc::new(MemoryProvider::new("dav:bob"));
    session.change_provider(other, ROOT_ID);
    assert_eq!(session.state(), ListingState::Empty);
    assert_eq!(session.provider().id().as_str(), "dav:bob");
    session.load_first_page().await.unwrap();
    assert_eq!(session.total(), 0);
}

#[tokio::test]
async fn test_missing_folder_reports_not_found() {
    let provider = seeded(1);
    let config = ListingConfig::default();
    let dyn_provider: Arc<dyn Provider> = provider.clone();
    let mut session = ListingSession::new(dyn_provider, "gone", config);

    let err = session.load_first_page().await.unwrap_err();
    assert!(matches!(
        err,
        ListingError::Provider(ProviderError::NotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_debounced_search_reloads_once() {
    let provider = seeded(3);
    provider.add_file(ROOT_ID, "Budget 2024.xlsx", "b");
    let mut session = session_over(&provider, 10);
    session.load_first_page().await.unwrap();
    let before = provider.calls(Operation::FetchPage).len();

    let (tx, mut rx) = session.search_debouncer();
    for input in ["b", "bu", "bud", " Budget "] {
        tx.send(input.to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    drop(tx);

    while let Some(term) = rx.recv().await {
        session
            .set_search(term.as_deref().unwrap_or_default())
            .await
            .unwrap();
    }

    assert_eq!(provider.calls(Operation::FetchPage).len(), before + 1);
    assert_eq!(session.search(), Some("budget"));
    assert_eq!(session.buffer().len(), 1);
    assert_eq!(session.buffer()[0].title, "Budget 2024.xlsx");
}
