use std::sync::Arc;

use docshelf_core::{
    CancellationToken, ListingConfig, NoProgress, ProgressSink, Provider, ProviderError,
    TransferMode,
};
use docshelf_listing::{ListingSession, ListingState};
use docshelf_ops::{
    ConflictResolution, DeleteEvent, FixedResolver, Reconciliation, TransferRequest,
    apply_deletions, apply_outcome, apply_trash_emptied, delete_entities, empty_trash,
    execute_transfer, plan_transfer, rename_in_session, start_deletion,
};
use docshelf_providers::{MemoryProvider, Operation, ROOT_ID, TRASH_ID};

fn account(id: &str) -> Arc<MemoryProvider> {
    Arc::new(MemoryProvider::new(id))
}

async fn loaded_session(provider: &Arc<MemoryProvider>, folder_id: &str) -> ListingSession {
    let dyn_provider: Arc<dyn Provider> = provider.clone();
    let mut session = ListingSession::new(dyn_provider, folder_id, ListingConfig::default());
    session.load_first_page().await.unwrap();
    session
}

async fn move_between(
    cloud: &Arc<MemoryProvider>,
    dav: &Arc<MemoryProvider>,
    titles: &[&str],
) -> docshelf_ops::TransferOutcome {
    let items = titles
        .iter()
        .map(|title| cloud.find(ROOT_ID, title).unwrap())
        .collect();
    let source: Arc<dyn Provider> = cloud.clone();
    let destination: Arc<dyn Provider> = dav.clone();
    let request = TransferRequest::new(items, source, destination, dav.root(), TransferMode::Move);
    let cancel = CancellationToken::new();

    let plan = plan_transfer(request, &FixedResolver::default(), &cancel)
        .await
        .unwrap();
    let progress: Arc<dyn ProgressSink> = Arc::new(NoProgress);
    execute_transfer(plan, progress, &cancel).await.unwrap()
}

#[tokio::test]
async fn test_successful_move_patches_both_sessions() {
    let cloud = account("cloud:alice");
    let dav = account("dav:bob");
    cloud.add_file(ROOT_ID, "a.txt", "a");
    cloud.add_file(ROOT_ID, "b.txt", "b");
    cloud.add_file(ROOT_ID, "keep.txt", "k");
    dav.add_file(ROOT_ID, "z.txt", "z");

    let mut source_session = loaded_session(&cloud, ROOT_ID).await;
    let mut destination_session = loaded_session(&dav, ROOT_ID).await;

    let outcome = move_between(&cloud, &dav, &["a.txt", "b.txt"]).await;
    assert!(outcome.is_success());

    assert_eq!(
        apply_outcome(&mut source_session, &outcome),
        Reconciliation::Updated {
            removed: 2,
            inserted: 0
        }
    );
    assert_eq!(source_session.buffer().len(), 1);
    assert_eq!(source_session.total(), 1);

    assert_eq!(
        apply_outcome(&mut destination_session, &outcome),
        Reconciliation::Updated {
            removed: 0,
            inserted: 2
        }
    );
    let titles: Vec<_> = destination_session
        .buffer()
        .iter()
        .map(|e| e.title.as_str())
        .collect();
    assert_eq!(titles, ["a.txt", "b.txt", "z.txt"]);
    assert_eq!(destination_session.total(), 3);
}

#[tokio::test]
async fn test_partial_failure_asks_destination_to_reload() {
    let cloud = account("cloud:alice");
    let dav = account("dav:bob");
    cloud.add_file(ROOT_ID, "a.txt", "a");
    cloud.add_file(ROOT_ID, "C.pdf", "c");
    dav.fail_on(
        Operation::Upload,
        Some("C.pdf"),
        ProviderError::network("reset"),
    );

    let mut source_session = loaded_session(&cloud, ROOT_ID).await;
    let mut destination_session = loaded_session(&dav, ROOT_ID).await;
    let mut unrelated = loaded_session(&cloud, TRASH_ID).await;

    let outcome = move_between(&cloud, &dav, &["a.txt", "C.pdf"]).await;
    assert!(!outcome.is_success());

    assert_eq!(
        apply_outcome(&mut source_session, &outcome),
        Reconciliation::Updated {
            removed: 1,
            inserted: 0
        }
    );
    assert_eq!(source_session.buffer()[0].title, "C.pdf");
    assert_eq!(
        apply_outcome(&mut destination_session, &outcome),
        Reconciliation::NeedsReload
    );
    assert_eq!(
        apply_outcome(&mut unrelated, &outcome),
        Reconciliation::Unaffected
    );

    destination_session.load_first_page().await.unwrap();
    assert_eq!(destination_session.total(), 1);
}

#[tokio::test]
async fn test_overwrite_replaces_buffered_entity() {
    let cloud = account("cloud:alice");
    let x = cloud.add_folder(ROOT_ID, "X");
    let y = cloud.add_folder(ROOT_ID, "Y");
    let b = cloud.add_file(&x.id, "B.docx", "new");
    cloud.add_file(&y.id, "B.docx", "old");
    let cancel = CancellationToken::new();

    let mut destination_session = loaded_session(&cloud, &y.id).await;
    assert_eq!(destination_session.total(), 1);

    let provider: Arc<dyn Provider> = cloud.clone();
    let request = TransferRequest::new(
        vec![b.clone()],
        provider.clone(),
        provider,
        y,
        TransferMode::Move,
    );
    let plan = plan_transfer(
        request,
        &FixedResolver(ConflictResolution::OverwriteAll),
        &cancel,
    )
    .await
    .unwrap();
    let outcome = execute_transfer(plan, Arc::new(NoProgress), &cancel)
        .await
        .unwrap();

    apply_outcome(&mut destination_session, &outcome);
    assert_eq!(destination_session.buffer().len(), 1);
    assert_eq!(destination_session.total(), 1);
    assert_eq!(destination_session.buffer()[0].uid(), b.uid());
}

#[tokio::test]
async fn test_delete_continues_past_failures() {
    let cloud = account("cloud:alice");
    let items = vec![
        cloud.add_file(ROOT_ID, "a.txt", "a"),
        cloud.add_file(ROOT_ID, "b.txt", "b"),
        cloud.add_file(ROOT_ID, "c.txt", "c"),
    ];
    cloud.fail_on(
        Operation::Delete,
        Some("b.txt"),
        ProviderError::permission_denied("b"),
    );
    let mut session = loaded_session(&cloud, ROOT_ID).await;
    let cancel = CancellationToken::new();

    let report = delete_entities(cloud.as_ref(), items, &NoProgress, &cancel).await;
    assert!(!report.is_success());
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0.title, "b.txt");
    assert_eq!(report.summary(), "Deleted 2 items, 1 failed");

    assert_eq!(apply_deletions(&mut session, &report.deleted), 2);
    assert_eq!(session.buffer().len(), 1);
    assert_eq!(session.buffer()[0].title, "b.txt");
}

#[tokio::test]
async fn test_start_deletion_reports_completion() {
    let cloud = account("cloud:alice");
    let items = vec![
        cloud.add_file(ROOT_ID, "a.txt", "a"),
        cloud.add_file(ROOT_ID, "b.txt", "b"),
    ];
    let provider: Arc<dyn Provider> = cloud.clone();

    let mut rx = start_deletion(provider, items, CancellationToken::new());
    let mut progress_events = 0;
    let report = loop {
        match rx.recv().await.unwrap() {
            DeleteEvent::Progress(_) => progress_events += 1,
            DeleteEvent::Complete(report) => break report,
        }
    };

    assert!(report.is_success());
    assert_eq!(report.summary(), "Deleted 2 items");
    assert!(progress_events > 0);
    assert!(cloud.children(ROOT_ID).is_empty());
}

#[tokio::test]
async fn test_rename_in_session() {
    let cloud = account("cloud:alice");
    let draft = cloud.add_file(ROOT_ID, "draft.docx", "d");
    let mut session = loaded_session(&cloud, ROOT_ID).await;
    let cancel = CancellationToken::new();

    let renamed = rename_in_session(&mut session, draft.uid(), "final.docx", &cancel)
        .await
        .unwrap();
    assert_eq!(renamed.title, "final.docx");
    assert_eq!(session.buffer()[0].title, "final.docx");
    assert_eq!(session.buffer()[0].uid(), draft.uid());

    let invalid = rename_in_session(&mut session, draft.uid(), "a/b", &cancel).await;
    assert!(matches!(invalid, Err(ProviderError::InvalidName { .. })));

    let unchanged = rename_in_session(&mut session, draft.uid(), "final.docx", &cancel)
        .await
        .unwrap();
    assert_eq!(unchanged.title, "final.docx");
    assert_eq!(cloud.calls(Operation::Rename).len(), 1);
}

#[tokio::test]
async fn test_empty_trash_resets_trash_session() {
    let cloud = account("cloud:alice");
    let old = cloud.add_file(ROOT_ID, "old.txt", "o");
    let cancel = CancellationToken::new();
    cloud.delete(&old, &cancel).await.unwrap();

    let mut trash_session = loaded_session(&cloud, TRASH_ID).await;
    let mut root_session = loaded_session(&cloud, ROOT_ID).await;
    assert_eq!(trash_session.total(), 1);

    empty_trash(cloud.as_ref(), &cancel).await.unwrap();
    assert!(apply_trash_emptied(&mut trash_session));
    assert!(!apply_trash_emptied(&mut root_session));
    assert_eq!(trash_session.state(), ListingState::Empty);
    assert!(trash_session.buffer().is_empty());

    trash_session.load_first_page().await.unwrap();
    assert_eq!(trash_session.total(), 0);
}
