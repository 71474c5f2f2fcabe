use std::fs;

use docshelf_core::{
    ByteStream, CancellationToken, NoProgress, PageQuery, Provider, ProviderError, ServerTransfer,
    SortField, SortSpec, TransferMode,
};
use docshelf_providers::{LocalProvider, TRASH_DIR};
use tempfile::TempDir;

fn setup() -> (TempDir, LocalProvider) {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("docs")).unwrap();
    fs::create_dir(tmp.path().join("archive")).unwrap();
    fs::write(tmp.path().join("docs").join("A.docx"), "alpha").unwrap();
    fs::write(tmp.path().join("docs").join("B.docx"), "bravo").unwrap();
    fs::write(tmp.path().join("archive").join("B.docx"), "old bravo").unwrap();
    fs::write(tmp.path().join("readme.txt"), "hello").unwrap();

    let provider = LocalProvider::open(tmp.path()).unwrap();
    (tmp, provider)
}

fn by_name(folder_id: &str) -> PageQuery {
    let mut query = PageQuery::first(folder_id, 40);
    query.sort = SortSpec::ascending(SortField::Name);
    query
}

#[tokio::test]
async fn test_list_root() {
    let (_tmp, provider) = setup();
    let cancel = CancellationToken::new();

    let page = provider.fetch_page(&by_name("/"), &cancel).await.unwrap();
    let titles: Vec<_> = page.entities.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["archive", "docs", "readme.txt"]);
    assert_eq!(page.total, 3);
    assert!(page.entities.iter().all(|e| e.is_child_of("/")));

    let readme = &page.entities[2];
    assert_eq!(readme.id, "/readme.txt");
    assert_eq!(readme.size(), Some(5));
    assert!(readme.updated_at().is_some());
}

#[tokio::test]
async fn test_list_missing_folder() {
    let (_tmp, provider) = setup();
    let cancel = CancellationToken::new();

    let result = provider.fetch_page(&by_name("/nope"), &cancel).await;
    assert!(matches!(result, Err(ProviderError::NotFound { .. })));
}

#[tokio::test]
async fn test_search_spans_subfolders() {
    let (_tmp, provider) = setup();
    let cancel = CancellationToken::new();

    let mut query = by_name("/");
    query.search = Some("b.docx".into());
    let page = provider.fetch_page(&query, &cancel).await.unwrap();

    assert_eq!(page.total, 2);
    let mut parents: Vec<_> = page
        .entities
        .iter()
        .filter_map(|e| e.parent_id.as_deref())
        .collect();
    parents.sort();
    assert_eq!(parents, ["/archive", "/docs"]);
}

#[tokio::test]
async fn test_same_root_is_same_account() {
    let (tmp, provider) = setup();
    let other_dir = TempDir::new().unwrap();

    let same = LocalProvider::open(tmp.path()).unwrap();
    let other = LocalProvider::open(other_dir.path()).unwrap();

    assert!(provider.supports_server_side_transfer(&same));
    assert!(!provider.supports_server_side_transfer(&other));
}

#[tokio::test]
async fn test_check_conflicts() {
    let (_tmp, provider) = setup();
    let cancel = CancellationToken::new();

    let docs = provider.entity("/docs", &cancel).await.unwrap();
    let archive = provider.entity("/archive", &cancel).await.unwrap();
    let items = provider.fetch_page(&by_name(&docs.id), &cancel).await.unwrap().entities;

    let conflicts = provider.check_conflicts(&items, &archive, 2, &cancel).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].title, "B.docx");
}

#[tokio::test]
async fn test_server_side_move_with_overwrite() {
    let (tmp, provider) = setup();
    let cancel = CancellationToken::new();

    let archive = provider.entity("/archive", &cancel).await.unwrap();
    let b = provider.entity("/docs/B.docx", &cancel).await.unwrap();

    let refused = provider
        .server_side_transfer(
            ServerTransfer {
                items: std::slice::from_ref(&b),
                destination: &archive,
                mode: TransferMode::Move,
                overwrite: false,
            },
            &NoProgress,
            &cancel,
        )
        .await
        .unwrap();
    assert!(matches!(
        refused[0].result,
        Err(ProviderError::AlreadyExists { .. })
    ));

    let reports = provider
        .server_side_transfer(
            ServerTransfer {
                items: std::slice::from_ref(&b),
                destination: &archive,
                mode: TransferMode::Move,
                overwrite: true,
            },
            &NoProgress,
            &cancel,
        )
        .await
        .unwrap();
    let moved = reports[0].result.clone().unwrap();
    assert_eq!(moved.id, "/archive/B.docx");
    assert_eq!(
        fs::read_to_string(tmp.path().join("archive").join("B.docx")).unwrap(),
        "bravo"
    );
    assert!(!tmp.path().join("docs").join("B.docx").exists());
}

#[tokio::test]
async fn test_upload_and_download() {
    let (tmp, provider) = setup();
    let cancel = CancellationToken::new();
    let docs = provider.entity("/docs", &cancel).await.unwrap();

    let created = provider
        .upload(
            ByteStream::from_bytes(b"charlie".to_vec(), 3),
            &docs,
            "C.pdf",
            false,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(created.id, "/docs/C.pdf");
    assert_eq!(created.size(), Some(7));

    let stream = provider.download(&created, &cancel).await.unwrap();
    assert_eq!(stream.len_hint(), Some(7));
    assert_eq!(stream.collect_bytes().await.unwrap(), b"charlie");

    let again = provider
        .upload(
            ByteStream::from_bytes(b"x".to_vec(), 3),
            &docs,
            "C.pdf",
            false,
            &cancel,
        )
        .await;
    assert!(matches!(again, Err(ProviderError::AlreadyExists { .. })));

    // No partial upload left behind
    let leftovers = fs::read_dir(tmp.path().join("docs"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".docshelf-part")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_create_folder_reuse() {
    let (_tmp, provider) = setup();
    let cancel = CancellationToken::new();
    let root = provider.root();

    let existing = provider.create_folder(&root, "docs", true, &cancel).await.unwrap();
    assert_eq!(existing.id, "/docs");

    let refused = provider.create_folder(&root, "docs", false, &cancel).await;
    assert!(matches!(refused, Err(ProviderError::AlreadyExists { .. })));

    let created = provider.create_folder(&root, "new", false, &cancel).await.unwrap();
    assert!(created.is_folder());
    assert_eq!(created.parent_id.as_deref(), Some("/"));
}

#[tokio::test]
async fn test_rename() {
    let (tmp, provider) = setup();
    let cancel = CancellationToken::new();
    let a = provider.entity("/docs/A.docx", &cancel).await.unwrap();

    let renamed = provider.rename(&a, "Alpha.docx", &cancel).await.unwrap();
    assert_eq!(renamed.title, "Alpha.docx");
    assert!(tmp.path().join("docs").join("Alpha.docx").exists());

    let taken = provider.rename(&renamed, "B.docx", &cancel).await;
    assert!(matches!(taken, Err(ProviderError::AlreadyExists { .. })));
}

#[tokio::test]
async fn test_delete_and_empty_trash() {
    let (tmp, provider) = setup();
    let cancel = CancellationToken::new();
    let readme = provider.entity("/readme.txt", &cancel).await.unwrap();

    provider.delete(&readme, &cancel).await.unwrap();
    assert!(tmp.path().join(TRASH_DIR).join("readme.txt").exists());

    // Trash is hidden from the root listing but listable on its own
    let root_page = provider.fetch_page(&by_name("/"), &cancel).await.unwrap();
    assert_eq!(root_page.total, 2);
    let trash_id = provider.trash_folder_id().unwrap();
    let trash_page = provider.fetch_page(&by_name(&trash_id), &cancel).await.unwrap();
    assert_eq!(trash_page.total, 1);

    provider.empty_trash(&cancel).await.unwrap();
    let trash_page = provider.fetch_page(&by_name(&trash_id), &cancel).await.unwrap();
    assert_eq!(trash_page.total, 0);

    let root = provider.root();
    assert!(matches!(
        provider.delete(&root, &cancel).await,
        Err(ProviderError::PermissionDenied { .. })
    ));
}
