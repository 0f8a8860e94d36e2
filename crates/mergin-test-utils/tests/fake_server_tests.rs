use futures::StreamExt;
use mergin_api::{
    ApiError, ListQuery, ProjectId, PushChanges, PushFile, PushRequest, RequestContext, Transport,
};
use mergin_files::FileRecord;
use mergin_test_utils::FakeServer;
use uuid::Uuid;

fn ctx() -> RequestContext {
    RequestContext::new("http://fake.invalid/").with_token(Some("Bearer fake-jan".into()))
}

#[tokio::test]
async fn fake_server_versions_advance() {
    let server = FakeServer::new();
    let id = ProjectId::new("jan", "survey");
    server.push_files(&id, &[("a.txt", b"one")]);
    let first = server.project_info(&ctx(), &id).await.unwrap();

    server.push_files(&id, &[("b.txt", b"two")]);
    let second = server.project_info(&ctx(), &id).await.unwrap();

    assert_eq!(first.version.as_deref(), Some("v1"));
    assert_eq!(second.version.as_deref(), Some("v2"));
    assert!(second.updated > first.updated);
    assert_eq!(second.files.len(), 2);
}

#[tokio::test]
async fn fake_server_streams_file_in_chunks() {
    let server = FakeServer::new();
    let id = ProjectId::new("jan", "survey");
    server.push_files(&id, &[("notes.txt", b"0123456789")]);

    let stream = server.download_file(&ctx(), &id, "notes.txt", None).await.unwrap();
    let chunks: Vec<Vec<u8>> = stream.map(|c| c.unwrap()).collect().await;

    assert!(chunks.len() > 1);
    assert_eq!(chunks.concat(), b"0123456789");
}

#[tokio::test]
async fn fake_server_push_checks_base_version_and_checksums() {
    let server = FakeServer::new();
    let id = ProjectId::new("jan", "survey");
    server.push_files(&id, &[("a.txt", b"one")]);

    let chunk = Uuid::new_v4();
    let request = PushRequest {
        version: Some("v1".into()),
        changes: PushChanges {
            added: vec![PushFile {
                record: FileRecord::from_bytes("b.txt", b"two"),
                chunks: vec![chunk],
            }],
            ..PushChanges::default()
        },
    };

    let stale = PushRequest {
        version: Some("v0".into()),
        ..request.clone()
    };
    let err = server.push_start(&ctx(), &id, &stale).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let tx = server.push_start(&ctx(), &id, &request).await.unwrap().transaction;
    server.push_chunk(&ctx(), &tx, chunk, b"two".to_vec()).await.unwrap();
    let info = server.push_finish(&ctx(), &tx).await.unwrap();

    assert_eq!(info.version.as_deref(), Some("v2"));
    assert_eq!(server.files(&id).get("b.txt").map(Vec::as_slice), Some(&b"two"[..]));
    assert_eq!(server.open_transactions(), 0);
}

#[tokio::test]
async fn fake_server_listing_filters_and_pages() {
    let server = FakeServer::new();
    for name in ["alpha", "beta", "gamma"] {
        server.add_project(&ProjectId::new("jan", name));
    }
    server.add_project(&ProjectId::new("eva", "delta"));

    let page = server
        .list_projects(&ctx(), &ListQuery::new(2).with_page(2))
        .await
        .unwrap();
    assert_eq!(page.count, 4);
    assert_eq!(page.projects.len(), 2);
    assert_eq!(page.page, 2);

    let mine = server
        .list_projects(&ctx(), &ListQuery::new(10).with_flag(Some(mergin_api::ListFlag::Created)))
        .await
        .unwrap();
    assert_eq!(mine.count, 3);
}

#[tokio::test]
async fn fake_server_offline_is_network_error() {
    let server = FakeServer::new();
    server.set_offline(true);
    let err = server.ping(&ctx()).await.unwrap_err();
    assert!(err.is_network());
}
