use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mergin_api::{ApiVersionStatus, ProjectId, RequestId, SyncEvent};
use mergin_reconcile::ProjectStatus;
use mergin_sync::{ModelChange, ModelKind, ProjectsModel, SyncError, SyncSession};
use mergin_test_utils::{read_file, test_config, write_file, FakeServer};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;

fn trees() -> ProjectId {
    ProjectId::new("lutra", "trees")
}

async fn next_matching(rx: &mut Receiver<SyncEvent>, mut wanted: impl FnMut(&SyncEvent) -> bool) -> SyncEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn finished(rx: &mut Receiver<SyncEvent>, request: RequestId) -> bool {
    let event = next_matching(rx, |e| {
        matches!(e, SyncEvent::SyncProjectFinished { request_id, .. } if *request_id == request)
    })
    .await;
    matches!(event, SyncEvent::SyncProjectFinished { success: true, .. })
}

fn session_for(server: &Arc<FakeServer>) -> (TempDir, SyncSession) {
    let (dir, config) = test_config();
    (dir, SyncSession::new(config, server.clone()))
}

async fn logged_in(server: &Arc<FakeServer>) -> (TempDir, SyncSession) {
    let (dir, session) = session_for(server);
    let mut rx = session.subscribe();
    session.authorize("lutra", "secret");
    next_matching(&mut rx, |e| matches!(e, SyncEvent::AuthChanged)).await;
    (dir, session)
}

async fn downloaded(server: &Arc<FakeServer>) -> (TempDir, SyncSession) {
    let (dir, session) = logged_in(server).await;
    let mut rx = session.subscribe();
    let request = session.download_project(&trees()).unwrap();
    assert!(finished(&mut rx, request).await);
    (dir, session)
}

/// Edit a file and stamp it just after `after`
fn edit_after(path: &Path, data: &[u8], after: DateTime<Utc>) {
    std::fs::write(path, data).unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(after + ChronoDuration::milliseconds(1)))
        .unwrap();
}

async fn listed(session: &SyncSession) {
    let mut rx = session.subscribe();
    let request = session.list_projects(session.list_query(None, "", 1));
    next_matching(&mut rx, |e| {
        matches!(e, SyncEvent::ListProjectsFinished { request_id, .. } if *request_id == request)
    })
    .await;
}

fn status_of(session: &SyncSession, project: &ProjectId) -> ProjectStatus {
    let server_updated = session
        .projects()
        .into_iter()
        .find(|s| &s.id() == project)
        .and_then(|s| s.updated);
    let local = session.local_projects().project_by_id(project).unwrap();
    local.status(server_updated.or(local.local_updated()), session.scanner())
}

#[tokio::test]
async fn download_edit_upload_round() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"alpha"), ("data/b.gpkg", b"0123456789abcdef")]);

    let (_dir, session) = downloaded(&server).await;
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    assert_eq!(read_file(&local.path, "a.txt"), "alpha");
    assert_eq!(read_file(&local.path, "data/b.gpkg"), "0123456789abcdef");
    assert_eq!(local.version(), Some("v1"));
    assert_eq!(status_of(&session, &trees()), ProjectStatus::UpToDate);

    edit_after(&local.path.join("a.txt"), b"alpha, edited", local.last_sync().unwrap());
    assert_eq!(status_of(&session, &trees()), ProjectStatus::Modified);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut rx = session.subscribe();
    let request = session.upload_project(&trees()).unwrap();
    assert!(finished(&mut rx, request).await);

    assert_eq!(server.files(&trees())["a.txt"], b"alpha, edited".to_vec());
    assert_eq!(server.project_version(&trees()).as_deref(), Some("v2"));
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    assert_eq!(local.version(), Some("v2"));
    assert_eq!(status_of(&session, &trees()), ProjectStatus::UpToDate);
    assert_eq!(server.open_transactions(), 0);
}

#[tokio::test]
async fn upload_conflict_pushes_nothing() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"alpha")]);
    let (_dir, session) = downloaded(&server).await;
    let local = session.local_projects().project_by_id(&trees()).unwrap();

    edit_after(&local.path.join("a.txt"), b"mine", local.last_sync().unwrap());
    server.push_files(&trees(), &[("a.txt", b"theirs")]);

    let mut rx = session.subscribe();
    let request = session.upload_project(&trees()).unwrap();
    let notice = next_matching(&mut rx, |e| matches!(e, SyncEvent::Notify { .. })).await;
    assert!(!finished(&mut rx, request).await);

    assert!(matches!(notice, SyncEvent::Notify { message } if message.contains("changed on the server")));
    assert_eq!(server.push_start_count(), 0);
    assert_eq!(server.push_chunk_count(), 0);
    assert_eq!(server.files(&trees())["a.txt"], b"theirs".to_vec());
    assert_eq!(read_file(&local.path, "a.txt"), "mine");
    assert!(!session.pending().is_pending(&trees()));
}

#[tokio::test]
async fn update_pulls_changes_and_keeps_local_files() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"alpha"), ("old.txt", b"old")]);
    let (_dir, session) = downloaded(&server).await;
    let dir = session.local_projects().project_by_id(&trees()).unwrap().path;

    write_file(&dir, "mine.txt", b"local only");
    server.push_files(&trees(), &[("a.txt", b"alpha v2")]);
    server.delete_files(&trees(), &["old.txt"]);

    let mut rx = session.subscribe();
    let request = session.update_project(&trees()).unwrap();
    assert!(finished(&mut rx, request).await);

    assert_eq!(read_file(&dir, "a.txt"), "alpha v2");
    assert!(!dir.join("old.txt").exists());
    assert_eq!(read_file(&dir, "mine.txt"), "local only");
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    assert_eq!(local.version(), server.project_version(&trees()).as_deref());
}

#[tokio::test]
async fn cancelled_download_keeps_written_files() {
    let server = Arc::new(FakeServer::new());
    server.push_files(
        &trees(),
        &[("a.txt", b"first"), ("b.txt", b"second"), ("c.txt", b"third")],
    );
    let (dir, session) = logged_in(&server).await;
    let mut rx = session.subscribe();

    server.hold_downloads_after(1);
    let request = session.download_project(&trees()).unwrap();
    timeout(Duration::from_secs(10), async {
        while server.download_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(session.update_cancel(&trees()));
    assert!(!session.update_cancel(&trees()));
    assert!(!session.pending().is_pending(&trees()));
    next_matching(&mut rx, |e| {
        matches!(e, SyncEvent::SyncProjectStatusChanged { progress, .. } if *progress < 0.0)
    })
    .await;

    server.open_gate();
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, SyncEvent::SyncProjectFinished { request_id, .. } if request_id == request),
            "late completion must be ignored"
        );
    }

    let project_dir = dir.path().join("trees");
    assert_eq!(read_file(&project_dir, "a.txt"), "first");
    assert!(!project_dir.join("c.txt").exists());
    let local = session.local_projects().project_by_path(&project_dir).unwrap();
    assert!(local.metadata.is_none());
}

#[tokio::test]
async fn failed_update_keeps_written_files_and_version() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"alpha"), ("b.txt", b"beta")]);
    let (_dir, session) = downloaded(&server).await;
    let dir = session.local_projects().project_by_id(&trees()).unwrap().path;
    server.push_files(&trees(), &[("a.txt", b"alpha v2"), ("b.txt", b"beta v2")]);

    server.fail_downloads_after(1);
    let mut rx = session.subscribe();
    let request = session.update_project(&trees()).unwrap();
    let notice = next_matching(&mut rx, |e| matches!(e, SyncEvent::Notify { .. })).await;
    assert!(!finished(&mut rx, request).await);

    assert!(matches!(notice, SyncEvent::Notify { message } if message.contains("after 1 files")));
    assert_eq!(read_file(&dir, "a.txt"), "alpha v2");
    assert_eq!(read_file(&dir, "b.txt"), "beta");
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    assert_eq!(local.version(), Some("v1"));
    server.clear_failures();
    listed(&session).await;
    assert_eq!(status_of(&session, &trees()), ProjectStatus::OutOfDate);

    let request = session.update_project(&trees()).unwrap();
    assert!(finished(&mut rx, request).await);
    assert_eq!(read_file(&dir, "b.txt"), "beta v2");
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    assert_eq!(local.version(), Some("v2"));
}

#[tokio::test]
async fn failed_upload_cancels_transaction() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"alpha")]);
    let (_dir, session) = downloaded(&server).await;
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    let synced = local.metadata.clone();
    edit_after(&local.path.join("a.txt"), b"alpha, edited locally", local.last_sync().unwrap());

    server.fail_chunks_after(1);
    let mut rx = session.subscribe();
    let request = session.upload_project(&trees()).unwrap();
    assert!(!finished(&mut rx, request).await);

    assert_eq!(server.push_start_count(), 1);
    assert_eq!(server.push_chunk_count(), 1);
    assert_eq!(server.push_cancel_count(), 1);
    assert_eq!(server.open_transactions(), 0);
    assert_eq!(server.files(&trees())["a.txt"], b"alpha".to_vec());
    let local = session.local_projects().project_by_id(&trees()).unwrap();
    assert_eq!(local.metadata, synced);
    assert_eq!(read_file(&local.path, "a.txt"), "alpha, edited locally");
    assert!(!session.pending().is_pending(&trees()));
}

#[tokio::test]
async fn download_never_reuses_another_projects_directory() {
    let alice = ProjectId::new("alice", "trees");
    let bob = ProjectId::new("bob", "trees");
    let server = Arc::new(FakeServer::new());
    server.push_files(&alice, &[("alice_only.txt", b"alice"), ("shared.txt", b"alice shared")]);
    server.push_files(&bob, &[("shared.txt", b"bob shared")]);
    let (dir, session) = session_for(&server);
    let mut rx = session.subscribe();

    let request = session.download_project(&alice).unwrap();
    assert!(finished(&mut rx, request).await);
    let request = session.download_project(&bob).unwrap();
    assert!(finished(&mut rx, request).await);

    let alice_dir = session.local_projects().project_by_id(&alice).unwrap().path;
    let bob_dir = session.local_projects().project_by_id(&bob).unwrap().path;
    assert_eq!(alice_dir, dir.path().join("trees"));
    assert_eq!(bob_dir, dir.path().join("trees-1"));
    assert_eq!(read_file(&alice_dir, "alice_only.txt"), "alice");
    assert_eq!(read_file(&alice_dir, "shared.txt"), "alice shared");
    assert_eq!(read_file(&bob_dir, "shared.txt"), "bob shared");
    assert!(!bob_dir.join("alice_only.txt").exists());
}

#[tokio::test]
async fn download_leaves_unsynced_directory_alone() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"from server")]);
    let (dir, session) = session_for(&server);
    let own = dir.path().join("trees");
    write_file(&own, "a.txt", b"mine");

    let mut rx = session.subscribe();
    let request = session.download_project(&trees()).unwrap();
    assert!(finished(&mut rx, request).await);

    let project_dir = session.local_projects().project_by_id(&trees()).unwrap().path;
    assert_eq!(project_dir, dir.path().join("trees-1"));
    assert_eq!(read_file(&project_dir, "a.txt"), "from server");
    assert_eq!(read_file(&own, "a.txt"), "mine");
    assert!(!own.join(".mergin").exists());
}

#[tokio::test]
async fn second_start_is_rejected_while_pending() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"first")]);
    let (_dir, session) = logged_in(&server).await;

    server.hold_downloads_after(0);
    let request = session.download_project(&trees()).unwrap();
    let err = session.download_project(&trees()).unwrap_err();
    assert!(matches!(err, SyncError::AlreadyPending(_)));
    assert!(!session.upload_cancel(&trees()));
    assert_eq!(session.pending().get(&trees()).unwrap().request_id, request);

    assert!(session.update_cancel(&trees()));
    server.open_gate();
}

#[tokio::test]
async fn model_pending_follows_transfers() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"first")]);
    let (_dir, session) = logged_in(&server).await;
    let mut rx = session.subscribe();
    let mut model = ProjectsModel::new(ModelKind::Explore, session.clone());

    let listing = model.list_projects("", 1).unwrap();
    let event = next_matching(&mut rx, |e| {
        matches!(e, SyncEvent::ListProjectsFinished { request_id, .. } if *request_id == listing)
    })
    .await;
    assert_eq!(model.handle_event(&event), Some(ModelChange::Reset));
    assert_eq!(model.project_from_id("lutra/trees").unwrap().status(), ProjectStatus::NoVersion);

    server.hold_downloads_after(0);
    let request = model.sync_project("lutra/trees").unwrap().unwrap();
    let started = next_matching(&mut rx, |e| matches!(e, SyncEvent::SyncProjectStatusChanged { .. })).await;
    assert_eq!(model.handle_event(&started), Some(ModelChange::RowChanged(0)));
    assert!(model.entries()[0].is_pending());
    assert_eq!(model.sync_project("lutra/trees").unwrap(), None);

    assert!(model.stop_project_sync("lutra/trees"));
    let cancelled = next_matching(&mut rx, |e| {
        matches!(e, SyncEvent::SyncProjectStatusChanged { progress, .. } if *progress < 0.0)
    })
    .await;
    model.handle_event(&cancelled);
    assert!(!model.entries()[0].is_pending());
    assert_eq!(session.pending().is_pending(&trees()), model.entries()[0].is_pending());

    server.open_gate();
    let _ = request;
}

#[tokio::test]
async fn model_ignores_stale_listing() {
    let server = Arc::new(FakeServer::new());
    server.push_files(&trees(), &[("a.txt", b"first")]);
    let (_dir, session) = session_for(&server);
    let mut rx = session.subscribe();
    let mut model = ProjectsModel::new(ModelKind::Explore, session.clone());

    let first = model.list_projects("", 1).unwrap();
    let second = model.list_projects("", 1).unwrap();
    assert!(second > first);

    let mut answers = Vec::new();
    while answers.len() < 2 {
        let event = next_matching(&mut rx, |e| matches!(e, SyncEvent::ListProjectsFinished { .. })).await;
        answers.push(event);
    }
    for event in &answers {
        let SyncEvent::ListProjectsFinished { request_id, .. } = event else {
            unreachable!()
        };
        let change = model.handle_event(event);
        if *request_id == first {
            assert_eq!(change, None);
        } else {
            assert_eq!(change, Some(ModelChange::Reset));
        }
    }
    assert!(model.contains_project("lutra/trees"));
}

#[tokio::test]
async fn ping_and_incompatible_server() {
    let server = Arc::new(FakeServer::new());
    let (_dir, session) = session_for(&server);
    let mut rx = session.subscribe();

    session.ping_server();
    let ping = next_matching(&mut rx, |e| matches!(e, SyncEvent::PingFinished { .. })).await;
    assert!(matches!(ping, SyncEvent::PingFinished { message, .. } if message.is_empty()));
    assert_eq!(session.api_version_status(), ApiVersionStatus::Ok);

    server.set_version("2018.1");
    session.set_api_root("http://other.invalid/").unwrap();
    session.list_projects(session.list_query(None, "", 1));
    next_matching(&mut rx, |e| matches!(e, SyncEvent::ApiIncompatibilityOccurred { .. })).await;
    assert_eq!(session.api_version_status(), ApiVersionStatus::Incompatible);
}

#[tokio::test]
async fn authorization_lifecycle() {
    let server = Arc::new(FakeServer::new().with_user("lutra", "secret"));
    let (_dir, config) = test_config();
    let session = SyncSession::new(config.clone(), server.clone());
    let mut rx = session.subscribe();

    session.authorize("lutra", "wrong");
    next_matching(&mut rx, |e| matches!(e, SyncEvent::AuthFailed)).await;
    assert!(!session.has_auth_data());

    session.authorize("lutra", "secret");
    next_matching(&mut rx, |e| matches!(e, SyncEvent::AuthChanged)).await;
    assert!(session.has_auth_data());

    session.get_user_info();
    next_matching(&mut rx, |e| matches!(e, SyncEvent::UserInfoChanged)).await;
    assert_eq!(session.user_info().unwrap().username, "lutra");

    let restarted = SyncSession::new(config.clone(), server.clone());
    assert_eq!(restarted.username().as_deref(), Some("lutra"));
    assert!(restarted.has_auth_data());

    restarted.clear_auth();
    assert!(!restarted.has_auth_data());
    assert!(!SyncSession::new(config, server).has_auth_data());
}
