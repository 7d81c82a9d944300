mod common;

use backup_dav::{BackupStore, DavRoot, StoreConfig, StoreError};
use common::{TestDav, LEGACY_ROOT, USERNAME, USER_ROOT};
use hyper::StatusCode;
use tempfile::TempDir;

#[tokio::test]
async fn falls_back_to_legacy_root_and_caches_it() {
    let server = TestDav::start(LEGACY_ROOT).await;
    let spool_dir = TempDir::new().unwrap();
    let store = BackupStore::new(server.config(spool_dir.path())).unwrap();

    assert_eq!(store.resolve().await.unwrap(), DavRoot::Legacy);

    let probes = server.requests();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].path, format!("{}/", USER_ROOT));
    assert_eq!(probes[1].path, format!("{}/", LEGACY_ROOT));
    assert!(probes
        .iter()
        .all(|r| r.method == "PROPFIND" && r.depth.as_deref() == Some("0")));

    assert_eq!(store.resolve().await.unwrap(), DavRoot::Legacy);
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn user_root_is_preferred() {
    let server = TestDav::start(USER_ROOT).await;
    let spool_dir = TempDir::new().unwrap();
    let store = BackupStore::new(server.config(spool_dir.path())).unwrap();

    assert_eq!(
        store.resolve().await.unwrap(),
        DavRoot::UserFiles(USERNAME.into())
    );
    assert_eq!(server.count("PROPFIND", ""), 1);
}

#[tokio::test]
async fn no_matching_root_is_resolution_error() {
    let server = TestDav::start("/dav").await;
    let spool_dir = TempDir::new().unwrap();
    let store = BackupStore::new(server.config(spool_dir.path())).unwrap();

    match store.list().await {
        Err(StoreError::Resolution { last_status, .. }) => {
            assert_eq!(last_status, Some(StatusCode::NOT_FOUND))
        }
        other => panic!("expected resolution error, got {:?}", other.map(|l| l.len())),
    }
    assert!(store.profile().cached().is_none());
}

#[tokio::test]
async fn wrong_password_is_reported_as_auth_failure() {
    let server = TestDav::start(USER_ROOT).await;
    let config = StoreConfig::new(server.base_url(), USERNAME, "wrong");
    let store = BackupStore::new(config).unwrap();

    let err = store.ensure_folder().await.unwrap_err();
    assert!(matches!(err, StoreError::Resolution { .. }));
    assert!(err.is_auth_failure());
}

#[tokio::test]
async fn configured_root_skips_probing() {
    let server = TestDav::start("/dav").await;
    let spool_dir = TempDir::new().unwrap();
    let store = BackupStore::new(server.config(spool_dir.path()).with_dav_root("/dav/")).unwrap();

    assert_eq!(
        store.resolve().await.unwrap(),
        DavRoot::Custom("/dav/".into())
    );
    assert!(server.requests().is_empty());

    store.ensure_folder().await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 0);
}

#[tokio::test]
async fn unreachable_server_is_resolution_error() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let base_url = format!("http://{}", addr);

    let config = StoreConfig::new(base_url, USERNAME, common::PASSWORD);
    let store = BackupStore::new(config).unwrap();
    match store.resolve().await {
        Err(StoreError::Resolution { last_status, last_error, .. }) => {
            assert!(last_status.is_none());
            assert!(last_error.is_some());
        }
        other => panic!("expected resolution error, got {:?}", other),
    }
}
