//! Remote Windows backend driven through a fake playbook runner

mod common;

use common::{target, FakeRunner};
use std::sync::Arc;
use tempfile::TempDir;
use testkit_common::{Error, Platform, ServerTarget, StorageEngine};
use testkit_liteserv::backend::remote::{
    DOWNLOAD_PLAYBOOK, INSTALL_PLAYBOOK, START_PLAYBOOK, STOP_PLAYBOOK,
};
use testkit_liteserv::backend::{PlatformBackend, RemoteServiceBackend};
use testkit_liteserv::HarnessConfig;

const NEW_LAYOUT: &str = "couchbase-lite-net-msft-1.4.0-3-liteserv/LiteServ.exe";
const NET45_LAYOUT: &str = "couchbase-lite-net-msft-1.4.0-3-liteserv/net45/LiteServ.exe";

fn backend(runner: Arc<FakeRunner>, engine: StorageEngine) -> RemoteServiceBackend {
    let config = Arc::new(HarnessConfig {
        latest_builds_url: "http://builds".to_string(),
        ..Default::default()
    });
    let target = ServerTarget {
        storage_engine: engine,
        ..target(Platform::WindowsRemote, "1.4.0-3", 59840)
    };
    RemoteServiceBackend::new(target, config, runner, common::fast_poller(3)).unwrap()
}

#[tokio::test]
async fn test_download_runs_once() {
    let runner = FakeRunner::new(|_, _| 0);
    let mut backend = backend(runner.clone(), StorageEngine::SQLite);

    backend.download().await.unwrap();
    backend.download().await.unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, DOWNLOAD_PLAYBOOK);
    assert_eq!(
        calls[0].1["download_url"],
        "http://builds/couchbase-lite-net/1.4.0/3/LiteServ.zip"
    );
    assert_eq!(calls[0].1["package_name"], "couchbase-lite-net-msft-1.4.0-3-liteserv");
}

#[tokio::test]
async fn test_download_failure_is_a_playbook_error() {
    let runner = FakeRunner::new(|name, _| if name == DOWNLOAD_PLAYBOOK { 3 } else { 0 });
    let mut backend = backend(runner.clone(), StorageEngine::SQLite);

    let err = backend.download().await.unwrap_err();
    match err {
        Error::Playbook {
            playbook,
            exit_code,
        } => {
            assert_eq!(playbook, DOWNLOAD_PLAYBOOK);
            assert_eq!(exit_code, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    // Not marked downloaded, so the next attempt runs the playbook again
    let _ = backend.download().await;
    assert_eq!(runner.playbooks(), vec![DOWNLOAD_PLAYBOOK, DOWNLOAD_PLAYBOOK]);
}

#[tokio::test]
async fn test_install_falls_back_to_net45_layout() {
    let runner = FakeRunner::new(|name, vars| {
        if name == INSTALL_PLAYBOOK && vars["directory_path"] == NEW_LAYOUT {
            2
        } else {
            0
        }
    });
    let mut backend = backend(runner.clone(), StorageEngine::SQLite);

    backend.install().await.unwrap();

    let paths: Vec<String> = runner
        .calls()
        .iter()
        .map(|(_, vars)| vars["directory_path"].clone())
        .collect();
    assert_eq!(paths, vec![NEW_LAYOUT, NET45_LAYOUT]);
}

#[tokio::test]
async fn test_install_fails_when_both_layouts_fail() {
    let runner = FakeRunner::new(|_, _| 1);
    let mut backend = backend(runner.clone(), StorageEngine::SQLite);

    let err = backend.install().await.unwrap_err();
    assert!(matches!(err, Error::Install(_)));
    assert_eq!(runner.calls().len(), 2);
}

#[tokio::test]
async fn test_start_and_stop_use_the_binary_that_started() {
    let runner = FakeRunner::new(|name, vars| {
        if name == START_PLAYBOOK && vars["binary_path"] == NEW_LAYOUT {
            1
        } else {
            0
        }
    });
    let mut backend = backend(runner.clone(), StorageEngine::ForestDBEncrypted);
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("windows.txt");

    backend.start(&log).await.unwrap();
    let session = backend.session().unwrap().clone();
    assert_eq!(session.binary_path, NET45_LAYOUT);
    assert_eq!(session.log_path, log);

    let calls = runner.calls();
    assert_eq!(
        calls[1].1["launch_args"],
        concat!(
            "--port 59840 --dir . --storage ForestDB ",
            "--dbpassword ls_db=pass --dbpassword ls_db1=pass --dbpassword ls_db2=pass"
        )
    );

    backend.stop().await.unwrap();
    backend.stop().await.unwrap();
    assert!(!backend.is_started());

    let stops: Vec<_> = runner
        .calls()
        .into_iter()
        .filter(|(name, _)| name == STOP_PLAYBOOK)
        .collect();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].1["binary_path"], NET45_LAYOUT);
    assert_eq!(stops[0].1["log_full_path"], log.to_string_lossy());
}

#[tokio::test]
async fn test_start_failure_leaves_no_session() {
    let runner = FakeRunner::new(|name, _| if name == START_PLAYBOOK { 1 } else { 0 });
    let mut backend = backend(runner.clone(), StorageEngine::SQLite);
    let tmp = TempDir::new().unwrap();

    let err = backend.start(&tmp.path().join("windows.txt")).await.unwrap_err();
    assert!(matches!(err, Error::Playbook { exit_code: 1, .. }));
    assert!(backend.session().is_none());

    backend.stop().await.unwrap();
    assert_eq!(runner.playbooks(), vec![START_PLAYBOOK, START_PLAYBOOK]);
}
