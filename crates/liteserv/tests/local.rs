//! Local process backend with a stand-in LiteServ script
#![cfg(unix)]

mod common;

use common::{target, FakeFetcher};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use testkit_common::Platform;
use testkit_liteserv::backend::{LocalProcessBackend, PlatformBackend};
use testkit_liteserv::download::ArtifactCache;
use testkit_liteserv::HarnessConfig;

const FAKE_LITESERV: &[u8] = b"#!/bin/sh\necho \"$@\"\nexec sleep 30\n";

fn zip_with(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn macos_backend(tmp: &TempDir, fetcher: Arc<FakeFetcher>) -> LocalProcessBackend {
    let config = Arc::new(HarnessConfig {
        binary_dir: tmp.path().join("binaries"),
        results_dir: tmp.path().join("results"),
        latest_builds_url: "http://builds".to_string(),
        ..Default::default()
    });
    let cache = ArtifactCache::new(config.binary_dir.clone(), fetcher);
    LocalProcessBackend::new(
        target(Platform::LocalMacos, "1.3.1-6", 59840),
        config,
        cache,
        common::fast_poller(3),
    )
    .unwrap()
}

#[tokio::test]
async fn test_download_extracts_executable_binary() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new(zip_with("LiteServ", FAKE_LITESERV));
    let mut backend = macos_backend(&tmp, fetcher.clone());

    backend.download().await.unwrap();
    backend.download().await.unwrap();

    let binary = backend.binary_path();
    assert!(binary.exists());
    let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
    assert_eq!(
        fetcher.urls(),
        vec![concat!(
            "http://builds/couchbase-lite-ios/1.3.1/macosx/1.3.1-6/",
            "couchbase-lite-macosx-enterprise_1.3.1-6.zip"
        )]
    );
}

#[tokio::test]
async fn test_start_writes_log_and_stop_terminates() {
    let tmp = TempDir::new().unwrap();
    let fetcher = FakeFetcher::new(zip_with("LiteServ", FAKE_LITESERV));
    let mut backend = macos_backend(&tmp, fetcher);
    let log = tmp.path().join("results").join("logs").join("macos.txt");

    backend.download().await.unwrap();
    backend.install().await.unwrap();
    backend.start(&log).await.unwrap();
    assert!(backend.is_started());

    // Give the script time to echo its arguments
    tokio::time::sleep(Duration::from_millis(300)).await;

    backend.stop().await.unwrap();
    backend.stop().await.unwrap();
    assert!(!backend.is_started());

    let written = std::fs::read_to_string(&log).unwrap();
    assert!(written.contains("-Log YES"));
    assert!(written.contains("--port 59840"));
    assert!(written.contains("--storage SQLite"));
}
