//! Shared fixtures for the liteserv integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{routing::get, Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use testkit_common::{Error, Platform, Result, ServerStatus, ServerTarget, StorageEngine};
use testkit_liteserv::backend::PlatformBackend;
use testkit_liteserv::bridge::{CommandOutput, DeviceBridge, LogCapture};
use testkit_liteserv::download::ArtifactFetcher;
use testkit_liteserv::provision::{ExtraVars, PlaybookRunner};
use testkit_liteserv::ReachabilityPoller;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A port nothing is listening on right now
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Serve `payload` on `GET /` at 127.0.0.1:`port`
pub async fn spawn_status_server(port: u16, payload: Value) -> JoinHandle<()> {
    let app = Router::new().route(
        "/",
        get(move || {
            let payload = payload.clone();
            async move { Json(payload) }
        }),
    );

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    })
}

/// Serve a body that is not JSON
pub async fn spawn_garbage_server(port: u16) -> JoinHandle<()> {
    let app = Router::new().route("/", get(|| async { "<html>not liteserv</html>" }));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    })
}

pub fn macos_payload(version: &str, build: &str) -> Value {
    json!({
        "couchdb": "Welcome",
        "vendor": {
            "name": "Couchbase Lite (Objective-C)",
            "version": format!("{} (build {})", version, build),
        }
    })
}

pub fn fast_poller(max_retries: u32) -> ReachabilityPoller {
    ReachabilityPoller::with_retries(max_retries, Duration::from_millis(50)).unwrap()
}

pub fn target(platform: Platform, version_build: &str, port: u16) -> ServerTarget {
    let (version, build) = testkit_common::version_and_build(version_build).unwrap();
    ServerTarget {
        platform,
        version,
        build: Some(build),
        host: "127.0.0.1".to_string(),
        port,
        storage_engine: StorageEngine::SQLite,
        ssl_enabled: false,
    }
}

type Responder = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// Device bridge answering from a closure and recording every call
pub struct FakeBridge {
    responder: Responder,
    calls: Mutex<Vec<Vec<String>>>,
    log_streams: Mutex<usize>,
}

impl FakeBridge {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            log_streams: Mutex::new(0),
        })
    }

    /// Bridge where every command succeeds with `output`
    pub fn succeeding(output: &str) -> Arc<Self> {
        let output = output.to_string();
        Self::new(move |_| CommandOutput::new(output.clone(), 0))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| {
                call.len() >= prefix.len() && call.iter().zip(prefix).all(|(a, b)| a == b)
            })
            .count()
    }

    pub fn log_streams(&self) -> usize {
        *self.log_streams.lock()
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        self.calls.lock().push(args.to_vec());
        Ok((self.responder)(args))
    }

    async fn stream_logs(&self, args: &[String], sink: File) -> Result<LogCapture> {
        self.calls.lock().push(args.to_vec());
        *self.log_streams.lock() += 1;
        Ok(LogCapture::detached(sink))
    }
}

type PlaybookResponder = Box<dyn Fn(&str, &ExtraVars) -> i32 + Send + Sync>;

/// Playbook runner answering from a closure and recording every call
pub struct FakeRunner {
    responder: PlaybookResponder,
    calls: Mutex<Vec<(String, ExtraVars)>>,
}

impl FakeRunner {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&str, &ExtraVars) -> i32 + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, ExtraVars)> {
        self.calls.lock().clone()
    }

    pub fn playbooks(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait]
impl PlaybookRunner for FakeRunner {
    async fn run_playbook(&self, name: &str, extra_vars: &ExtraVars) -> Result<i32> {
        self.calls.lock().push((name.to_string(), extra_vars.clone()));
        Ok((self.responder)(name, extra_vars))
    }
}

/// Fetcher serving fixed bytes for every URL
pub struct FakeFetcher {
    body: Bytes,
    urls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new(body: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            body: body.into(),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.urls.lock().push(url.to_string());
        Ok(self.body.clone())
    }
}

/// Counters a [`FakeBackend`] shares with the test after being boxed
#[derive(Debug, Default)]
pub struct BackendCalls {
    pub downloads: usize,
    pub installs: usize,
    pub starts: usize,
    pub stops: usize,
    pub fetch_statuses: usize,
    /// Make the next `download` fail
    pub fail_download: bool,
}

/// Backend whose "server" is an axum fixture on the target port
pub struct FakeBackend {
    target: ServerTarget,
    poller: ReachabilityPoller,
    payload: Value,
    calls: Arc<Mutex<BackendCalls>>,
    server: Option<JoinHandle<()>>,
    /// Keep serving after stop, to simulate a server that ignores shutdown
    pub ignore_stop: bool,
    /// Payload `fetch_status` reports instead of querying the fixture
    pub reported: Option<Value>,
}

impl FakeBackend {
    pub fn new(target: ServerTarget, payload: Value) -> (Self, Arc<Mutex<BackendCalls>>) {
        let calls = Arc::new(Mutex::new(BackendCalls::default()));
        let backend = Self {
            target,
            poller: fast_poller(3),
            payload,
            calls: calls.clone(),
            server: None,
            ignore_stop: false,
            reported: None,
        };
        (backend, calls)
    }
}

#[async_trait]
impl PlatformBackend for FakeBackend {
    fn target(&self) -> &ServerTarget {
        &self.target
    }

    fn poller(&self) -> &ReachabilityPoller {
        &self.poller
    }

    async fn download(&mut self) -> Result<()> {
        let mut calls = self.calls.lock();
        calls.downloads += 1;
        if std::mem::take(&mut calls.fail_download) {
            return Err(Error::Download {
                url: "http://builds/fake.zip".to_string(),
                status: 404,
            });
        }
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        self.calls.lock().installs += 1;
        Ok(())
    }

    async fn start(&mut self, log_path: &Path) -> Result<()> {
        self.calls.lock().starts += 1;
        std::fs::write(log_path, "fake liteserv\n")?;
        self.server = Some(spawn_status_server(self.target.port, self.payload.clone()).await);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.calls.lock().stops += 1;
        if let Some(server) = self.server.take() {
            if self.ignore_stop {
                // Dropping the handle detaches the task, so the fixture keeps answering
                drop(server);
            } else {
                server.abort();
                let _ = server.await;
            }
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.server.is_some()
    }

    async fn fetch_status(&self) -> Result<ServerStatus> {
        self.calls.lock().fetch_statuses += 1;
        match &self.reported {
            Some(payload) => Ok(ServerStatus::from_payload(payload.clone())),
            None => self.poller.fetch_status(&self.target.url()).await,
        }
    }
}
