//! Local desktop LiteServ
//!
//! Handles the Objective-C macOS binary and the .NET LiteServ.exe run under
//! mono. Both are standalone executables, so install is a no-op and the
//! handle is the spawned child process.

use super::{open_log, storage_args, PlatformBackend, ProcessHandle};
use crate::config::HarnessConfig;
use crate::download::{make_executable, ArtifactCache};
use crate::poller::ReachabilityPoller;
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use testkit_common::{Error, Platform, Result, ServerTarget};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long a process gets to exit after SIGTERM before it is killed
const STOP_GRACE: Duration = Duration::from_secs(5);

/// LiteServ running as a local child process
pub struct LocalProcessBackend {
    target: ServerTarget,
    config: Arc<HarnessConfig>,
    cache: ArtifactCache,
    poller: ReachabilityPoller,
    handle: Option<ProcessHandle>,
}

impl LocalProcessBackend {
    pub fn new(
        target: ServerTarget,
        config: Arc<HarnessConfig>,
        cache: ArtifactCache,
        poller: ReachabilityPoller,
    ) -> Result<Self> {
        if !matches!(target.platform, Platform::LocalMacos | Platform::LocalDotnet) {
            return Err(Error::config(format!(
                "{} is not a local desktop platform",
                target.platform
            )));
        }

        Ok(Self {
            target,
            config,
            cache,
            poller,
            handle: None,
        })
    }

    fn build(&self) -> Result<&str> {
        self.target.build.as_deref().ok_or_else(|| {
            Error::config(format!(
                "A build number is required to download {} LiteServ",
                self.target.platform
            ))
        })
    }

    /// Directory the package is extracted into
    pub fn package_dir(&self) -> String {
        let vb = self.target.version_build();
        match self.target.platform {
            Platform::LocalDotnet => format!("couchbase-lite-net-mono-{}-liteserv", vb),
            _ => format!("couchbase-lite-macosx-enterprise_{}", vb),
        }
    }

    /// Path of the LiteServ executable inside the cache
    pub fn binary_path(&self) -> PathBuf {
        let binary = match self.target.platform {
            Platform::LocalDotnet => "LiteServ.exe",
            _ => "LiteServ",
        };
        self.cache.path(self.package_dir()).join(binary)
    }

    /// Build server URL of the package archive
    pub fn download_url(&self) -> Result<String> {
        let base = &self.config.latest_builds_url;
        let version = &self.target.version;

        match self.target.platform {
            Platform::LocalDotnet => Ok(format!(
                "{}/couchbase-lite-net/{}/{}/LiteServ.zip",
                base,
                version,
                self.build()?
            )),
            _ => {
                let vb = self.target.version_build();
                let package = format!("{}.zip", self.package_dir());
                // 1.2.0 was published under release/
                if version == "1.2.0" {
                    Ok(format!(
                        "{}/couchbase-lite-ios/release/{}/macosx/{}/{}",
                        base, version, vb, package
                    ))
                } else {
                    Ok(format!(
                        "{}/couchbase-lite-ios/{}/macosx/{}/{}",
                        base, version, vb, package
                    ))
                }
            }
        }
    }

    /// Program and arguments used to launch the listener
    pub fn build_command(&self) -> (String, Vec<String>) {
        let binary = self.binary_path().to_string_lossy().to_string();
        let port = self.target.port.to_string();

        let (program, mut args) = match self.target.platform {
            Platform::LocalDotnet => {
                let db_dir = self.config.db_dir("net-mono");
                (
                    self.config.dotnet.mono_path.clone(),
                    vec![
                        binary,
                        "--port".to_string(),
                        port,
                        "--dir".to_string(),
                        format!("{}/", db_dir.display()),
                    ],
                )
            }
            _ => {
                let db_dir = self.config.db_dir("macosx");
                let mut args = Vec::new();
                let log_flags = [
                    "-Log",
                    "-LogSync",
                    "-LogSyncVerbose",
                    "-LogRouter",
                    "-LogRemoteRequest",
                ];
                for flag in log_flags {
                    args.push(flag.to_string());
                    args.push("YES".to_string());
                }
                args.extend([
                    "--port".to_string(),
                    port,
                    "--dir".to_string(),
                    format!("{}/", db_dir.display()),
                ]);
                (binary, args)
            }
        };

        args.extend(storage_args(self.target.storage_engine, &self.config.encryption));
        (program, args)
    }

    /// SIGTERM first, then SIGKILL once the grace period runs out
    async fn terminate(handle: &mut ProcessHandle) {
        if let Some(pid) = handle.child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }

        match tokio::time::timeout(STOP_GRACE, handle.child.wait()).await {
            Ok(Ok(status)) => debug!("LiteServ exited with {}", status),
            Ok(Err(e)) => warn!("Failed to wait for LiteServ: {}", e),
            Err(_) => {
                info!("Force killing LiteServ (pid: {:?})", handle.pid);
                if let Err(e) = handle.child.start_kill() {
                    debug!("Kill failed, process already gone: {}", e);
                }
                let _ = handle.child.wait().await;
            }
        }
    }
}

#[async_trait]
impl PlatformBackend for LocalProcessBackend {
    fn target(&self) -> &ServerTarget {
        &self.target
    }

    fn poller(&self) -> &ReachabilityPoller {
        &self.poller
    }

    async fn download(&mut self) -> Result<()> {
        let binary = self.binary_path();
        let package_dir = self.package_dir();
        let archive = format!("{}.zip", package_dir);

        if binary.exists() {
            info!("Package already downloaded: {}", binary.display());
            return Ok(());
        }

        let url = self.download_url()?;
        self.cache
            .fetch_archive(&url, &archive, &package_dir, &binary)
            .await?;
        make_executable(&binary).await?;
        info!("LiteServ: {}", binary.display());
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        info!("No install needed for {}", self.target.platform);
        Ok(())
    }

    async fn start(&mut self, log_path: &Path) -> Result<()> {
        if self.handle.is_some() {
            warn!("LiteServ already started for {}", self.target.url());
            return Ok(());
        }

        let (program, args) = self.build_command();
        info!("Launching {} with args: {}", program, args.join(" "));

        let log = open_log(log_path)?;
        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to spawn {}: {}", program, e),
                ))
            })?;

        let pid = child.id();
        info!("LiteServ started with PID {:?}", pid);

        self.handle = Some(ProcessHandle {
            child,
            log,
            pid,
            started_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            debug!("No LiteServ process to stop for {}", self.target.url());
            return Ok(());
        };

        info!("Killing LiteServ: {} (pid: {:?})", self.target.url(), handle.pid);
        Self::terminate(&mut handle).await;

        if let Err(e) = handle.log.sync_all() {
            warn!("Failed to flush LiteServ log: {}", e);
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.handle.is_some()
    }
}
