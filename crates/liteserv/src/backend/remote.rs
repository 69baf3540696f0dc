//! .NET LiteServ on a remote Windows host
//!
//! Every step is a provisioning playbook run on the host. Packages before 1.4
//! put the binary under `net45/`, so install, start and stop each try the
//! known binary locations in order.

use super::{absolute, storage_args, PlatformBackend, RemoteSession};
use crate::config::HarnessConfig;
use crate::poller::ReachabilityPoller;
use crate::provision::{ExtraVars, PlaybookRunner};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use testkit_common::{Error, Platform, Result, ServerTarget};
use tracing::{debug, error, info, warn};

pub const DOWNLOAD_PLAYBOOK: &str = "download-liteserv-msft.yml";
pub const INSTALL_PLAYBOOK: &str = "install-liteserv-windows.yml";
pub const START_PLAYBOOK: &str = "start-liteserv-msft.yml";
pub const STOP_PLAYBOOK: &str = "stop-liteserv-windows.yml";
pub const REMOVE_PLAYBOOK: &str = "remove-liteserv-msft.yml";

/// LiteServ running as a service on a Windows host
pub struct RemoteServiceBackend {
    target: ServerTarget,
    config: Arc<HarnessConfig>,
    runner: Arc<dyn PlaybookRunner>,
    poller: ReachabilityPoller,
    downloaded: bool,
    session: Option<RemoteSession>,
}

impl RemoteServiceBackend {
    pub fn new(
        target: ServerTarget,
        config: Arc<HarnessConfig>,
        runner: Arc<dyn PlaybookRunner>,
        poller: ReachabilityPoller,
    ) -> Result<Self> {
        if target.platform != Platform::WindowsRemote {
            return Err(Error::config(format!(
                "{} is not a remote Windows platform",
                target.platform
            )));
        }

        Ok(Self {
            target,
            config,
            runner,
            poller,
            downloaded: false,
            session: None,
        })
    }

    /// Package directory on the Windows host
    pub fn package_name(&self) -> String {
        format!("couchbase-lite-net-msft-{}-liteserv", self.target.version_build())
    }

    /// Binary locations to try, newest package layout first
    pub fn binary_candidates(&self) -> [String; 2] {
        let package = self.package_name();
        [
            format!("{}/LiteServ.exe", package),
            format!("{}/net45/LiteServ.exe", package),
        ]
    }

    pub fn download_url(&self) -> Result<String> {
        let build = self.target.build.as_deref().ok_or_else(|| {
            Error::config("A build number is required to download windows_remote LiteServ")
        })?;
        Ok(format!(
            "{}/couchbase-lite-net/{}/{}/LiteServ.zip",
            self.config.latest_builds_url, self.target.version, build
        ))
    }

    /// Arguments handed to the start playbook as one string
    pub fn launch_args(&self) -> String {
        let mut args = vec![
            "--port".to_string(),
            self.target.port.to_string(),
            "--dir".to_string(),
            ".".to_string(),
        ];
        args.extend(storage_args(self.target.storage_engine, &self.config.encryption));
        args.join(" ")
    }

    pub fn session(&self) -> Option<&RemoteSession> {
        self.session.as_ref()
    }

    async fn run(&self, playbook: &str, extra_vars: &ExtraVars) -> Result<()> {
        let exit_code = self.runner.run_playbook(playbook, extra_vars).await?;
        if exit_code != 0 {
            return Err(Error::Playbook {
                playbook: playbook.to_string(),
                exit_code,
            });
        }
        Ok(())
    }

    /// Run `playbook` once per binary candidate until one succeeds.
    ///
    /// Returns the candidate that worked, or the last failure.
    async fn run_with_fallback<F>(&self, playbook: &str, vars_for: F) -> Result<String>
    where
        F: Fn(&str) -> ExtraVars + Send + Sync,
    {
        let mut last_error = None;
        for candidate in self.binary_candidates() {
            match self.run(playbook, &vars_for(&candidate)).await {
                Ok(()) => return Ok(candidate),
                Err(e) => {
                    info!("{} failed for {}, trying next layout: {}", playbook, candidate, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Playbook {
            playbook: playbook.to_string(),
            exit_code: -1,
        }))
    }

    /// Remove LiteServ and its service wrapper from the host
    pub async fn remove(&mut self) -> Result<()> {
        info!("Removing windows server from: {}", self.target.host);
        self.run(REMOVE_PLAYBOOK, &ExtraVars::new()).await?;
        self.downloaded = false;
        Ok(())
    }
}

#[async_trait]
impl PlatformBackend for RemoteServiceBackend {
    fn target(&self) -> &ServerTarget {
        &self.target
    }

    fn poller(&self) -> &ReachabilityPoller {
        &self.poller
    }

    async fn download(&mut self) -> Result<()> {
        if self.downloaded {
            debug!("{} already downloaded on {}", self.package_name(), self.target.host);
            return Ok(());
        }

        let mut vars = ExtraVars::new();
        vars.insert("download_url".to_string(), self.download_url()?);
        vars.insert("package_name".to_string(), self.package_name());

        if let Err(e) = self.run(DOWNLOAD_PLAYBOOK, &vars).await {
            error!("Failed to download LiteServ package on {}: {}", self.target.host, e);
            return Err(e);
        }

        self.downloaded = true;
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        let installed = self
            .run_with_fallback(INSTALL_PLAYBOOK, |candidate| {
                let mut vars = ExtraVars::new();
                vars.insert("directory_path".to_string(), candidate.to_string());
                vars
            })
            .await
            .map_err(|e| {
                Error::Install(format!("Failed to install LiteServ on Windows host: {}", e))
            })?;

        info!("Installed {} on {}", installed, self.target.host);
        Ok(())
    }

    async fn start(&mut self, log_path: &Path) -> Result<()> {
        if self.session.is_some() {
            warn!("LiteServ already started on {}", self.target.host);
            return Ok(());
        }

        let launch_args = self.launch_args();
        let binary_path = self
            .run_with_fallback(START_PLAYBOOK, |candidate| {
                info!("Starting LiteServ {} with: {}", candidate, launch_args);
                let mut vars = ExtraVars::new();
                vars.insert("binary_path".to_string(), candidate.to_string());
                vars.insert("launch_args".to_string(), launch_args.clone());
                vars
            })
            .await?;

        self.session = Some(RemoteSession::new(binary_path, absolute(log_path)?));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            debug!("No remote LiteServ session on {}", self.target.host);
            return Ok(());
        };

        let log_full_path = session.log_path.to_string_lossy().to_string();
        info!("Stopping LiteServ session {} on {}", session.id, self.target.host);
        info!("Pulling logs to {} ...", log_full_path);

        // The binary that started is the one to stop; the other layout is the fallback
        let mut candidates = vec![session.binary_path.clone()];
        candidates.extend(
            self.binary_candidates()
                .into_iter()
                .filter(|c| *c != session.binary_path),
        );

        let mut last_error = None;
        for binary_path in candidates {
            let mut vars = ExtraVars::new();
            vars.insert("binary_path".to_string(), binary_path.clone());
            vars.insert("log_full_path".to_string(), log_full_path.clone());

            match self.run(STOP_PLAYBOOK, &vars).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    info!("Could not stop {}, retrying: {}", binary_path, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Playbook {
            playbook: STOP_PLAYBOOK.to_string(),
            exit_code: -1,
        }))
    }

    fn is_started(&self) -> bool {
        self.session.is_some()
    }
}
