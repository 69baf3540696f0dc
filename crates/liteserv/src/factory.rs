//! Test server factory
//!
//! Validates a caller's [`ServerSpec`] and builds the backend for its
//! platform. Validation runs before anything is downloaded or spawned.

use crate::backend::{LocalProcessBackend, MobileAppBackend, PlatformBackend, RemoteServiceBackend};
use crate::bridge::{CommandBridge, DeviceBridge};
use crate::config::HarnessConfig;
use crate::download::{ArtifactCache, ArtifactFetcher, HttpFetcher};
use crate::poller::ReachabilityPoller;
use crate::provision::{AnsibleRunner, PlaybookRunner};
use crate::supervisor::LifecycleSupervisor;
use std::sync::Arc;
use testkit_common::{
    version_and_build, Error, Platform, Result, ServerSpec, ServerTarget, StorageEngine,
};
use tracing::info;

/// External capabilities handed to the backends
#[derive(Clone)]
pub struct Capabilities {
    pub fetcher: Arc<dyn ArtifactFetcher>,
    /// Android bridge (`adb`)
    pub adb: Arc<dyn DeviceBridge>,
    /// iOS simulator bridge (`xcrun simctl`)
    pub simctl: Arc<dyn DeviceBridge>,
    /// Playbook runner for remote hosts. When unset, an ansible runner with
    /// an inventory for the target host is created per backend.
    pub playbooks: Option<Arc<dyn PlaybookRunner>>,
}

impl Capabilities {
    /// Real capabilities: HTTP downloads, local `adb` and `xcrun`
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let mut adb = CommandBridge::new(config.android.adb_path.clone());
        if let Some(serial) = &config.android.serial {
            adb = adb.with_prefix(["-s".to_string(), serial.clone()]);
        }

        let simctl = CommandBridge::new(config.ios.xcrun_path.clone()).with_prefix(["simctl"]);

        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new()?),
            adb: Arc::new(adb),
            simctl: Arc::new(simctl),
            playbooks: None,
        })
    }
}

/// Builds validated backends and supervisors
pub struct TestServerFactory {
    config: Arc<HarnessConfig>,
    capabilities: Capabilities,
}

impl TestServerFactory {
    pub fn new(config: HarnessConfig, capabilities: Capabilities) -> Self {
        Self {
            config: Arc::new(config),
            capabilities,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Check a spec field by field, stopping at the first problem.
    ///
    /// Order: platform, version/build, host, port, storage engine, ssl.
    pub fn validate(spec: &ServerSpec) -> Result<ServerTarget> {
        let platform: Platform = match spec.platform.as_deref() {
            Some(platform) => platform.parse()?,
            None => return Err(Error::config("Unsupported 'platform': None")),
        };

        let version_build = spec
            .version_build
            .as_deref()
            .ok_or_else(|| Error::config("Make sure you provide a version / build!"))?;
        let (version, build) = version_and_build(version_build)?;

        let host = spec
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::config("Make sure you provide a host!"))?;

        let port = spec
            .port
            .ok_or_else(|| Error::config("Make sure you provide a port!"))?;

        let storage_engine: StorageEngine = match spec.storage_engine.as_deref() {
            Some(engine) => engine.parse()?,
            None => return Err(Error::config("Unsupported 'storage_engine': None")),
        };

        let ssl_enabled = spec
            .ssl_enabled
            .ok_or_else(|| Error::config("'ssl_enabled' must be a boolean"))?;

        Ok(ServerTarget {
            platform,
            version,
            build: Some(build),
            host,
            port,
            storage_engine,
            ssl_enabled,
        })
    }

    fn poller(&self) -> Result<ReachabilityPoller> {
        ReachabilityPoller::new(&self.config.poll)
    }

    fn cache(&self) -> ArtifactCache {
        ArtifactCache::new(self.config.binary_dir.clone(), self.capabilities.fetcher.clone())
    }

    /// Validate `spec` and build the backend for its platform
    pub fn create(&self, spec: &ServerSpec) -> Result<Box<dyn PlatformBackend>> {
        let target = Self::validate(spec)?;
        info!(
            "Creating {} backend for {} at {}",
            target.platform,
            target.version_build(),
            target.url()
        );

        let config = self.config.clone();
        let poller = self.poller()?;

        let backend: Box<dyn PlatformBackend> = match target.platform {
            Platform::LocalMacos | Platform::LocalDotnet => Box::new(LocalProcessBackend::new(
                target,
                config,
                self.cache(),
                poller,
            )?),
            Platform::Android => Box::new(MobileAppBackend::new(
                target,
                config,
                self.cache(),
                self.capabilities.adb.clone(),
                poller,
            )?),
            Platform::Ios => Box::new(MobileAppBackend::new(
                target,
                config,
                self.cache(),
                self.capabilities.simctl.clone(),
                poller,
            )?),
            Platform::WindowsRemote => {
                let runner: Arc<dyn PlaybookRunner> = match &self.capabilities.playbooks {
                    Some(runner) => runner.clone(),
                    None => Arc::new(AnsibleRunner::for_windows_host(
                        &target.host,
                        &config.remote,
                    )?),
                };
                Box::new(RemoteServiceBackend::new(target, config, runner, poller)?)
            }
        };

        Ok(backend)
    }

    /// Backend for `spec` wrapped in a fresh supervisor
    pub fn supervisor(&self, spec: &ServerSpec) -> Result<LifecycleSupervisor> {
        let backend = self.create(spec)?;
        Ok(LifecycleSupervisor::new(backend, self.poller()?))
    }
}
