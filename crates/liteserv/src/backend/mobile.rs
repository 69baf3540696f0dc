//! LiteServ app on an Android emulator/device or an iOS simulator
//!
//! Everything that touches the device goes through a [`DeviceBridge`]. While
//! the app runs, a log-streaming process captures the device log into the
//! caller's sink; it is torn down together with the handle.

use super::{open_log, DeviceHandle, PlatformBackend};
use crate::bridge::{CommandOutput, DeviceBridge};
use crate::config::HarnessConfig;
use crate::download::ArtifactCache;
use crate::poller::ReachabilityPoller;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testkit_common::version::ANDROID_LEGACY_VERSION;
use testkit_common::{Error, Platform, Result, ServerTarget, StorageEngine};
use tracing::{debug, error, info, warn};

pub const ANDROID_PACKAGE: &str = "com.couchbase.liteservandroid";
pub const ANDROID_ACTIVITY: &str =
    "com.couchbase.liteservandroid/com.couchbase.liteservandroid.MainActivity";
pub const IOS_BUNDLE_ID: &str = "com.couchbase.LiteServ-iOS";

/// Port the iOS app keeps for its own admin listener
pub const IOS_ADMIN_PORT: u16 = 59850;

/// Storage engines the iOS LiteServ cannot run
pub const IOS_UNSUPPORTED_ENGINES: [StorageEngine; 2] =
    [StorageEngine::ForestDB, StorageEngine::ForestDBEncrypted];

/// Install output markers meaning "a conflicting copy is already installed"
const ANDROID_CONFLICTS: [&str; 2] = [
    "INSTALL_FAILED_ALREADY_EXISTS",
    "INSTALL_FAILED_UPDATE_INCOMPATIBLE",
];
const IOS_CONFLICTS: [&str; 1] = ["already exists"];

/// Which mobile OS the backend drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobileTarget {
    Android,
    Ios,
}

impl MobileTarget {
    fn conflict_markers(&self) -> &'static [&'static str] {
        match self {
            MobileTarget::Android => &ANDROID_CONFLICTS,
            MobileTarget::Ios => &IOS_CONFLICTS,
        }
    }
}

fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// LiteServ installed and launched on a mobile device
pub struct MobileAppBackend {
    target: ServerTarget,
    kind: MobileTarget,
    config: Arc<HarnessConfig>,
    cache: ArtifactCache,
    bridge: Arc<dyn DeviceBridge>,
    poller: ReachabilityPoller,
    handle: Option<DeviceHandle>,
}

impl MobileAppBackend {
    pub fn new(
        target: ServerTarget,
        config: Arc<HarnessConfig>,
        cache: ArtifactCache,
        bridge: Arc<dyn DeviceBridge>,
        poller: ReachabilityPoller,
    ) -> Result<Self> {
        let kind = match target.platform {
            Platform::Android => MobileTarget::Android,
            Platform::Ios => MobileTarget::Ios,
            other => {
                return Err(Error::config(format!("{} is not a mobile platform", other)))
            }
        };

        if kind == MobileTarget::Ios {
            if IOS_UNSUPPORTED_ENGINES.contains(&target.storage_engine) {
                return Err(Error::config(format!(
                    "Unsupported 'storage_engine' on ios: {}",
                    target.storage_engine
                )));
            }
            if target.port == IOS_ADMIN_PORT {
                return Err(Error::config(format!(
                    "On iOS, port {} is reserved for the admin port",
                    IOS_ADMIN_PORT
                )));
            }
        }

        Ok(Self {
            target,
            kind,
            config,
            cache,
            bridge,
            poller,
            handle: None,
        })
    }

    pub fn kind(&self) -> MobileTarget {
        self.kind
    }

    fn build(&self) -> Result<&str> {
        self.target.build.as_deref().ok_or_else(|| {
            Error::config(format!(
                "A build number is required to download {} LiteServ",
                self.target.platform
            ))
        })
    }

    fn is_android_legacy(&self) -> bool {
        self.target.version == ANDROID_LEGACY_VERSION
    }

    /// File name of the downloaded package
    pub fn package_name(&self) -> String {
        let vb = self.target.version_build();
        match self.kind {
            MobileTarget::Android => {
                if self.is_android_legacy() || self.target.storage_engine == StorageEngine::SQLite {
                    format!("couchbase-lite-android-liteserv-SQLite-{}-debug.apk", vb)
                } else {
                    format!(
                        "couchbase-lite-android-liteserv-SQLCipher-ForestDB-Encryption-{}-debug.apk",
                        vb
                    )
                }
            }
            MobileTarget::Ios => format!("LiteServ-iOS-{}.zip", vb),
        }
    }

    /// Installable artifact inside the cache (.apk or .app bundle)
    pub fn artifact_path(&self) -> PathBuf {
        match self.kind {
            MobileTarget::Android => self.cache.path(self.package_name()),
            MobileTarget::Ios => self
                .cache
                .path(format!("LiteServ-iOS-{}", self.target.version_build()))
                .join("LiteServ-iOS.app"),
        }
    }

    /// Build server URL of the package
    pub fn download_url(&self) -> Result<String> {
        let base = &self.config.latest_builds_url;
        let version = &self.target.version;
        let package = self.package_name();

        match self.kind {
            MobileTarget::Android => {
                let vb = self.target.version_build();
                if self.is_android_legacy() {
                    Ok(format!(
                        "{}/couchbase-lite-android/release/{}/{}/{}",
                        base, version, vb, package
                    ))
                } else {
                    Ok(format!(
                        "{}/couchbase-lite-android/{}/{}/{}",
                        base, version, vb, package
                    ))
                }
            }
            MobileTarget::Ios => Ok(format!(
                "{}/couchbase-lite-ios/{}/{}/{}",
                base,
                version,
                self.build()?,
                package
            )),
        }
    }

    fn device(&self) -> String {
        match self.kind {
            MobileTarget::Android => self
                .config
                .android
                .serial
                .clone()
                .unwrap_or_else(|| "default".to_string()),
            MobileTarget::Ios => self.config.ios.device.clone(),
        }
    }

    fn install_args(&self) -> Vec<String> {
        let artifact = self.artifact_path().to_string_lossy().to_string();
        match self.kind {
            MobileTarget::Android => args(["install".to_string(), artifact]),
            MobileTarget::Ios => args(["install".to_string(), self.device(), artifact]),
        }
    }

    fn uninstall_args(&self) -> Vec<String> {
        match self.kind {
            MobileTarget::Android => args(["uninstall", ANDROID_PACKAGE]),
            MobileTarget::Ios => args([
                "uninstall".to_string(),
                self.device(),
                IOS_BUNDLE_ID.to_string(),
            ]),
        }
    }

    fn log_stream_args(&self) -> Vec<String> {
        match self.kind {
            MobileTarget::Android => args(["logcat"]),
            MobileTarget::Ios => args([
                "spawn".to_string(),
                self.device(),
                "log".to_string(),
                "stream".to_string(),
                "--predicate".to_string(),
                format!("subsystem == \"{}\"", IOS_BUNDLE_ID),
            ]),
        }
    }

    /// Command that launches the app bound to the target port
    pub fn launch_args(&self) -> Vec<String> {
        let engine = self.target.storage_engine;
        let encryption = &self.config.encryption;

        match self.kind {
            MobileTarget::Android => {
                let mut launch = args([
                    "shell", "am", "start", "-n", ANDROID_ACTIVITY,
                    "--es", "username", "none",
                    "--es", "password", "none",
                    "--ei", "listen_port",
                ]);
                launch.push(self.target.port.to_string());
                launch.extend(args(["--es", "storage", engine.base_engine()]));

                if engine.is_encrypted() {
                    let db_flags: Vec<String> = encryption
                        .registered_dbs
                        .iter()
                        .map(|db| format!("{}:{}", db, encryption.password))
                        .collect();
                    launch.extend(args([
                        "--es".to_string(),
                        "dbpassword".to_string(),
                        db_flags.join(","),
                    ]));
                }
                launch
            }
            MobileTarget::Ios => {
                let mut launch = args([
                    "launch".to_string(),
                    self.device(),
                    IOS_BUNDLE_ID.to_string(),
                    "--port".to_string(),
                    self.target.port.to_string(),
                ]);
                launch.extend(super::storage_args(engine, encryption));
                launch
            }
        }
    }

    fn stop_commands(&self) -> Vec<Vec<String>> {
        match self.kind {
            MobileTarget::Android => vec![
                args(["shell", "am", "force-stop", ANDROID_PACKAGE]),
                args(["shell", "pm", "clear", ANDROID_PACKAGE]),
            ],
            MobileTarget::Ios => vec![args([
                "terminate".to_string(),
                self.device(),
                IOS_BUNDLE_ID.to_string(),
            ])],
        }
    }

    fn is_conflict(&self, output: &CommandOutput) -> bool {
        self.kind
            .conflict_markers()
            .iter()
            .any(|marker| output.contains(marker))
    }

    fn install_failed(output: &CommandOutput) -> bool {
        // Older adb builds exit 0 and only print "Failure [...]"
        !output.success() || output.contains("Failure")
    }

    /// Remove the app from the device
    pub async fn remove(&self) -> Result<()> {
        info!("Removing LiteServ from {}", self.device());
        let output = self.bridge.run(&self.uninstall_args()).await?;
        if !output.success() || output.contains("Failure") {
            return Err(Error::Install(format!(
                "Could not remove app: {}",
                output.output.trim()
            )));
        }

        if self.kind == MobileTarget::Android && self.android_package_listed().await? {
            return Err(Error::Install(format!(
                "{} is still installed after uninstall",
                ANDROID_PACKAGE
            )));
        }
        Ok(())
    }

    async fn android_package_listed(&self) -> Result<bool> {
        let output = self
            .bridge
            .run(&args(["shell", "pm", "list", "packages"]))
            .await?;
        Ok(output.contains(ANDROID_PACKAGE))
    }

    async fn verify_installed(&self) -> Result<()> {
        match self.kind {
            MobileTarget::Android => {
                if !self.android_package_listed().await? {
                    return Err(Error::Install("Failed to install package".to_string()));
                }
            }
            MobileTarget::Ios => {
                let output = self
                    .bridge
                    .run(&args([
                        "get_app_container".to_string(),
                        self.device(),
                        IOS_BUNDLE_ID.to_string(),
                    ]))
                    .await?;
                if !output.success() {
                    return Err(Error::Install(format!("Could not install {}", IOS_BUNDLE_ID)));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformBackend for MobileAppBackend {
    fn target(&self) -> &ServerTarget {
        &self.target
    }

    fn poller(&self) -> &ReachabilityPoller {
        &self.poller
    }

    async fn download(&mut self) -> Result<()> {
        let artifact = self.artifact_path();
        if artifact.exists() {
            info!("Package is already downloaded. Skipping.");
            return Ok(());
        }

        let url = self.download_url()?;
        let package = self.package_name();
        match self.kind {
            MobileTarget::Android => {
                self.cache.fetch_file(&url, &package).await?;
            }
            MobileTarget::Ios => {
                let dir = format!("LiteServ-iOS-{}", self.target.version_build());
                self.cache.fetch_archive(&url, &package, &dir, &artifact).await?;
            }
        }
        Ok(())
    }

    async fn install(&mut self) -> Result<()> {
        let install = self.install_args();
        info!("Installing: {}", self.artifact_path().display());

        let mut removed_existing = false;
        loop {
            let output = self.bridge.run(&install).await?;
            debug!("install output: {}", output.output.trim());

            if !Self::install_failed(&output) {
                break;
            }

            if self.is_conflict(&output) && !removed_existing {
                warn!("LiteServ already installed. Removing and trying again ...");
                self.remove().await?;
                removed_existing = true;
                continue;
            }

            return Err(Error::Install(format!(
                "install failed on {}: {}",
                self.device(),
                output.output.trim()
            )));
        }

        self.verify_installed().await?;
        info!("LiteServ installed to {}", self.device());
        Ok(())
    }

    async fn start(&mut self, log_path: &Path) -> Result<()> {
        if self.handle.is_some() {
            warn!("LiteServ already started on {}", self.device());
            return Ok(());
        }

        if self.kind == MobileTarget::Android {
            // Clear the logcat buffer so the capture only holds this run
            let cleared = self.bridge.run(&args(["logcat", "-c"])).await?;
            if !cleared.success() {
                return Err(Error::DeviceCommand(format!(
                    "logcat -c exited with {}: {}",
                    cleared.exit_code,
                    cleared.output.trim()
                )));
            }
        }

        let sink = open_log(log_path)?;
        let mut log_capture = self.bridge.stream_logs(&self.log_stream_args(), sink).await?;

        let launch = self.launch_args();
        info!("Launching LiteServ on {} with: {}", self.device(), launch.join(" "));

        let launched = match self.bridge.run(&launch).await {
            Ok(output) if output.success() && !output.contains("Error") => Ok(()),
            Ok(output) => Err(Error::DeviceCommand(format!(
                "launch failed: {}",
                output.output.trim()
            ))),
            Err(e) => Err(e),
        };

        if let Err(e) = launched {
            // The log stream belongs to a handle that never came to be
            if let Err(close_err) = log_capture.close().await {
                warn!("Failed to close log stream: {}", close_err);
            }
            return Err(e);
        }

        self.handle = Some(DeviceHandle {
            device: self.device(),
            log_capture,
            started_at: chrono::Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            debug!("No LiteServ app to stop on {}", self.device());
            return Ok(());
        };

        info!("Stopping LiteServ: {} on {}", self.target.url(), handle.device);

        let mut first_error = None;
        for command in self.stop_commands() {
            match self.bridge.run(&command).await {
                Ok(output) if !output.success() => {
                    warn!(
                        "{} exited with {}: {}",
                        command.join(" "),
                        output.exit_code,
                        output.output.trim()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!("{} failed: {}", command.join(" "), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = handle.log_capture.close().await {
            warn!("Failed to close log stream: {}", e);
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_started(&self) -> bool {
        self.handle.is_some()
    }
}
