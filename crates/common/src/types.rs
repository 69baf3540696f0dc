//! Core types for the LiteServ testkit

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Deployment target of a LiteServ instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Objective-C LiteServ binary on a macOS desktop
    LocalMacos,
    /// .NET LiteServ.exe run under mono on the local machine
    LocalDotnet,
    /// LiteServ app on an Android emulator or device
    Android,
    /// LiteServ app on an iOS simulator
    Ios,
    /// .NET LiteServ on a remote Windows host
    WindowsRemote,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::LocalMacos,
        Platform::LocalDotnet,
        Platform::Android,
        Platform::Ios,
        Platform::WindowsRemote,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LocalMacos => "local_macos",
            Platform::LocalDotnet => "local_dotnet",
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::WindowsRemote => "windows_remote",
        }
    }

    /// Mobile platforms are installed through a device bridge
    pub fn is_mobile(&self) -> bool {
        matches!(self, Platform::Android | Platform::Ios)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local_macos" | "macosx" => Ok(Platform::LocalMacos),
            "local_dotnet" | "net-mono" => Ok(Platform::LocalDotnet),
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "windows_remote" | "net-msft" => Ok(Platform::WindowsRemote),
            other => Err(Error::config(format!("Unsupported 'platform': {}", other))),
        }
    }
}

/// On-disk persistence backend of the database under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageEngine {
    SQLite,
    SQLCipher,
    ForestDB,
    #[serde(rename = "ForestDB+Encryption", alias = "ForestDBEncrypted")]
    ForestDBEncrypted,
}

impl StorageEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageEngine::SQLite => "SQLite",
            StorageEngine::SQLCipher => "SQLCipher",
            StorageEngine::ForestDB => "ForestDB",
            StorageEngine::ForestDBEncrypted => "ForestDB+Encryption",
        }
    }

    /// Engines that require a password for every registered database
    pub fn is_encrypted(&self) -> bool {
        matches!(self, StorageEngine::SQLCipher | StorageEngine::ForestDBEncrypted)
    }

    /// Value passed to `--storage`. Encryption rides on top of the base engine.
    pub fn base_engine(&self) -> &'static str {
        match self {
            StorageEngine::SQLite | StorageEngine::SQLCipher => "SQLite",
            StorageEngine::ForestDB | StorageEngine::ForestDBEncrypted => "ForestDB",
        }
    }
}

impl std::fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageEngine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SQLite" => Ok(StorageEngine::SQLite),
            "SQLCipher" => Ok(StorageEngine::SQLCipher),
            "ForestDB" => Ok(StorageEngine::ForestDB),
            "ForestDB+Encryption" | "ForestDBEncrypted" => Ok(StorageEngine::ForestDBEncrypted),
            other => Err(Error::config(format!(
                "Unsupported 'storage_engine': {}",
                other
            ))),
        }
    }
}

/// Split a `<version>-<build>` string into its two parts.
///
/// Anything other than exactly two non-empty dash-delimited parts is rejected.
pub fn version_and_build(version_build: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = version_build.split('-').collect();
    match parts.as_slice() {
        [version, build] if !version.is_empty() && !build.is_empty() => {
            Ok((version.to_string(), build.to_string()))
        }
        _ => Err(Error::config(format!(
            "Invalid 'version_build': {} (expected <version>-<build>)",
            version_build
        ))),
    }
}

/// Caller-supplied description of the server to run.
///
/// Every field is optional so that a spec read from a config file or the
/// command line can be rejected field by field by the factory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub platform: Option<String>,
    pub version_build: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub storage_engine: Option<String>,
    pub ssl_enabled: Option<bool>,
}

impl ServerSpec {
    pub fn new(platform: &str, version_build: &str, host: &str, port: u16) -> Self {
        Self {
            platform: Some(platform.to_string()),
            version_build: Some(version_build.to_string()),
            host: Some(host.to_string()),
            port: Some(port),
            storage_engine: Some(StorageEngine::SQLite.to_string()),
            ssl_enabled: Some(false),
        }
    }

    pub fn with_storage_engine(mut self, storage_engine: &str) -> Self {
        self.storage_engine = Some(storage_engine.to_string());
        self
    }

    pub fn with_ssl(mut self, enabled: bool) -> Self {
        self.ssl_enabled = Some(enabled);
        self
    }
}

/// A validated, immutable server spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTarget {
    pub platform: Platform,
    pub version: String,
    pub build: Option<String>,
    pub host: String,
    pub port: u16,
    pub storage_engine: StorageEngine,
    pub ssl_enabled: bool,
}

impl ServerTarget {
    /// `<version>-<build>`, or the bare version for released builds
    pub fn version_build(&self) -> String {
        match &self.build {
            Some(build) => format!("{}-{}", self.version, build),
            None => self.version.clone(),
        }
    }

    /// Management endpoint of the server
    pub fn url(&self) -> String {
        let scheme = if self.ssl_enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn endpoint(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

/// Status payload reported by a running server's management endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub vendor_name: Option<String>,
    pub version_string: String,
    pub raw_payload: serde_json::Value,
}

impl ServerStatus {
    /// Extract the vendor fields the platforms report. Desktop and iOS
    /// servers nest them under `vendor`, Android reports a top-level
    /// `version`.
    pub fn from_payload(raw_payload: serde_json::Value) -> Self {
        let vendor = raw_payload.get("vendor");
        let vendor_name = vendor
            .and_then(|v| v.get("name"))
            .and_then(|n| n.as_str())
            .map(str::to_string);
        let version_string = vendor
            .and_then(|v| v.get("version"))
            .or_else(|| raw_payload.get("version"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Self {
            vendor_name,
            version_string,
            raw_payload,
        }
    }
}

/// Lifecycle of a supervised server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Downloaded,
    Installed,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Uninitialized
    }
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// Forward along the happy path, `Stopped -> Downloaded` to restart, and
    /// `Failed` from anywhere except `Failed` itself. A restart that fails
    /// before its first step moves `Stopped -> Failed`.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, next) {
            (Uninitialized, Downloaded)
            | (Downloaded, Installed)
            | (Installed, Starting)
            | (Starting, Running)
            | (Running, Stopping)
            | (Stopping, Stopped)
            | (Stopped, Downloaded) => true,
            (Failed, Failed) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Downloaded => write!(f, "downloaded"),
            LifecycleState::Installed => write!(f, "installed"),
            LifecycleState::Starting => write!(f, "starting"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopping => write!(f, "stopping"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Failed => write!(f, "failed"),
        }
    }
}
