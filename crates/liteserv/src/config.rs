//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Artifact cache root
    pub binary_dir: PathBuf,

    /// Directory for server logs and database files
    pub results_dir: PathBuf,

    /// Base URL of the build server artifacts are fetched from
    pub latest_builds_url: String,

    /// Reachability polling
    pub poll: PollConfig,

    /// Databases encrypted when an encrypted storage engine is selected
    pub encryption: EncryptionConfig,

    /// Android device bridge
    pub android: AndroidConfig,

    /// iOS simulator bridge
    pub ios: IosConfig,

    /// Local .NET runtime
    pub dotnet: DotnetConfig,

    /// Remote Windows host
    pub remote: RemoteConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            binary_dir: testkit_common::default_binary_dir(),
            results_dir: testkit_common::default_results_dir(),
            latest_builds_url: "http://latestbuilds.service.couchbase.com/builds/latestbuilds"
                .to_string(),
            poll: PollConfig::default(),
            encryption: EncryptionConfig::default(),
            android: AndroidConfig::default(),
            ios: IosConfig::default(),
            dotnet: DotnetConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Reachability polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Attempts before giving up
    pub max_retries: u32,

    /// Fixed delay between attempts
    pub interval_ms: u64,

    /// Per-request timeout
    pub request_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            interval_ms: 1000,
            request_timeout_ms: 5000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Registered client databases and the password they are encrypted with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub registered_dbs: Vec<String>,
    pub password: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            registered_dbs: vec![
                "ls_db".to_string(),
                "ls_db1".to_string(),
                "ls_db2".to_string(),
            ],
            password: "pass".to_string(),
        }
    }
}

/// Android configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Path to adb
    pub adb_path: String,

    /// Device serial, when more than one device is attached
    pub serial: Option<String>,
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            serial: None,
        }
    }
}

/// iOS simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IosConfig {
    /// Path to xcrun
    pub xcrun_path: String,

    /// Simulator UDID, or `booted` for the running one
    pub device: String,
}

impl Default for IosConfig {
    fn default() -> Self {
        Self {
            xcrun_path: "xcrun".to_string(),
            device: "booted".to_string(),
        }
    }
}

/// Local .NET configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DotnetConfig {
    /// Path to mono
    pub mono_path: String,
}

impl Default for DotnetConfig {
    fn default() -> Self {
        Self {
            mono_path: "mono".to_string(),
        }
    }
}

/// Remote Windows host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Windows user on the target host
    pub user: Option<String>,

    /// Password for `user`
    pub password: Option<String>,

    /// WinRM port
    pub winrm_port: u16,

    /// Directory containing the provisioning playbooks
    pub playbook_dir: PathBuf,

    /// Where the generated inventory is written
    pub inventory_path: PathBuf,

    /// Path to ansible-playbook
    pub ansible_playbook_path: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: None,
            password: None,
            winrm_port: 5986,
            playbook_dir: PathBuf::from("libraries/provision/ansible/playbooks"),
            inventory_path: PathBuf::from("resources/liteserv_configs/net-msft"),
            ansible_playbook_path: "ansible-playbook".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Database directory handed to a desktop LiteServ
    pub fn db_dir(&self, platform_dir: &str) -> PathBuf {
        self.results_dir.join("dbs").join(platform_dir)
    }
}
