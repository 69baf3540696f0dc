//! Remote provisioning capability
//!
//! The remote Windows backend never talks to its host directly. It asks a
//! playbook runner to execute a named playbook with extra variables and
//! treats a non-zero exit status as failure of that step.

use crate::config::RemoteConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use testkit_common::{Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Extra variables passed to a playbook
pub type ExtraVars = BTreeMap<String, String>;

/// Runs provisioning playbooks against a remote host
#[async_trait]
pub trait PlaybookRunner: Send + Sync {
    /// Run `name` and return its exit status
    async fn run_playbook(&self, name: &str, extra_vars: &ExtraVars) -> Result<i32>;
}

/// Runner shelling out to `ansible-playbook`
#[derive(Debug, Clone)]
pub struct AnsibleRunner {
    ansible_playbook: String,
    inventory: PathBuf,
    playbook_dir: PathBuf,
}

impl AnsibleRunner {
    pub fn new(
        ansible_playbook: impl Into<String>,
        inventory: impl Into<PathBuf>,
        playbook_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ansible_playbook: ansible_playbook.into(),
            inventory: inventory.into(),
            playbook_dir: playbook_dir.into(),
        }
    }

    /// Write a WinRM inventory for `host` and return a runner that uses it.
    ///
    /// The Windows credentials must be present in the config.
    pub fn for_windows_host(host: &str, config: &RemoteConfig) -> Result<Self> {
        let user = config.user.as_deref().ok_or_else(|| {
            Error::config("Missing 'remote.user': the Windows user for the host you are targeting")
        })?;
        let password = config.password.as_deref().ok_or_else(|| {
            Error::config(
                "Missing 'remote.password': the Windows password for the host you are targeting",
            )
        })?;

        let inventory = windows_inventory(host, user, password, config.winrm_port);
        if let Some(parent) = config.inventory_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config.inventory_path, inventory)?;
        info!("Wrote Windows inventory to {}", config.inventory_path.display());

        Ok(Self::new(
            config.ansible_playbook_path.clone(),
            config.inventory_path.clone(),
            config.playbook_dir.clone(),
        ))
    }
}

/// Inventory for a single WinRM-managed Windows host
pub fn windows_inventory(host: &str, user: &str, password: &str, port: u16) -> String {
    [
        "[windows]".to_string(),
        format!("win1 ansible_host={}", host),
        "[windows:vars]".to_string(),
        format!("ansible_user={}", user),
        format!("ansible_password={}", password),
        format!("ansible_port={}", port),
        "ansible_connection=winrm".to_string(),
        "ansible_winrm_server_cert_validation=ignore".to_string(),
    ]
    .join("\n")
}

#[async_trait]
impl PlaybookRunner for AnsibleRunner {
    async fn run_playbook(&self, name: &str, extra_vars: &ExtraVars) -> Result<i32> {
        let playbook = self.playbook_dir.join(name);
        let vars = serde_json::to_string(extra_vars)?;
        debug!("ansible-playbook {} --extra-vars {}", playbook.display(), vars);

        let status = Command::new(&self.ansible_playbook)
            .arg("-i")
            .arg(&self.inventory)
            .arg(&playbook)
            .arg("--extra-vars")
            .arg(&vars)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::DeviceCommand(format!("{}: {}", self.ansible_playbook, e)))?;

        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_inventory_lines() {
        let inventory = windows_inventory("10.0.0.5", "tester", "secret", 5986);
        assert!(inventory.starts_with("[windows]\nwin1 ansible_host=10.0.0.5\n"));
        assert!(inventory.contains("ansible_user=tester"));
        assert!(inventory.contains("ansible_port=5986"));
        assert!(inventory.contains("ansible_connection=winrm"));
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let config = RemoteConfig::default();
        let err = AnsibleRunner::for_windows_host("10.0.0.5", &config).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_inventory_written_to_configured_path() {
        let tmp = TempDir::new().unwrap();
        let config = RemoteConfig {
            user: Some("tester".to_string()),
            password: Some("secret".to_string()),
            inventory_path: tmp.path().join("configs").join("net-msft"),
            ..Default::default()
        };

        AnsibleRunner::for_windows_host("10.0.0.5", &config).unwrap();
        let written = std::fs::read_to_string(&config.inventory_path).unwrap();
        assert!(written.contains("ansible_host=10.0.0.5"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_returned() {
        // `false` ignores its arguments and exits 1
        let runner = AnsibleRunner::new("false", "inventory", "playbooks");
        let code = runner
            .run_playbook("start-liteserv-msft.yml", &ExtraVars::new())
            .await
            .unwrap();
        assert_eq!(code, 1);
    }
}
