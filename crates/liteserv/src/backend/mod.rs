//! Platform backends
//!
//! Every deployment target implements the same capability set. The
//! supervisor only ever talks to a `Box<dyn PlatformBackend>` chosen by the
//! factory.

use crate::config::EncryptionConfig;
use crate::poller::ReachabilityPoller;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use testkit_common::{Result, ServerStatus, ServerTarget, StorageEngine};

pub mod handle;
pub mod local;
pub mod mobile;
pub mod remote;

pub use handle::{DeviceHandle, ProcessHandle, RemoteSession};
pub use local::LocalProcessBackend;
pub use mobile::{MobileAppBackend, MobileTarget};
pub use remote::RemoteServiceBackend;

/// Download, install, start, inspect and stop a LiteServ on one target
#[async_trait]
pub trait PlatformBackend: Send + Sync {
    /// The validated target this backend was built for
    fn target(&self) -> &ServerTarget;

    /// Poller used by [`PlatformBackend::fetch_status`]
    fn poller(&self) -> &ReachabilityPoller;

    /// Fetch the package. No-op when the artifact is already cached.
    async fn download(&mut self) -> Result<()>;

    /// Deploy the package to the execution target
    async fn install(&mut self) -> Result<()>;

    /// Launch the server, writing its output to `log_path`.
    ///
    /// Does not wait for the server to become reachable.
    async fn start(&mut self, log_path: &Path) -> Result<()>;

    /// Release the handle acquired by `start`. Safe to call when nothing was
    /// started or when the server already went away.
    async fn stop(&mut self) -> Result<()>;

    /// Whether a handle is currently held
    fn is_started(&self) -> bool;

    /// Single status request to the management endpoint
    async fn fetch_status(&self) -> Result<ServerStatus> {
        self.poller().fetch_status(&self.target().url()).await
    }
}

/// `--storage` and `--dbpassword` flags shared by the desktop and Windows
/// listeners.
pub fn storage_args(engine: StorageEngine, encryption: &EncryptionConfig) -> Vec<String> {
    let mut args = vec!["--storage".to_string(), engine.base_engine().to_string()];

    if engine.is_encrypted() {
        for db_name in &encryption.registered_dbs {
            args.push("--dbpassword".to_string());
            args.push(format!("{}={}", db_name, encryption.password));
        }
    }

    args
}

/// Open (truncating) the log sink supplied at start
pub(crate) fn open_log(log_path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(std::fs::File::create(log_path)?)
}

/// Absolute form of a caller-supplied log path
pub(crate) fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
