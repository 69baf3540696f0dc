//! Handles owned by a started backend
//!
//! Each backend holds at most one handle. Dropping a process handle kills the
//! child, so an abandoned backend never leaves an orphan behind.

use crate::bridge::LogCapture;
use std::fs::File;
use std::path::PathBuf;
use tokio::process::Child;
use uuid::Uuid;

/// Local LiteServ process and the log file capturing its output
#[derive(Debug)]
pub struct ProcessHandle {
    pub child: Child,
    pub log: File,
    pub pid: Option<u32>,
    pub started_at: i64,
}

/// App launched on a device or simulator, plus its log stream
#[derive(Debug)]
pub struct DeviceHandle {
    pub device: String,
    pub log_capture: LogCapture,
    pub started_at: i64,
}

/// Logical session for a LiteServ started on a remote host
#[derive(Debug, Clone)]
pub struct RemoteSession {
    pub id: Uuid,
    /// Binary the start playbook succeeded with
    pub binary_path: String,
    /// Local path the remote log is pulled to on stop
    pub log_path: PathBuf,
    pub started_at: i64,
}

impl RemoteSession {
    pub fn new(binary_path: String, log_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            binary_path,
            log_path,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
