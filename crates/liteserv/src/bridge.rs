//! Device bridge capability
//!
//! Mobile backends drive the emulator or simulator through a command-line
//! bridge (`adb`, `xcrun simctl`). The bridge is injected so the backends can
//! be exercised without a device attached.

use async_trait::async_trait;
use std::fs::File;
use std::process::Stdio;
use testkit_common::{Error, Result};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Output of a bridge invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.output.contains(needle)
    }
}

/// Log stream tied to a device handle.
///
/// Owns the streaming subprocess (when there is one) and the sink it writes
/// to. Both are released by [`LogCapture::close`].
#[derive(Debug)]
pub struct LogCapture {
    child: Option<Child>,
    sink: Option<File>,
}

impl LogCapture {
    /// Capture backed by a streaming subprocess writing into `sink`
    pub fn spawned(child: Child, sink: File) -> Self {
        Self {
            child: Some(child),
            sink: Some(sink),
        }
    }

    /// Capture with no subprocess, only the sink
    pub fn detached(sink: File) -> Self {
        Self {
            child: None,
            sink: Some(sink),
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some() || self.child.is_some()
    }

    /// Kill the streaming process and flush the sink. Safe to call twice.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Log stream already exited: {}", e);
            }
            let _ = child.wait().await;
        }

        if let Some(sink) = self.sink.take() {
            sink.sync_all()?;
        }

        Ok(())
    }
}

/// Command-line bridge to an emulator, device or simulator
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Run a bridge command to completion
    async fn run(&self, args: &[String]) -> Result<CommandOutput>;

    /// Start a long-running log stream writing into `sink`
    async fn stream_logs(&self, args: &[String], sink: File) -> Result<LogCapture>;
}

/// Bridge backed by a local executable such as `adb` or `xcrun`
#[derive(Debug, Clone)]
pub struct CommandBridge {
    program: String,
    prefix: Vec<String>,
}

impl CommandBridge {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix: Vec::new(),
        }
    }

    /// Arguments placed before every command, e.g. `-s <serial>` or `simctl`
    pub fn with_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix.extend(prefix.into_iter().map(Into::into));
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix).args(args).stdin(Stdio::null());
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.prefix.iter().cloned());
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

#[async_trait]
impl DeviceBridge for CommandBridge {
    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        debug!("Running: {}", self.describe(args));

        let output = self
            .command(args)
            .output()
            .await
            .map_err(|e| Error::DeviceCommand(format!("{}: {}", self.describe(args), e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!("{} exited with {}", self.describe(args), exit_code);
        }

        Ok(CommandOutput::new(text, exit_code))
    }

    async fn stream_logs(&self, args: &[String], sink: File) -> Result<LogCapture> {
        debug!("Streaming logs: {}", self.describe(args));

        let stdout = sink.try_clone()?;
        let stderr = sink.try_clone()?;
        let child = self
            .command(args)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::DeviceCommand(format!("{}: {}", self.describe(args), e)))?;

        Ok(LogCapture::spawned(child, sink))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let bridge = CommandBridge::new("sh").with_prefix(["-c"]);

        let ok = bridge.run(&args(&["echo Success"])).await.unwrap();
        assert!(ok.success());
        assert!(ok.contains("Success"));

        let failed = bridge
            .run(&args(&["echo 'Failure [INSTALL_FAILED_ALREADY_EXISTS]' >&2; exit 1"]))
            .await
            .unwrap();
        assert_eq!(failed.exit_code, 1);
        assert!(failed.contains("INSTALL_FAILED_ALREADY_EXISTS"));
    }

    #[tokio::test]
    async fn test_missing_program_is_device_command_error() {
        let bridge = CommandBridge::new("definitely-not-a-real-bridge");
        let err = bridge.run(&args(&["devices"])).await.unwrap_err();
        assert!(matches!(err, Error::DeviceCommand(_)));
    }

    #[tokio::test]
    async fn test_log_stream_close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let sink = File::create(tmp.path().join("logcat.txt")).unwrap();
        let bridge = CommandBridge::new("sh").with_prefix(["-c"]);

        let mut capture = bridge
            .stream_logs(&args(&["echo started; sleep 30"]), sink)
            .await
            .unwrap();
        assert!(capture.is_open());

        capture.close().await.unwrap();
        assert!(!capture.is_open());
        capture.close().await.unwrap();
    }
}
