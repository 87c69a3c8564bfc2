//! Shell access to the device under test.
//!
//! The harness either runs on the device itself (commands go through `sh -c`)
//! or on a host with the device reachable over adb (commands go through
//! `adb -s <serial> shell`). Everything above this crate talks to a
//! [`CommandRunner`] and never cares which one it got.

mod adb;
mod local;

use std::{fmt, io, path::Path, process::Output, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

pub use adb::{adb_path, AdbShell};
pub use local::LocalShell;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const PROP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum DeviceFailure {
    NotFound(String),
    Io(String),
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
    Timeout(Duration),
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFailure::NotFound(program) => write!(
                f,
                "{program} not found (set AUPT_ADB_PATH or ANDROID_SDK_ROOT for adb)"
            ),
            DeviceFailure::Io(msg) => write!(f, "command failed: {msg}"),
            DeviceFailure::Exit {
                status,
                stdout,
                stderr,
            } => {
                let detail = format_output(stdout, stderr);
                if detail.trim().is_empty() {
                    write!(f, "command failed with exit {status}")
                } else {
                    write!(f, "command failed with exit {status}: {}", detail.trim())
                }
            }
            DeviceFailure::Timeout(after) => {
                write!(f, "command timed out after {}s", after.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for DeviceFailure {}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Human readable description, e.g. `adb:emulator-5554` or `local`.
    fn describe(&self) -> String;

    /// Runs `command` in a device shell and returns its stdout.
    async fn shell(&self, command: &str) -> Result<Vec<u8>, DeviceFailure>;

    /// Copies a file produced on the device to `local`.
    async fn pull(&self, remote: &str, local: &Path) -> Result<(), DeviceFailure>;

    /// Removes a scratch file on the device. Failures are not interesting to
    /// callers, so this only reports whether the removal succeeded.
    async fn remove(&self, remote: &str) -> bool {
        self.shell(&format!("rm -f {remote}")).await.is_ok()
    }
}

/// Picks the adb runner when a serial is configured, the local shell otherwise.
pub fn connect(serial: Option<&str>, timeout: Duration) -> Arc<dyn CommandRunner> {
    match serial.map(str::trim).filter(|serial| !serial.is_empty()) {
        Some(serial) => Arc::new(AdbShell::new(serial, timeout)),
        None => Arc::new(LocalShell::new(timeout)),
    }
}

pub fn format_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    let mut out = String::new();

    if !stdout.is_empty() {
        out.push_str("stdout:\n");
        out.push_str(stdout);
        out.push('\n');
    }
    if !stderr.is_empty() {
        out.push_str("stderr:\n");
        out.push_str(stderr);
        out.push('\n');
    }

    out
}

pub(crate) async fn command_output(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> Result<Output, DeviceFailure> {
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                DeviceFailure::NotFound(program.to_string())
            } else {
                DeviceFailure::Io(e.to_string())
            }
        })?,
        Err(_) => return Err(DeviceFailure::Timeout(timeout)),
    };

    if output.status.success() {
        Ok(output)
    } else {
        Err(DeviceFailure::Exit {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceProps {
    pub fingerprint: Option<String>,
    pub model: Option<String>,
    pub api_level: Option<String>,
    pub release: Option<String>,
    pub abi: Option<String>,
}

pub async fn get_prop(runner: &dyn CommandRunner, prop: &str) -> Option<String> {
    match tokio::time::timeout(PROP_TIMEOUT, runner.shell(&format!("getprop {prop}"))).await {
        Ok(Ok(value)) => {
            let value = String::from_utf8_lossy(&value);
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    }
}

pub async fn device_props(runner: &dyn CommandRunner) -> DeviceProps {
    DeviceProps {
        fingerprint: get_prop(runner, "ro.build.fingerprint").await,
        model: get_prop(runner, "ro.product.model").await,
        api_level: get_prop(runner, "ro.build.version.sdk").await,
        release: get_prop(runner, "ro.build.version.release").await,
        abi: get_prop(runner, "ro.product.cpu.abi").await,
    }
}
