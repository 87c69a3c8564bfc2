use std::{path::Path, path::PathBuf, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{command_output, CommandRunner, DeviceFailure};

pub fn adb_path() -> PathBuf {
    if let Ok(path) = std::env::var("AUPT_ADB_PATH") {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("ADB_PATH") {
        return PathBuf::from(path);
    }
    if let Ok(sdk_root) =
        std::env::var("ANDROID_SDK_ROOT").or_else(|_| std::env::var("ANDROID_HOME"))
    {
        let candidate = PathBuf::from(&sdk_root).join("platform-tools").join("adb");
        if candidate.exists() {
            return candidate;
        }
        let candidate = PathBuf::from(&sdk_root)
            .join("platform-tools")
            .join("adb.exe");
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from("adb")
}

/// Runs commands on a device attached over adb.
pub struct AdbShell {
    serial: String,
    timeout: Duration,
}

impl AdbShell {
    pub fn new(serial: &str, timeout: Duration) -> Self {
        Self {
            serial: serial.trim().to_string(),
            timeout,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn adb(&self, args: &[&str], timeout: Duration) -> Result<Vec<u8>, DeviceFailure> {
        let path = adb_path();
        let mut cmd = Command::new(&path);
        cmd.arg("-s").arg(&self.serial).args(args);
        debug!("adb -s {} {}", self.serial, args.join(" "));
        let output = command_output(cmd, &path.to_string_lossy(), timeout).await?;
        Ok(output.stdout)
    }

    /// `adb get-state`, e.g. `device`, `offline` or `unauthorized`.
    pub async fn get_state(&self) -> Result<String, DeviceFailure> {
        let stdout = self
            .adb(&["get-state"], Duration::from_secs(10))
            .await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}

#[async_trait]
impl CommandRunner for AdbShell {
    fn describe(&self) -> String {
        format!("adb:{}", self.serial)
    }

    async fn shell(&self, command: &str) -> Result<Vec<u8>, DeviceFailure> {
        self.adb(&["shell", command], self.timeout).await
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), DeviceFailure> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeviceFailure::Io(e.to_string()))?;
        }
        let local = local.to_string_lossy().to_string();
        self.adb(&["pull", remote, &local], self.timeout).await?;
        Ok(())
    }
}
