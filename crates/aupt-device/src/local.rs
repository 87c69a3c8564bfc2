use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{command_output, CommandRunner, DeviceFailure};

/// Runs commands through `sh -c` on the machine hosting the harness.
pub struct LocalShell {
    timeout: Duration,
}

impl LocalShell {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for LocalShell {
    fn describe(&self) -> String {
        "local".into()
    }

    async fn shell(&self, command: &str) -> Result<Vec<u8>, DeviceFailure> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        let output = command_output(cmd, "sh", self.timeout).await?;
        Ok(output.stdout)
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), DeviceFailure> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeviceFailure::Io(e.to_string()))?;
        }
        tokio::fs::copy(remote, local)
            .await
            .map_err(|e| DeviceFailure::Io(format!("copy {remote}: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_returns_stdout() {
        let shell = LocalShell::new(Duration::from_secs(5));
        let out = shell.shell("echo hello").await.unwrap();
        assert_eq!(String::from_utf8_lossy(&out), "hello\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let shell = LocalShell::new(Duration::from_secs(5));
        match shell.shell("echo oops >&2; exit 3").await {
            Err(DeviceFailure::Exit { status, stderr, .. }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let shell = LocalShell::new(Duration::from_millis(100));
        let err = shell.shell("sleep 5").await.unwrap_err();
        assert!(matches!(err, DeviceFailure::Timeout(_)));
    }

    #[tokio::test]
    async fn pull_copies_into_new_directories() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("dump.hprof");
        std::fs::write(&remote, b"heap").unwrap();
        let local = dir.path().join("out/heapdumps/dump.hprof");

        let shell = LocalShell::new(Duration::from_secs(5));
        shell
            .pull(&remote.to_string_lossy(), &local)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"heap");
        assert!(shell.remove(&remote.to_string_lossy()).await);
        assert!(!remote.exists());
    }
}
