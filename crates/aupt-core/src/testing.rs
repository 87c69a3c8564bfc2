//! Device double shared by the unit tests.

use std::{fs, path::Path, sync::Mutex};

use async_trait::async_trait;
use aupt_device::{CommandRunner, DeviceFailure};

#[derive(Default)]
pub(crate) struct RecordingDevice {
    commands: Mutex<Vec<String>>,
    pulls: Mutex<Vec<String>>,
    /// Commands starting with any of these fail with exit status 1.
    pub(crate) failing_prefixes: Vec<&'static str>,
}

impl RecordingDevice {
    pub(crate) fn failing(prefixes: &[&'static str]) -> Self {
        Self {
            failing_prefixes: prefixes.to_vec(),
            ..Default::default()
        }
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn pulls(&self) -> Vec<String> {
        self.pulls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingDevice {
    fn describe(&self) -> String {
        "recording".into()
    }

    async fn shell(&self, command: &str) -> Result<Vec<u8>, DeviceFailure> {
        self.commands.lock().unwrap().push(command.to_string());
        if self
            .failing_prefixes
            .iter()
            .any(|prefix| command.starts_with(prefix))
        {
            return Err(DeviceFailure::Exit {
                status: 1,
                stdout: String::new(),
                stderr: format!("{command}: failed"),
            });
        }
        Ok(format!("ran {command}\n").into_bytes())
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), DeviceFailure> {
        self.pulls.lock().unwrap().push(remote.to_string());
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|e| DeviceFailure::Io(e.to_string()))?;
        }
        fs::write(local, remote).map_err(|e| DeviceFailure::Io(e.to_string()))
    }
}
