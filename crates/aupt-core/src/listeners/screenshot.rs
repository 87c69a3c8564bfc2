use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use aupt_device::CommandRunner;
use aupt_util::{now_millis, sanitize_segment};
use tracing::{info, warn};

use crate::{
    listener::{ListenerResult, TestListener},
    test_case::{TestFault, TestInfo},
};

const REMOTE_SCREENSHOT: &str = "/data/local/tmp/aupt-screenshot.png";

/// Grabs the screen when a test fails or errors, into `<results>/screenshots/`.
pub struct ScreenshotListener {
    runner: Arc<dyn CommandRunner>,
    dir: PathBuf,
}

impl ScreenshotListener {
    pub fn new(runner: Arc<dyn CommandRunner>, results_dir: PathBuf) -> Self {
        Self {
            runner,
            dir: results_dir.join("screenshots"),
        }
    }

    async fn capture(&self, test: &TestInfo) {
        let local = self.dir.join(format!(
            "screenshot-{}-{}.png",
            sanitize_segment(&test.name),
            now_millis()
        ));
        if let Err(err) = self
            .runner
            .shell(&format!("screencap -p {REMOTE_SCREENSHOT}"))
            .await
        {
            warn!("screenshot for {} failed: {err}", test.name);
            return;
        }
        match self.runner.pull(REMOTE_SCREENSHOT, &local).await {
            Ok(()) => info!("screenshot for {}: {}", test.name, local.display()),
            Err(err) => warn!("pulling screenshot for {} failed: {err}", test.name),
        }
        self.runner.remove(REMOTE_SCREENSHOT).await;
    }
}

#[async_trait]
impl TestListener for ScreenshotListener {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    async fn add_failure(&self, test: &TestInfo, _fault: &TestFault) -> ListenerResult {
        self.capture(test).await;
        Ok(())
    }

    async fn add_error(&self, test: &TestInfo, _fault: &TestFault) -> ListenerResult {
        self.capture(test).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;

    #[tokio::test]
    async fn failure_screenshot_is_named_after_the_test() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(RecordingDevice::default());
        let listener = ScreenshotListener::new(device.clone(), dir.path().to_path_buf());
        let test = TestInfo {
            name: "open/settings".into(),
            sequence: 0,
            iteration: 1,
        };
        listener
            .add_failure(&test, &TestFault::assertion("no toggle"))
            .await
            .unwrap();

        assert_eq!(
            device.commands(),
            vec![
                format!("screencap -p {REMOTE_SCREENSHOT}"),
                format!("rm -f {REMOTE_SCREENSHOT}"),
            ]
        );
        let names: Vec<String> = std::fs::read_dir(dir.path().join("screenshots"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("screenshot-open_settings-"), "{names:?}");
    }

    #[tokio::test]
    async fn screencap_failure_does_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new(RecordingDevice::failing(&["screencap"]));
        let listener = ScreenshotListener::new(device.clone(), dir.path().to_path_buf());
        let test = TestInfo {
            name: "t".into(),
            sequence: 0,
            iteration: 1,
        };
        assert!(listener.add_error(&test, &TestFault::error("x")).await.is_ok());
        assert!(device.pulls().is_empty());
    }
}
