use std::sync::Arc;

use aupt_device::{CommandRunner, DeviceFailure};
use tokio::runtime::Handle;
use tracing::debug;

use crate::test_case::{TestCase, TestContext, TestFault, TestResult};

/// A test that runs one shell command on the device. A non-zero exit is an
/// assertion failure; not being able to run the command at all is an error.
pub struct ShellTest {
    name: String,
    command: String,
    runner: Arc<dyn CommandRunner>,
    handle: Handle,
}

impl ShellTest {
    /// `handle` drives the command from the test's worker thread and should
    /// belong to a multi-thread runtime.
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        handle: Handle,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            runner,
            handle,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl TestCase for ShellTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TestContext) -> TestResult {
        let outcome = self.handle.block_on(async {
            tokio::select! {
                result = self.runner.shell(&self.command) => Some(result),
                _ = ctx.cancelled() => None,
            }
        });
        match outcome {
            None => Err(TestFault::error("cancelled")),
            Some(Ok(stdout)) => {
                debug!(
                    "{} passed: {}",
                    self.name,
                    String::from_utf8_lossy(&stdout).trim()
                );
                Ok(())
            }
            Some(Err(DeviceFailure::Exit { status, stderr, .. })) => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    Err(TestFault::assertion(format!("`{}` exited with {status}", self.command)))
                } else {
                    Err(TestFault::assertion(format!(
                        "`{}` exited with {status}: {stderr}",
                        self.command
                    )))
                }
            }
            Some(Err(err)) => Err(TestFault::error(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use aupt_device::LocalShell;

    use super::*;
    use crate::{
        runner::{RunnerConfig, TestRunner},
        scheduler::Scheduler,
    };

    fn shell_case(name: &str, command: &str) -> Arc<dyn TestCase> {
        Arc::new(ShellTest::new(
            name,
            command,
            Arc::new(LocalShell::new(Duration::from_secs(10))),
            Handle::current(),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn exit_status_decides_the_outcome() {
        let cases = vec![
            shell_case("passes", "true"),
            shell_case("fails", "echo nope >&2; exit 4"),
            shell_case("missing", "exec /definitely/not/here"),
        ];
        let report = TestRunner::builder(RunnerConfig::default())
            .build()
            .run(Scheduler::sequential(1).apply(&cases))
            .await
            .unwrap();
        assert_eq!(report.passed, 1);
        assert_eq!(report.failures, 2);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_command_is_cancelled() {
        let cases = vec![shell_case("sleeps", "sleep 30")];
        let config = RunnerConfig {
            test_timeout: Some(Duration::from_millis(200)),
            suite_timeout: None,
        };
        let started = std::time::Instant::now();
        let report = TestRunner::builder(config)
            .build()
            .run(Scheduler::sequential(1).apply(&cases))
            .await
            .unwrap();
        assert_eq!(report.timeouts, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
