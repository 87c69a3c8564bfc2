use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::watch;

/// Outcome of a test body that did not pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestFault {
    /// A violated expectation. Panics in a test body land here, since that is
    /// how Rust assertions fail.
    Assertion { message: String },
    /// Anything else that went wrong while running the test.
    Error { message: String },
    /// The test did not finish within its per-test timeout.
    Timeout { after: Duration },
}

impl TestFault {
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFault::Assertion {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        TestFault::Error {
            message: message.into(),
        }
    }

    /// Failures go to `add_failure`; errors and timeouts go to `add_error`.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestFault::Assertion { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TestFault::Timeout { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TestFault::Assertion { .. } => "failure",
            TestFault::Error { .. } => "error",
            TestFault::Timeout { .. } => "timeout",
        }
    }
}

impl fmt::Display for TestFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestFault::Assertion { message } => write!(f, "assertion failed: {message}"),
            TestFault::Error { message } => write!(f, "{message}"),
            TestFault::Timeout { after } => {
                write!(f, "test timed out after {:.3}s", after.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for TestFault {}

pub type TestResult = Result<(), TestFault>;

/// Identifies one scheduled execution of a test case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestInfo {
    pub name: String,
    /// Zero-based position in the schedule.
    pub sequence: u64,
    /// One-based count of how many times this case has been started so far.
    pub iteration: u64,
}

/// Handed to a test body while it runs on its worker thread.
pub struct TestContext {
    info: TestInfo,
    cancel_rx: watch::Receiver<bool>,
}

impl TestContext {
    pub(crate) fn new(info: TestInfo, cancel_rx: watch::Receiver<bool>) -> Self {
        Self { info, cancel_rx }
    }

    pub fn info(&self) -> &TestInfo {
        &self.info
    }

    /// True once the runner has given up on this test. Bodies that poll this
    /// stop promptly; bodies that don't are simply abandoned.
    pub fn cancel_requested(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves when cancellation is requested, or never if the runner goes
    /// away without requesting it.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleeps on the worker thread, waking early with an error on cancellation.
    pub fn sleep(&self, duration: Duration) -> TestResult {
        let step = Duration::from_millis(20);
        let deadline = std::time::Instant::now() + duration;
        loop {
            if self.cancel_requested() {
                return Err(TestFault::error("cancelled"));
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(step.min(deadline - now));
        }
    }
}

/// An opaque unit of work. Implementations run on a dedicated worker thread
/// and may block freely.
pub trait TestCase: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self, ctx: &TestContext) -> TestResult;
}

struct FnTest<F> {
    name: String,
    body: F,
}

impl<F> TestCase for FnTest<F>
where
    F: Fn(&TestContext) -> TestResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &TestContext) -> TestResult {
        (self.body)(ctx)
    }
}

/// Wraps a closure as a test case.
pub fn test_fn<F>(name: impl Into<String>, body: F) -> Arc<dyn TestCase>
where
    F: Fn(&TestContext) -> TestResult + Send + Sync + 'static,
{
    Arc::new(FnTest {
        name: name.into(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> (watch::Sender<bool>, TestContext) {
        let (tx, rx) = watch::channel(false);
        let info = TestInfo {
            name: "t".into(),
            sequence: 0,
            iteration: 1,
        };
        (tx, TestContext::new(info, rx))
    }

    #[test]
    fn faults_are_routed_by_kind() {
        assert!(TestFault::assertion("x").is_failure());
        assert!(!TestFault::error("x").is_failure());
        let timeout = TestFault::Timeout {
            after: Duration::from_secs(2),
        };
        assert!(!timeout.is_failure());
        assert!(timeout.is_timeout());
        assert_eq!(timeout.to_string(), "test timed out after 2.000s");
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let (tx, ctx) = context();
        tx.send(true).unwrap();
        let started = std::time::Instant::now();
        assert_eq!(
            ctx.sleep(Duration::from_secs(10)),
            Err(TestFault::error("cancelled"))
        );
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_without_cancel() {
        let (_tx, ctx) = context();
        assert_eq!(ctx.sleep(Duration::from_millis(30)), Ok(()));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_signal() {
        let (tx, ctx) = context();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .expect("cancellation should be observed");
    }
}
