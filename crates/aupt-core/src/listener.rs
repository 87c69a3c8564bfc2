use std::fmt;

use async_trait::async_trait;

use crate::{
    runner::SuiteReport,
    test_case::{TestFault, TestInfo},
};

/// Raised by a listener to halt the whole suite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuiteAbort {
    pub reason: String,
    pub test: Option<String>,
    pub cause: Option<TestFault>,
}

impl SuiteAbort {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            test: None,
            cause: None,
        }
    }

    pub fn caused_by(reason: impl Into<String>, test: &TestInfo, fault: &TestFault) -> Self {
        Self {
            reason: reason.into(),
            test: Some(test.name.clone()),
            cause: Some(fault.clone()),
        }
    }
}

impl fmt::Display for SuiteAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "suite aborted: {}", self.reason)?;
        if let Some(test) = &self.test {
            write!(f, " (in {test})")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SuiteAbort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

pub type ListenerResult = Result<(), SuiteAbort>;

/// Observer of test execution. Callbacks for one test arrive in the order
/// `start_test`, then at most one of `add_failure`/`add_error`, then
/// `end_test`, always on the orchestrating task. Returning `Err` stops the run.
#[async_trait]
pub trait TestListener: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start_test(&self, _test: &TestInfo) -> ListenerResult {
        Ok(())
    }

    async fn add_failure(&self, _test: &TestInfo, _fault: &TestFault) -> ListenerResult {
        Ok(())
    }

    async fn add_error(&self, _test: &TestInfo, _fault: &TestFault) -> ListenerResult {
        Ok(())
    }

    async fn end_test(&self, _test: &TestInfo) -> ListenerResult {
        Ok(())
    }

    /// Called once after the schedule is exhausted or stopped by the suite
    /// deadline. Not called when a listener aborted the run.
    async fn end_suite(&self, _report: &SuiteReport) {}
}
