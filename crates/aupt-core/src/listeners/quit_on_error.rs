use async_trait::async_trait;

use crate::{
    listener::{ListenerResult, SuiteAbort, TestListener},
    test_case::{TestFault, TestInfo},
};

/// Stops the suite on the first error. Timeouts are errors too.
pub struct QuitOnErrorListener {
    include_failures: bool,
}

impl QuitOnErrorListener {
    pub fn new() -> Self {
        Self {
            include_failures: false,
        }
    }

    /// Also stop on assertion failures.
    pub fn including_failures() -> Self {
        Self {
            include_failures: true,
        }
    }
}

impl Default for QuitOnErrorListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TestListener for QuitOnErrorListener {
    fn name(&self) -> &'static str {
        "quit-on-error"
    }

    async fn add_failure(&self, test: &TestInfo, fault: &TestFault) -> ListenerResult {
        if self.include_failures {
            return Err(SuiteAbort::caused_by("quit on failure", test, fault));
        }
        Ok(())
    }

    async fn add_error(&self, test: &TestInfo, fault: &TestFault) -> ListenerResult {
        Err(SuiteAbort::caused_by("quit on error", test, fault))
    }
}
