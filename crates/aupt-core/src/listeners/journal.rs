use std::sync::Arc;

use async_trait::async_trait;
use aupt_journal::Journal;

use crate::{
    listener::{ListenerResult, TestListener},
    runner::SuiteReport,
    test_case::{TestFault, TestInfo},
};

/// Mirrors every callback into the run's `events.jsonl`.
pub struct JournalListener {
    journal: Arc<Journal>,
}

impl JournalListener {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self { journal }
    }

    fn record_test(&self, event_type: &str, test: &TestInfo, extra: &[(&str, &str)]) {
        let sequence = test.sequence.to_string();
        let iteration = test.iteration.to_string();
        let mut props = vec![
            ("test", test.name.as_str()),
            ("sequence", sequence.as_str()),
            ("iteration", iteration.as_str()),
        ];
        props.extend_from_slice(extra);
        self.journal.record(event_type, &props);
    }
}

#[async_trait]
impl TestListener for JournalListener {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn start_test(&self, test: &TestInfo) -> ListenerResult {
        self.record_test("test.start", test, &[]);
        Ok(())
    }

    async fn add_failure(&self, test: &TestInfo, fault: &TestFault) -> ListenerResult {
        let message = fault.to_string();
        self.record_test("test.failure", test, &[("message", message.as_str())]);
        Ok(())
    }

    async fn add_error(&self, test: &TestInfo, fault: &TestFault) -> ListenerResult {
        let message = fault.to_string();
        self.record_test(
            "test.error",
            test,
            &[("kind", fault.kind()), ("message", message.as_str())],
        );
        Ok(())
    }

    async fn end_test(&self, test: &TestInfo) -> ListenerResult {
        self.record_test("test.end", test, &[]);
        Ok(())
    }

    async fn end_suite(&self, report: &SuiteReport) {
        let run = report.run.to_string();
        let passed = report.passed.to_string();
        let failures = report.failures.to_string();
        let errors = report.errors.to_string();
        let not_run = report.not_run.to_string();
        self.journal.record(
            "suite.end",
            &[
                ("run", run.as_str()),
                ("passed", passed.as_str()),
                ("failures", failures.as_str()),
                ("errors", errors.as_str()),
                ("not_run", not_run.as_str()),
            ],
        );
    }
}
