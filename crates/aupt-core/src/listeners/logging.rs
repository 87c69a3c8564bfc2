use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    listener::{ListenerResult, TestListener},
    runner::SuiteReport,
    test_case::{TestFault, TestInfo},
};

pub struct LoggingListener;

#[async_trait]
impl TestListener for LoggingListener {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn add_failure(&self, test: &TestInfo, fault: &TestFault) -> ListenerResult {
        warn!("{} failed (iteration {}): {fault}", test.name, test.iteration);
        Ok(())
    }

    async fn add_error(&self, test: &TestInfo, fault: &TestFault) -> ListenerResult {
        warn!("{} {} (iteration {}): {fault}", test.name, fault.kind(), test.iteration);
        Ok(())
    }

    async fn end_test(&self, test: &TestInfo) -> ListenerResult {
        info!("finished {} (#{})", test.name, test.sequence);
        Ok(())
    }

    async fn end_suite(&self, report: &SuiteReport) {
        info!(
            "suite finished: run={} passed={} failures={} errors={} timeouts={} not_run={} in {}ms",
            report.run,
            report.passed,
            report.failures,
            report.errors,
            report.timeouts,
            report.not_run,
            report.elapsed_millis
        );
    }
}
