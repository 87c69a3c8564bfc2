//! The watchdog loop.
//!
//! Every scheduled test runs on its own freshly spawned worker thread while
//! the orchestrating task waits for the result with a bounded timeout. A test
//! that overruns is reported as a timeout error, its cancellation token is
//! flipped, and the worker is abandoned: Rust threads cannot be killed, so a
//! body that never checks [`TestContext::cancel_requested`] keeps running in
//! the background until it returns on its own.

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use aupt_journal::TEST_THREAD_PREFIX;
use aupt_util::sanitize_segment;
use serde::Serialize;
use tokio::{
    sync::{oneshot, watch},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    listener::{SuiteAbort, TestListener},
    scheduler::Schedule,
    test_case::{TestCase, TestContext, TestFault, TestInfo, TestResult},
    thread_dump::dump_threads,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunnerConfig {
    /// `None` waits forever for each test.
    pub test_timeout: Option<Duration>,
    /// `None` never stops scheduling on time.
    pub suite_timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    /// Tests the schedule reached: those run plus those cut off by the deadline.
    pub scheduled: u64,
    pub run: u64,
    pub passed: u64,
    pub failures: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Scheduled tests that never started because the suite deadline passed.
    pub not_run: u64,
    pub deadline_reached: bool,
    pub elapsed_millis: u64,
}

pub struct TestRunner {
    config: RunnerConfig,
    listeners: Arc<[Arc<dyn TestListener>]>,
}

pub struct TestRunnerBuilder {
    config: RunnerConfig,
    listeners: Vec<Arc<dyn TestListener>>,
}

impl TestRunnerBuilder {
    pub fn listener(mut self, listener: Arc<dyn TestListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> TestRunner {
        TestRunner {
            config: self.config,
            listeners: self.listeners.into(),
        }
    }
}

impl TestRunner {
    pub fn builder(config: RunnerConfig) -> TestRunnerBuilder {
        TestRunnerBuilder {
            config,
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs `schedule` in order, one test at a time. Returns the report when
    /// the schedule is exhausted or the suite deadline stops it, and the
    /// listener's abort when a listener halts the run.
    pub async fn run(
        &self,
        mut schedule: Schedule<'_, Arc<dyn TestCase>>,
    ) -> Result<SuiteReport, SuiteAbort> {
        let started = Instant::now();
        let deadline = self.config.suite_timeout.map(|timeout| started + timeout);
        let mut report = SuiteReport::default();
        let mut starts: HashMap<String, u64> = HashMap::new();
        let mut sequence = 0u64;

        while let Some(case) = schedule.next() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    report.deadline_reached = true;
                    report.not_run = 1 + schedule.remaining();
                    warn!(
                        "suite timeout reached after {} tests; {} scheduled tests not run",
                        report.run, report.not_run
                    );
                    break;
                }
            }

            let name = case.name().to_string();
            let iteration = {
                let count = starts.entry(name.clone()).or_default();
                *count += 1;
                *count
            };
            let info = TestInfo {
                name,
                sequence,
                iteration,
            };
            sequence += 1;

            for listener in self.listeners.iter() {
                listener.start_test(&info).await?;
            }
            report.run += 1;
            info!("running {} (#{}, iteration {})", info.name, info.sequence, info.iteration);

            match self.run_case(case, &info).await {
                Ok(()) => report.passed += 1,
                Err(fault) if fault.is_failure() => {
                    report.failures += 1;
                    for listener in self.listeners.iter() {
                        listener.add_failure(&info, &fault).await?;
                    }
                }
                Err(fault) => {
                    report.errors += 1;
                    if fault.is_timeout() {
                        report.timeouts += 1;
                    }
                    for listener in self.listeners.iter() {
                        listener.add_error(&info, &fault).await?;
                    }
                }
            }

            for listener in self.listeners.iter() {
                listener.end_test(&info).await?;
            }
        }

        report.scheduled = report.run + report.not_run;
        report.elapsed_millis = started.elapsed().as_millis() as u64;
        for listener in self.listeners.iter() {
            listener.end_suite(&report).await;
        }
        Ok(report)
    }

    async fn run_case(&self, case: &Arc<dyn TestCase>, info: &TestInfo) -> TestResult {
        let (result_tx, result_rx) = oneshot::channel::<TestResult>();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = TestContext::new(info.clone(), cancel_rx);
        let worker_case = Arc::clone(case);

        let spawned = std::thread::Builder::new()
            .name(format!("{TEST_THREAD_PREFIX}{}", sanitize_segment(&info.name)))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| worker_case.run(&ctx)))
                    .unwrap_or_else(|payload| Err(TestFault::assertion(panic_message(&*payload))));
                let _ = result_tx.send(result);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => return Err(TestFault::error(format!("failed to start test worker: {err}"))),
        };

        let waited = match self.config.test_timeout {
            Some(limit) => tokio::time::timeout(limit, result_rx)
                .await
                .map_err(|_| limit),
            None => Ok(result_rx.await),
        };

        match waited {
            Ok(Ok(result)) => {
                if tokio::task::spawn_blocking(move || handle.join())
                    .await
                    .is_err()
                {
                    debug!("test worker for {} could not be joined", info.name);
                }
                result
            }
            Ok(Err(_)) => Err(TestFault::error("test worker exited without reporting a result")),
            Err(limit) => {
                let _ = cancel_tx.send(true);
                drop(handle);
                warn!(
                    "{} timed out after {:.3}s; abandoning its worker. thread dump:\n{}",
                    info.name,
                    limit.as_secs_f64(),
                    dump_threads()
                );
                Err(TestFault::Timeout { after: limit })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "test panicked".to_string()
    }
}
