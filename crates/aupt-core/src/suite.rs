//! One complete harness run: collector, watchdog runner and the reports that
//! are left behind in the results directory.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use aupt_device::{device_props, CommandRunner, DeviceProps};
use aupt_journal::Journal;
use aupt_util::{ensure_dir, write_json_atomic, zip_directory};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    collector::DataCollector,
    config::{AuptConfig, MINUTE},
    listener::SuiteAbort,
    listeners::{
        HeapDumpListener, JournalListener, LoggingListener, QuitOnErrorListener,
        ScreenshotListener,
    },
    memhealth::MemoryHealth,
    runner::{SuiteReport, TestRunner},
    scheduler::Scheduler,
    test_case::TestCase,
};

pub const SUMMARY_FILE_NAME: &str = "suite-summary.json";

#[derive(Clone, Debug, Serialize)]
pub struct AbortRecord {
    pub reason: String,
    pub test: Option<String>,
    pub cause: Option<String>,
}

impl From<&SuiteAbort> for AbortRecord {
    fn from(abort: &SuiteAbort) -> Self {
        Self {
            reason: abort.reason.clone(),
            test: abort.test.clone(),
            cause: abort.cause.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SuiteSummary {
    pub run_id: String,
    pub device: String,
    pub device_props: DeviceProps,
    pub scheduler: Scheduler,
    pub test_count: usize,
    pub config: AuptConfig,
    /// Absent when a listener aborted the run.
    pub report: Option<SuiteReport>,
    pub abort: Option<AbortRecord>,
    pub memory_snapshots: usize,
    pub results_dir: PathBuf,
    pub bundle: Option<PathBuf>,
    pub journal_dropped_events: u64,
}

impl SuiteSummary {
    pub fn aborted(&self) -> bool {
        self.abort.is_some()
    }
}

fn build_runner(
    config: &AuptConfig,
    device: &Arc<dyn CommandRunner>,
    journal: &Arc<Journal>,
) -> TestRunner {
    let mut builder = TestRunner::builder(config.runner_config())
        .listener(Arc::new(LoggingListener))
        .listener(Arc::new(JournalListener::new(Arc::clone(journal))));
    if config.screenshot_on_failure {
        builder = builder.listener(Arc::new(ScreenshotListener::new(
            Arc::clone(device),
            config.output_location.clone(),
        )));
    }
    if let Some(interval) = config.heap_dump_interval {
        if config.heap_dump_processes.is_empty() {
            warn!("heapDumpInterval set without heapDumpProcesses; heap dumps disabled");
        } else {
            builder = builder.listener(Arc::new(HeapDumpListener::new(
                Arc::clone(device),
                config.heap_dump_processes.clone(),
                interval,
                config.output_location.clone(),
            )));
        }
    }
    // Registered last so the other listeners see the fault before the run stops.
    if config.quit_on_failure {
        builder = builder.listener(Arc::new(QuitOnErrorListener::including_failures()));
    } else if config.quit_on_error {
        builder = builder.listener(Arc::new(QuitOnErrorListener::new()));
    }
    builder.build()
}

/// Runs `tests` on `device` as configured and writes everything the run
/// produces under `config.output_location`.
pub async fn run_suite(
    config: &AuptConfig,
    tests: &[Arc<dyn TestCase>],
    device: Arc<dyn CommandRunner>,
) -> io::Result<SuiteSummary> {
    let dir = config.output_location.clone();
    ensure_dir(&dir)?;
    let run_id = Uuid::new_v4().to_string();
    let journal = Journal::open(&dir, &run_id)?;
    journal.install_crash_hook();

    let scheduler = config.scheduler();
    let seed = config.seed.to_string();
    let test_count = tests.len().to_string();
    journal.record(
        "suite.start",
        &[
            ("seed", seed.as_str()),
            ("tests", test_count.as_str()),
            ("device", device.describe().as_str()),
        ],
    );
    info!(
        "run {run_id}: {} tests on {} with {:?}, results in {}",
        tests.len(),
        device.describe(),
        scheduler,
        dir.display()
    );
    let props = device_props(device.as_ref()).await;

    let runner = build_runner(config, &device, &journal);
    let mut collector = DataCollector::new(
        &config.log_intervals,
        MINUTE,
        Arc::clone(&device),
        dir.clone(),
    );
    collector.start();
    let outcome = runner.run(scheduler.apply(tests)).await;
    collector.stop().await;

    let (report, abort) = match outcome {
        Ok(report) => (Some(report), None),
        Err(abort) => {
            warn!("{abort}");
            let record = AbortRecord::from(&abort);
            journal.record(
                "suite.abort",
                &[
                    ("reason", record.reason.as_str()),
                    ("test", record.test.as_deref().unwrap_or("")),
                ],
            );
            (None, Some(record))
        }
    };

    let health = match MemoryHealth::from_results_dir(&dir)
        .and_then(|health| health.write_reports(&dir).map(|_| health))
    {
        Ok(health) => health,
        Err(err) => {
            journal.close();
            return Err(err);
        }
    };

    journal.close();
    let mut summary = SuiteSummary {
        run_id,
        device: device.describe(),
        device_props: props,
        scheduler,
        test_count: tests.len(),
        config: config.clone(),
        report,
        abort,
        memory_snapshots: health.snapshots(),
        results_dir: dir.clone(),
        bundle: None,
        journal_dropped_events: journal.dropped(),
    };
    let summary_path = dir.join(SUMMARY_FILE_NAME);
    write_json_atomic(&summary_path, &summary)?;

    if config.bundle {
        let bundle = bundle_path(&dir, &summary.run_id);
        let files = zip_directory(&dir, &bundle)?;
        info!("bundled {files} files into {}", bundle.display());
        summary.bundle = Some(bundle);
        write_json_atomic(&summary_path, &summary)?;
    }
    Ok(summary)
}

/// `aupt-results-<run>.zip` next to the results directory.
fn bundle_path(results_dir: &Path, run_id: &str) -> PathBuf {
    let name = format!("aupt-results-{run_id}.zip");
    match results_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => results_dir.join(name),
    }
}
