use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use aupt_device::CommandRunner;
use aupt_util::{now_millis, sanitize_segment};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    listener::{ListenerResult, TestListener},
    test_case::TestInfo,
};

const REMOTE_DIR: &str = "/data/local/tmp";

/// Dumps the Java heap of the configured processes between tests, at most
/// once per interval. Dumps go to `<results>/heapdumps/`.
pub struct HeapDumpListener {
    runner: Arc<dyn CommandRunner>,
    processes: Vec<String>,
    interval: Duration,
    dir: PathBuf,
    last_dump: Mutex<Instant>,
}

impl HeapDumpListener {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        processes: Vec<String>,
        interval: Duration,
        results_dir: PathBuf,
    ) -> Self {
        Self {
            runner,
            processes,
            interval,
            dir: results_dir.join("heapdumps"),
            last_dump: Mutex::new(Instant::now()),
        }
    }

    fn take_due(&self) -> bool {
        let mut last = match self.last_dump.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        if now.duration_since(*last) < self.interval {
            return false;
        }
        *last = now;
        true
    }

    async fn dump_all(&self) {
        let stamp = now_millis();
        for process in &self.processes {
            let slug = sanitize_segment(process);
            let remote = format!("{REMOTE_DIR}/aupt-{slug}-{stamp}.hprof");
            let local = self.dir.join(format!("{slug}-{stamp}.hprof"));
            if let Err(err) = self
                .runner
                .shell(&format!("am dumpheap {process} {remote}"))
                .await
            {
                warn!("heap dump of {process} failed: {err}");
                continue;
            }
            match self.runner.pull(&remote, &local).await {
                Ok(()) => info!("heap dump of {process}: {}", local.display()),
                Err(err) => warn!("pulling heap dump of {process} failed: {err}"),
            }
            self.runner.remove(&remote).await;
        }
    }

    async fn maybe_dump(&self) {
        if self.processes.is_empty() || self.interval.is_zero() {
            return;
        }
        if self.take_due() {
            self.dump_all().await;
        }
    }
}

#[async_trait]
impl TestListener for HeapDumpListener {
    fn name(&self) -> &'static str {
        "heap-dump"
    }

    async fn start_test(&self, _test: &TestInfo) -> ListenerResult {
        self.maybe_dump().await;
        Ok(())
    }

    async fn end_test(&self, _test: &TestInfo) -> ListenerResult {
        self.maybe_dump().await;
        Ok(())
    }
}
