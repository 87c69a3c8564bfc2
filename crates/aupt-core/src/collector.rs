//! Background diagnostics capture.
//!
//! Each active [`LogKind`] has its own interval. Instead of one timer per kind,
//! a single task wakes every `gcd(intervals)` and fires whichever generators
//! are due, so every kind lands on an exact multiple of its interval with the
//! fewest possible wake-ups.

use std::{path::PathBuf, sync::Arc, time::Duration};

use aupt_device::CommandRunner;
use aupt_util::now_millis;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{info, warn};

use crate::{log_kind::capture, log_kind::LogKind, numeric::gcd};

#[derive(Clone, Debug)]
struct Generator {
    kind: LogKind,
    interval: Duration,
    last_fired: Instant,
}

/// Which generators are active and when each one is next due.
#[derive(Clone, Debug)]
pub struct PollPlan {
    generators: Vec<Generator>,
    period: Option<Duration>,
}

impl PollPlan {
    /// `intervals` are counts of `unit`; counts `<= 0` disable that kind.
    /// When both bugreport flavours are requested only bugreportz is kept.
    pub fn new(intervals: &[(LogKind, i64)], unit: Duration) -> Self {
        let mut active: Vec<(LogKind, u64)> = intervals
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(kind, count)| (*kind, *count as u64))
            .collect();
        active.sort_by_key(|(kind, _)| *kind);
        active.dedup_by_key(|(kind, _)| *kind);

        let has_zipped = active.iter().any(|(kind, _)| *kind == LogKind::Bugreportz);
        if has_zipped && active.iter().any(|(kind, _)| *kind == LogKind::Bugreport) {
            warn!("both bugreport and bugreportz intervals are set; only bugreportz will be collected");
            active.retain(|(kind, _)| *kind != LogKind::Bugreport);
        }

        let period_units = active.iter().fold(0, |acc, (_, count)| gcd(acc, *count));
        let now = Instant::now();
        let generators = active
            .into_iter()
            .map(|(kind, count)| Generator {
                kind,
                interval: scale(unit, count),
                last_fired: now,
            })
            .collect();
        let period = (period_units > 0).then(|| scale(unit, period_units));
        Self { generators, period }
    }

    /// The shared poll period, `None` when nothing is active.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn kinds(&self) -> Vec<LogKind> {
        self.generators.iter().map(|g| g.kind).collect()
    }

    pub fn interval(&self, kind: LogKind) -> Option<Duration> {
        self.generators
            .iter()
            .find(|g| g.kind == kind)
            .map(|g| g.interval)
    }

    pub fn reset(&mut self, now: Instant) {
        for generator in &mut self.generators {
            generator.last_fired = now;
        }
    }

    /// Returns the kinds due at `now` and marks them fired.
    pub fn due(&mut self, now: Instant) -> Vec<LogKind> {
        let mut due = Vec::new();
        for generator in &mut self.generators {
            if now.saturating_duration_since(generator.last_fired) >= generator.interval {
                generator.last_fired = now;
                due.push(generator.kind);
            }
        }
        due
    }
}

fn scale(unit: Duration, count: u64) -> Duration {
    unit.checked_mul(u32::try_from(count).unwrap_or(u32::MAX))
        .unwrap_or(Duration::MAX)
}

struct Running {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<PollPlan>>,
}

pub struct DataCollector {
    plan: Option<PollPlan>,
    /// Restores `plan` when the poll task dies without handing it back.
    template: PollPlan,
    runner: Arc<dyn CommandRunner>,
    results_dir: PathBuf,
    running: Option<Running>,
}

impl DataCollector {
    pub fn new(
        intervals: &[(LogKind, i64)],
        unit: Duration,
        runner: Arc<dyn CommandRunner>,
        results_dir: PathBuf,
    ) -> Self {
        let plan = PollPlan::new(intervals, unit);
        Self {
            plan: Some(plan.clone()),
            template: plan,
            runner,
            results_dir,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// True while a poll task is alive. Stays false when no generator is
    /// active, even between `start` and `stop`.
    pub fn has_background_task(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| running.task.is_some())
            .unwrap_or(false)
    }

    pub fn poll_period(&self) -> Option<Duration> {
        self.plan.as_ref().and_then(PollPlan::period)
    }

    /// Spawns the poll task on the current tokio runtime. Starting twice is a
    /// logged no-op.
    pub fn start(&mut self) {
        if self.running.is_some() {
            warn!("data collector already started; ignoring start");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = match self.plan.take() {
            Some(plan) if !plan.is_empty() => {
                let mut plan = plan;
                let started = Instant::now();
                plan.reset(started);
                info!(
                    "data collector polling every {:?} for {:?}",
                    plan.period(),
                    plan.kinds()
                );
                let runner = Arc::clone(&self.runner);
                let dir = self.results_dir.clone();
                Some(tokio::spawn(poll_loop(plan, started, runner, dir, stop_rx)))
            }
            plan => {
                info!("no log generators configured; data collector stays idle");
                self.plan = plan;
                None
            }
        };
        self.running = Some(Running { stop_tx, task });
    }

    /// Signals the poll task and waits for it. A capture already in progress
    /// finishes first. Stopping while stopped is a logged no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            warn!("data collector not started; ignoring stop");
            return;
        };
        let _ = running.stop_tx.send(true);
        if let Some(task) = running.task {
            match task.await {
                Ok(plan) => self.plan = Some(plan),
                Err(err) => {
                    warn!("data collector task ended abnormally: {err}");
                    self.plan = Some(self.template.clone());
                }
            }
        }
    }
}

async fn poll_loop(
    mut plan: PollPlan,
    started: Instant,
    runner: Arc<dyn CommandRunner>,
    dir: PathBuf,
    mut stop_rx: watch::Receiver<bool>,
) -> PollPlan {
    let Some(period) = plan.period() else {
        return plan;
    };
    let mut ticker = tokio::time::interval_at(started, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            tick = ticker.tick() => {
                for kind in plan.due(tick) {
                    match capture(kind, runner.as_ref(), &dir, now_millis()).await {
                        Ok(path) => info!("captured {kind}: {}", path.display()),
                        Err(err) => warn!("failed to capture {kind}: {err}"),
                    }
                }
            }
        }
    }
    plan
}
