//! Instrumentation-style `key=value` arguments, with `AUPT_*` environment
//! overrides for anything not given explicitly.

use std::{collections::BTreeMap, fmt, path::PathBuf, time::Duration};

use aupt_device::DEFAULT_COMMAND_TIMEOUT;
use aupt_util::{default_results_dir, env_key_for, env_var, expand_user, parse_flag};
use serde::Serialize;

use crate::{log_kind::LogKind, runner::RunnerConfig, scheduler::Scheduler};

/// Intervals and timeouts given in minutes are scaled by this.
pub const MINUTE: Duration = Duration::from_secs(60);

const DEFAULT_TEST_CASE_TIMEOUT_MINUTES: u64 = 10;

pub const KEY_ITERATIONS: &str = "iterations";
pub const KEY_SHUFFLE: &str = "shuffle";
pub const KEY_SEED: &str = "seed";
pub const KEY_TEST_CASE_TIMEOUT: &str = "testCaseTimeout";
pub const KEY_SUITE_TIMEOUT: &str = "suiteTimeout";
pub const KEY_OUTPUT_LOCATION: &str = "outputLocation";
pub const KEY_QUIT_ON_ERROR: &str = "quitOnError";
pub const KEY_QUIT_ON_FAILURE: &str = "quitOnFailure";
pub const KEY_HEAP_DUMP_INTERVAL: &str = "heapDumpInterval";
pub const KEY_HEAP_DUMP_PROCESSES: &str = "heapDumpProcesses";
pub const KEY_SCREENSHOT_ON_FAILURE: &str = "screenshotOnFailure";
pub const KEY_SERIAL: &str = "serial";
pub const KEY_COMMAND_TIMEOUT: &str = "commandTimeout";
pub const KEY_BUNDLE: &str = "bundle";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}={:?}: {}", self.key, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuptConfig {
    pub iterations: u64,
    pub shuffle: bool,
    /// Always resolved; a random seed is drawn when none was given so the run
    /// can be replayed from its summary.
    pub seed: u64,
    pub test_case_timeout: Option<Duration>,
    pub suite_timeout: Option<Duration>,
    pub output_location: PathBuf,
    /// Interval in minutes for every log kind, `<= 0` meaning disabled.
    pub log_intervals: Vec<(LogKind, i64)>,
    pub quit_on_error: bool,
    /// Also stop on assertion failures; implies `quit_on_error`.
    pub quit_on_failure: bool,
    pub heap_dump_interval: Option<Duration>,
    pub heap_dump_processes: Vec<String>,
    pub screenshot_on_failure: bool,
    pub serial: Option<String>,
    pub command_timeout: Duration,
    pub bundle: bool,
}

impl AuptConfig {
    /// Reads `args`, falling back to the process environment.
    pub fn from_args(args: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_sources(args, env_var)
    }

    /// `env` is consulted with the `AUPT_*` name of every key missing from
    /// `args`.
    pub fn from_sources<E>(args: &BTreeMap<String, String>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let source = Source { args, env };

        let iterations = source.u64(KEY_ITERATIONS)?.unwrap_or(1);
        let shuffle = source.flag(KEY_SHUFFLE)?.unwrap_or(false);
        let seed = match source.parsed(KEY_SEED, parse_seed)? {
            Some(seed) => seed,
            None => rand::random(),
        };
        let test_case_timeout = minutes(
            source
                .u64(KEY_TEST_CASE_TIMEOUT)?
                .unwrap_or(DEFAULT_TEST_CASE_TIMEOUT_MINUTES),
        );
        let suite_timeout = minutes(source.u64(KEY_SUITE_TIMEOUT)?.unwrap_or(0));
        let output_location = source
            .string(KEY_OUTPUT_LOCATION)
            .map(|path| expand_user(&path))
            .unwrap_or_else(default_results_dir);

        let mut log_intervals = Vec::with_capacity(LogKind::ALL.len());
        for kind in LogKind::ALL {
            log_intervals.push((kind, source.i64(kind.arg_key())?.unwrap_or(0)));
        }

        let heap_dump_processes = source
            .string(KEY_HEAP_DUMP_PROCESSES)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let command_timeout = match source.u64(KEY_COMMAND_TIMEOUT)? {
            Some(0) | None => DEFAULT_COMMAND_TIMEOUT,
            Some(secs) => Duration::from_secs(secs),
        };

        Ok(Self {
            iterations,
            shuffle,
            seed,
            test_case_timeout,
            suite_timeout,
            output_location,
            log_intervals,
            quit_on_error: source.flag(KEY_QUIT_ON_ERROR)?.unwrap_or(false),
            quit_on_failure: source.flag(KEY_QUIT_ON_FAILURE)?.unwrap_or(false),
            heap_dump_interval: minutes(source.u64(KEY_HEAP_DUMP_INTERVAL)?.unwrap_or(0)),
            heap_dump_processes,
            screenshot_on_failure: source.flag(KEY_SCREENSHOT_ON_FAILURE)?.unwrap_or(false),
            serial: source.string(KEY_SERIAL),
            command_timeout,
            bundle: source.flag(KEY_BUNDLE)?.unwrap_or(false),
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        if self.shuffle {
            Scheduler::shuffled(self.seed, self.iterations)
        } else {
            Scheduler::sequential(self.iterations)
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            test_timeout: self.test_case_timeout,
            suite_timeout: self.suite_timeout,
        }
    }

    pub fn interval(&self, kind: LogKind) -> i64 {
        self.log_intervals
            .iter()
            .find(|(candidate, _)| *candidate == kind)
            .map(|(_, minutes)| *minutes)
            .unwrap_or(0)
    }
}

/// Seeds are signed 64-bit values on the instrumentation side; both signs
/// map onto the same 64 bits the shuffle is seeded with.
fn parse_seed(value: &str) -> Result<u64, String> {
    value
        .parse::<i64>()
        .map(|seed| seed as u64)
        .or_else(|_| value.parse::<u64>())
        .map_err(|e| e.to_string())
}

/// Zero minutes means "no limit".
fn minutes(count: u64) -> Option<Duration> {
    if count == 0 {
        None
    } else {
        Some(Duration::from_secs(count.saturating_mul(60)))
    }
}

struct Source<'a, E> {
    args: &'a BTreeMap<String, String>,
    env: E,
}

impl<E> Source<'_, E>
where
    E: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        self.args
            .get(key)
            .cloned()
            .or_else(|| (self.env)(&env_key_for(key)))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.parsed(key, |value| value.parse::<u64>().map_err(|e| e.to_string()))
    }

    fn i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        self.parsed(key, |value| value.parse::<i64>().map_err(|e| e.to_string()))
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.parsed(key, |value| {
            parse_flag(value).ok_or_else(|| "expected true or false".to_string())
        })
    }

    fn parsed<T>(
        &self,
        key: &str,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<Option<T>, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(None);
        };
        parse(&value).map(Some).map_err(|reason| ConfigError {
            key: key.to_string(),
            value,
            reason,
        })
    }
}
