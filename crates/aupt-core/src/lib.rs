//! Unattended performance test harness.
//!
//! Tests are ordered by a [`Scheduler`], executed one at a time under the
//! [`TestRunner`] watchdog, and observed by [`TestListener`]s, while a
//! [`DataCollector`] captures device diagnostics in the background.

pub mod collector;
pub mod config;
pub mod listener;
pub mod listeners;
pub mod log_kind;
pub mod memhealth;
mod numeric;
pub mod runner;
pub mod scheduler;
pub mod shell_test;
pub mod suite;
pub mod test_case;
#[cfg(test)]
mod testing;
pub mod thread_dump;

pub use collector::{DataCollector, PollPlan};
pub use config::{AuptConfig, ConfigError};
pub use listener::{ListenerResult, SuiteAbort, TestListener};
pub use log_kind::LogKind;
pub use runner::{RunnerConfig, SuiteReport, TestRunner};
pub use scheduler::{Schedule, Scheduler};
pub use shell_test::ShellTest;
pub use suite::{run_suite, SuiteSummary};
pub use test_case::{test_fn, TestCase, TestContext, TestFault, TestInfo, TestResult};
