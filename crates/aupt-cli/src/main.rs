use std::{collections::BTreeMap, fs, path::Path, process::ExitCode, sync::Arc};

use aupt_core::{run_suite, AuptConfig, ShellTest, TestCase};
use aupt_device::{connect, AdbShell};
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tracing::info;

#[derive(Parser)]
#[command(name = "aupt", version, about = "Unattended performance test harness")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(clap::Args)]
struct SuiteArgs {
    /// Instrumentation argument, e.g. `--arg iterations=5` (repeatable)
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    args: Vec<String>,
    /// Test case running a device shell command, `name=command` (repeatable)
    #[arg(long = "test", value_name = "NAME=COMMAND")]
    tests: Vec<String>,
    /// File with one `name=command` test per line; `#` starts a comment
    #[arg(long)]
    tests_file: Option<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the suite, collecting diagnostics into the output location
    Run(SuiteArgs),
    /// Print the order tests would run in, without running anything
    Schedule(SuiteArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    aupt_util::init_tracing()?;
    let cli = Cli::parse();

    match cli.cmd {
        Cmd::Run(suite) => {
            let config = AuptConfig::from_args(&parse_pairs(&suite.args)?)?;
            let device = connect(config.serial.as_deref(), config.command_timeout);
            if let Some(serial) = config.serial.as_deref() {
                let state = AdbShell::new(serial, config.command_timeout).get_state().await?;
                if state != "device" {
                    return Err(format!("device {serial} is {state}").into());
                }
            }
            let tests: Vec<Arc<dyn TestCase>> = test_specs(&suite)?
                .into_iter()
                .map(|(name, command)| {
                    Arc::new(ShellTest::new(
                        name,
                        command,
                        Arc::clone(&device),
                        Handle::current(),
                    )) as Arc<dyn TestCase>
                })
                .collect();
            if tests.is_empty() {
                return Err("no tests given; use --test or --tests-file".into());
            }

            let summary = run_suite(&config, &tests, device).await?;
            info!("summary written to {}", summary.results_dir.display());
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.aborted() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Cmd::Schedule(suite) => {
            let config = AuptConfig::from_args(&parse_pairs(&suite.args)?)?;
            let names: Vec<String> = test_specs(&suite)?
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            println!("# {:?}", config.scheduler());
            for (index, name) in config.scheduler().apply(&names).enumerate() {
                println!("{index}\t{name}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn split_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in {raw:?}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn parse_pairs(raw: &[String]) -> Result<BTreeMap<String, String>, String> {
    raw.iter().map(|pair| split_pair(pair)).collect()
}

fn parse_tests_file(path: &Path) -> Result<Vec<(String, String)>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let pair = split_pair(line).map_err(|e| format!("{}:{}: {e}", path.display(), lineno + 1))?;
        out.push(pair);
    }
    Ok(out)
}

fn test_specs(suite: &SuiteArgs) -> Result<Vec<(String, String)>, String> {
    let mut specs = Vec::new();
    if let Some(path) = &suite.tests_file {
        specs.extend(parse_tests_file(&aupt_util::expand_user(path))?);
    }
    for raw in &suite.tests {
        specs.push(split_pair(raw)?);
    }
    Ok(specs)
}
