//! Differential test runner CLI.
//!
//! This binary is the single entry point for a test run. It performs:
//! 1. **Configuration:** Defaults, an optional JSON file, environment overrides, then flags.
//! 2. **Listing:** `--list` prints the selected case names without touching any tool.
//! 3. **Execution:** Preflight, then every selected case through compile, simulate, and compare.
//! 4. **Reporting:** A console summary, an optional JSON report, and the exit code
//!    (0 all passed, 1 a case failed, 2 the run could not start).

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::EnvFilter;

use rvsim_difftest::Config;
use rvsim_difftest::catalog::{self, Catalog, RunOptions};
use rvsim_difftest::common::SetupError;
use rvsim_difftest::compare::ExitStatusPolicy;

/// Exit code when every selected case passed.
const EXIT_PASSED: u8 = 0;
/// Exit code when at least one case failed.
const EXIT_FAILED: u8 = 1;
/// Exit code when the run could not start.
const EXIT_SETUP: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "run-tests",
    author,
    version,
    about = "Differential tests: rvsim against the Spike reference simulator",
    long_about = "Compile every program under the programs directory with the bare-metal runtime, \
run it under Spike and rvsim with the same memory map, and compare their output.\n\n\
Tool paths can be set in a JSON config file or with RISCV_UNKNOWN_ELF_GCC, RISCV_UNKNOWN_ELF_AS, \
RISCV_SPIKE, RVSIM, RUNTIME_DIR, PROGRAMS_DIR and BINARY_DIR.\n\n\
Examples:\n  run-tests\n  run-tests --filter 'hello_world/' --debug\n  run-tests --jobs 8 --report target/difftest/report.json"
)]
struct Cli {
    /// Log every command line and stage transition.
    #[arg(long)]
    debug: bool,

    /// Only run cases whose name matches this regular expression.
    #[arg(short, long)]
    filter: Option<String>,

    /// JSON config file; missing fields take their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of cases to run concurrently.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Write the full report as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the selected case names and exit.
    #[arg(long)]
    list: bool,

    /// Whether an exit-status divergence with matching output fails a case.
    #[arg(long, value_enum)]
    exit_status: Option<ExitStatusArg>,

    /// Run each simulator this many times per case and require identical behavior.
    #[arg(long)]
    repeat: Option<u32>,

    /// List passing cases too.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExitStatusArg {
    /// Fail the case.
    Strict,
    /// Pass the case with a warning.
    Warn,
}

impl From<ExitStatusArg> for ExitStatusPolicy {
    fn from(arg: ExitStatusArg) -> Self {
        match arg {
            ExitStatusArg::Strict => Self::Strict,
            ExitStatusArg::Warn => Self::Warn,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

/// Installs the log subscriber: `warn` by default, `debug` with `--debug`; `RUST_LOG` wins.
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Builds the config from the command line and runs or lists the catalog.
///
/// # Returns
///
/// The process exit code, or the [`SetupError`] that prevented the run.
fn run(cli: &Cli) -> Result<u8, SetupError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(policy) = cli.exit_status {
        config.comparison.exit_status = policy.into();
    }
    if let Some(repeat) = cli.repeat {
        config.comparison.repeat = repeat;
    }

    if cli.list {
        let mut catalog = Catalog::discover(&config.paths.programs_dir)?;
        if let Some(pattern) = &cli.filter {
            catalog.retain_matching(pattern)?;
        }
        for case in catalog.cases() {
            println!("{}", case.name);
        }
        return Ok(EXIT_PASSED);
    }

    let options = RunOptions {
        filter: cli.filter.clone(),
        jobs: NonZeroUsize::new(cli.jobs).unwrap_or(NonZeroUsize::MIN),
    };
    let report = catalog::run(&config, &options)?;
    print!("{}", report.render(cli.verbose));

    if let Some(path) = &cli.report {
        if let Err(err) = report.write_json(path) {
            error!(path = %path.display(), %err, "could not write report");
            return Ok(EXIT_SETUP);
        }
    }

    Ok(if report.all_passed() {
        EXIT_PASSED
    } else {
        EXIT_FAILED
    })
}
