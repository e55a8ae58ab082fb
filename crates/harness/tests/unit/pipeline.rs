//! # Pipeline Tests
//!
//! Full catalog runs: preflight, discovery, compile, both simulators, comparison,
//! and reporting, with the fake toolchain standing in for the real one.

use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rvsim_difftest::catalog::{self, OutcomeKind, RunOptions, Stage};
use rvsim_difftest::common::SetupError;
use rvsim_difftest::compare::ExitStatusPolicy;
use rvsim_difftest::{Report, SimulatorKind};

use crate::common::elf::TestElf;
use crate::common::harness::Workspace;

const HELLO: &str = "Hello world!\n";

fn kind_of(report: &Report, name: &str) -> OutcomeKind {
    report
        .get(name)
        .unwrap_or_else(|| panic!("no outcome for {name}"))
        .kind
}

fn recorded_args(binary: &Path, kind: SimulatorKind) -> Vec<String> {
    let mut path = binary.as_os_str().to_owned();
    path.push(format!(".{kind}.args"));
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn hello_world(workspace: &Workspace) {
    let _ = workspace.add_program("hello_world", HELLO);
    workspace.sidecar("hello_world", "expected", HELLO);
}

#[test]
fn test_hello_world_end_to_end() {
    let workspace = Workspace::new();
    hello_world(&workspace);

    let report = workspace.run();
    assert!(report.all_passed(), "{}", report.render(true));
    assert_eq!(report.outcomes().len(), 3);

    let oracle_case = report.get("hello_world/oracle").unwrap();
    assert_eq!(oracle_case.stage, Stage::Passed);
    assert_eq!(oracle_case.commands.len(), 2);
    assert!(oracle_case.commands[1].contains("--isa=RV32IM -m0x2000:0xffe000,0x1000000:0x1000000"));

    let binary = workspace.worker_dir().join("hello_world_oracle");
    assert_eq!(
        recorded_args(&binary, SimulatorKind::Oracle),
        [
            "--isa=RV32IM".to_string(),
            "-m0x2000:0xffe000,0x1000000:0x1000000".to_string(),
            binary.display().to_string(),
        ]
    );

    let binary = workspace.worker_dir().join("hello_world_differential");
    assert_eq!(
        recorded_args(&binary, SimulatorKind::UnderTest),
        [
            "--mem-base".to_string(),
            "8192".to_string(),
            "--mem-size".to_string(),
            "33546240".to_string(),
            binary.display().to_string(),
        ]
    );
    assert_eq!(report.get("hello_world/differential").unwrap().commands.len(), 3);
}

#[test]
fn test_under_test_divergence_is_reported() {
    let workspace = Workspace::new();
    hello_world(&workspace);
    workspace.sidecar("hello_world", "under-test.stdout", "Hello wrld!\n");

    let report = workspace.run();
    assert_eq!(kind_of(&report, "hello_world/oracle"), OutcomeKind::Passed);
    assert_eq!(kind_of(&report, "hello_world/under-test"), OutcomeKind::Mismatch);
    assert_eq!(kind_of(&report, "hello_world/differential"), OutcomeKind::Mismatch);

    let diagnostic = report
        .get("hello_world/differential")
        .and_then(|outcome| outcome.diagnostic.clone())
        .unwrap();
    assert!(diagnostic.contains("line 1"));
    assert!(diagnostic.contains("Hello wrld!"));
    assert!(diagnostic.contains("under-test: loaded"));

    let literal = report
        .get("hello_world/under-test")
        .and_then(|outcome| outcome.diagnostic.clone())
        .unwrap();
    assert!(literal.contains("stderr (under-test):\nunder-test: loaded"));
    assert!(!literal.contains("stderr (oracle)"));
}

#[test]
fn test_failure_diagnostic_keeps_stderr_of_both_runs() {
    let workspace = Workspace::new();
    let _ = workspace.add_program("trap", "ok\n");
    workspace.sidecar("trap", "under-test.exit", "3");

    let report = workspace.run();
    let outcome = report.get("trap/differential").unwrap();
    assert_eq!(outcome.kind, OutcomeKind::ExitStatusMismatch);
    let diagnostic = outcome.diagnostic.as_deref().unwrap();
    assert!(diagnostic.contains("stderr (oracle):\noracle: loaded"));
    assert!(diagnostic.contains("stderr (under-test):\nunder-test: loaded"));
}

#[test]
fn test_exit_status_policy() {
    let mut workspace = Workspace::new();
    let _ = workspace.add_program("exits", "same\n");
    workspace.sidecar("exits", "under-test.exit", "1");

    let strict = workspace.run();
    assert_eq!(kind_of(&strict, "exits/differential"), OutcomeKind::ExitStatusMismatch);
    assert!(!strict.all_passed());

    workspace.config.comparison.exit_status = ExitStatusPolicy::Warn;
    let warn = workspace.run();
    let outcome = warn.get("exits/differential").unwrap();
    assert!(outcome.passed);
    assert_eq!(outcome.kind, OutcomeKind::Passed);
    assert!(outcome.diagnostic.as_deref().unwrap_or("").starts_with("warning:"));
}

#[test]
fn test_timeout_is_isolated_to_one_case() {
    let mut workspace = Workspace::new();
    workspace.config.limits.simulate_timeout_ms = 300;
    let _ = workspace.add_program("hangs", "");
    workspace.sidecar("hangs", "under-test.hang", "");
    let _ = workspace.add_program("works", "ok\n");

    let report = workspace.run();
    let timeouts: Vec<&str> = report
        .outcomes()
        .iter()
        .filter(|outcome| outcome.kind == OutcomeKind::Timeout)
        .map(|outcome| outcome.name.as_str())
        .collect();
    assert_eq!(timeouts, ["hangs/differential"]);
    assert_eq!(
        report.get("hangs/differential").unwrap().stage,
        Stage::ExecutionFailedTimeout
    );
    assert_eq!(kind_of(&report, "works/differential"), OutcomeKind::Passed);
}

#[test]
fn test_compiler_timeout_is_a_timeout_outcome() {
    let mut workspace = Workspace::new();
    workspace.config.limits.compile_timeout_ms = 200;
    let _ = workspace.add_program("slow", "");
    workspace.sidecar("slow", "compile-hang", "");
    let _ = workspace.add_program("quick", "fine\n");

    let report = workspace.run();
    let outcome = report.get("slow/differential").unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Timeout);
    assert_eq!(outcome.stage, Stage::CompileFailed);
    assert!(!outcome.passed);
    assert!(
        outcome
            .diagnostic
            .as_deref()
            .unwrap_or("")
            .contains("compiler did not finish")
    );
    assert!(outcome.elapsed < Duration::from_secs(5));
    assert_eq!(kind_of(&report, "quick/differential"), OutcomeKind::Passed);
}

#[test]
fn test_compile_failure_skips_simulators() {
    let workspace = Workspace::new();
    hello_world(&workspace);
    workspace.sidecar("hello_world", "compile-error", "undefined reference to `print'\n");

    let report = workspace.run();
    for outcome in report.outcomes() {
        assert_eq!(outcome.kind, OutcomeKind::CompileFailed);
        assert_eq!(outcome.stage, Stage::CompileFailed);
        assert!(outcome.diagnostic.as_deref().unwrap_or("").contains("undefined reference"));
        assert_eq!(outcome.commands.len(), 1);
    }
    let binary = workspace.worker_dir().join("hello_world_differential");
    let mut oracle_args = binary.as_os_str().to_owned();
    oracle_args.push(".oracle.args");
    assert!(!Path::new(&oracle_args).exists());
}

#[test]
fn test_image_outside_layout_is_not_simulated() {
    let workspace = Workspace::new();
    let _ = workspace.add_program_with("high", TestElf::at(0x8000_0000));

    let report = workspace.run();
    let outcome = report.get("high/differential").unwrap();
    assert_eq!(outcome.kind, OutcomeKind::LayoutMismatch);
    assert_eq!(outcome.stage, Stage::Failed);
    assert_eq!(outcome.commands.len(), 1);
}

#[test]
fn test_undecodable_output() {
    let workspace = Workspace::new();
    let _ = workspace.add_program("binary_out", "");
    workspace.sidecar("binary_out", "stdout", b"\x80\x81");

    let report = workspace.run();
    assert_eq!(kind_of(&report, "binary_out/differential"), OutcomeKind::DecodeError);
}

#[test]
fn test_repeat_detects_nondeterminism() {
    let mut workspace = Workspace::new();
    workspace.config.comparison.repeat = 2;
    let _ = workspace.add_program("flaky", "");
    workspace.sidecar("flaky", "under-test.flaky", "");
    let _ = workspace.add_program("steady", "same every time\n");

    let report = workspace.run();
    assert_eq!(kind_of(&report, "flaky/differential"), OutcomeKind::Nondeterministic);
    assert_eq!(kind_of(&report, "steady/differential"), OutcomeKind::Passed);
}

#[test]
fn test_parallel_run_keeps_catalog_order() {
    let workspace = Workspace::new();
    for name in ["delta", "alpha", "charlie", "bravo"] {
        let _ = workspace.add_program(name, &format!("{name}\n"));
        workspace.sidecar(name, "expected", format!("{name}\n"));
    }

    let options = RunOptions {
        filter: Some("^(alpha|bravo|charlie|delta)/".to_string()),
        jobs: NonZeroUsize::new(3).unwrap(),
    };
    let report = workspace.run_with(&options);

    assert!(report.all_passed(), "{}", report.render(true));
    let names: Vec<&str> = report.outcomes().iter().map(|o| o.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
    assert_eq!(names.len(), 12);
    for worker in 0..3 {
        assert!(workspace.config.paths.scratch_dir.join(format!("worker-{worker}")).is_dir());
    }
}

#[test]
fn test_filter_selects_cases() {
    let workspace = Workspace::new();
    hello_world(&workspace);
    let options = RunOptions {
        filter: Some("/under-test$".to_string()),
        ..RunOptions::default()
    };
    let report = workspace.run_with(&options);
    assert_eq!(report.outcomes().len(), 1);
    assert_eq!(report.outcomes()[0].name, "hello_world/under-test");
}

#[test]
fn test_json_report_file() {
    let workspace = Workspace::new();
    hello_world(&workspace);
    let report = workspace.run();
    let path = workspace.root().join("report.json");
    report.write_json(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["passed"], 3);
    assert_eq!(value["failed"], 0);
    assert_eq!(value["outcomes"][0]["name"], "hello_world/differential");
}

#[test]
fn test_setup_failure_stops_before_any_case() {
    let mut workspace = Workspace::new();
    hello_world(&workspace);
    workspace.config.simulators.under_test = workspace.root().join("missing-rvsim");

    let err = catalog::run(&workspace.config, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, SetupError::MissingPaths(ref missing) if missing.len() == 1));
    assert!(!workspace.worker_dir().exists());
}
