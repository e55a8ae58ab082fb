//! # Comparison Tests
//!
//! Literal and oracle references, exit-status policy, and decode failures.

use std::time::Duration;

use rstest::rstest;
use rvsim_difftest::common::{Captured, CommandLine, ExitState};
use rvsim_difftest::compare::{ComparisonOutcome, ExitStatusPolicy, Reference, compare};
use rvsim_difftest::sim::{ExecutionResult, SimulatorKind, TextEncoding};

fn result(target: SimulatorKind, stdout: &[u8], status: ExitState) -> ExecutionResult {
    ExecutionResult::from_capture(
        target,
        &CommandLine::new(target.name()),
        Captured {
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
            status,
            elapsed: Duration::from_millis(1),
        },
        TextEncoding::Ascii,
    )
}

fn under_test(stdout: &[u8]) -> ExecutionResult {
    result(SimulatorKind::UnderTest, stdout, ExitState::Exited(0))
}

fn oracle(stdout: &[u8]) -> ExecutionResult {
    result(SimulatorKind::Oracle, stdout, ExitState::Exited(0))
}

#[rstest]
#[case::exact(b"Hello world!\n", "Hello world!\n", true)]
#[case::both_empty(b"", "", true)]
#[case::missing_newline(b"Hello world!", "Hello world!\n", false)]
#[case::silent_subject(b"", "Hello world!\n", false)]
#[case::extra_output(b"Hello world!\nbye\n", "Hello world!\n", false)]
fn test_literal_reference(#[case] stdout: &[u8], #[case] expected: &str, #[case] passes: bool) {
    let outcome = compare(
        &under_test(stdout),
        Reference::Literal(expected),
        ExitStatusPolicy::Strict,
    );
    assert_eq!(outcome.passed(), passes);
    assert_eq!(outcome == ComparisonOutcome::Match, passes);
}

#[test]
fn test_literal_ignores_exit_status() {
    let crashed = result(SimulatorKind::UnderTest, b"ok\n", ExitState::Exited(3));
    let outcome = compare(&crashed, Reference::Literal("ok\n"), ExitStatusPolicy::Strict);
    assert_eq!(outcome, ComparisonOutcome::Match);
}

#[test]
fn test_mismatch_carries_both_texts() {
    let reference = oracle(b"a\nb\n");
    let outcome = compare(
        &under_test(b"a\nc\n"),
        Reference::Oracle(&reference),
        ExitStatusPolicy::Strict,
    );
    assert_eq!(
        outcome,
        ComparisonOutcome::Mismatch {
            expected: "a\nb\n".to_string(),
            actual: "a\nc\n".to_string(),
        }
    );
    let description = outcome.describe().unwrap();
    assert!(description.contains("line 2"));
}

#[rstest]
#[case::strict(ExitStatusPolicy::Strict, false)]
#[case::warn(ExitStatusPolicy::Warn, true)]
fn test_exit_status_divergence(#[case] policy: ExitStatusPolicy, #[case] passes: bool) {
    let reference = oracle(b"done\n");
    let subject = result(SimulatorKind::UnderTest, b"done\n", ExitState::Exited(1));
    let outcome = compare(&subject, Reference::Oracle(&reference), policy);

    assert_eq!(
        outcome,
        ComparisonOutcome::ExitStatusMismatch {
            expected: ExitState::Exited(0),
            actual: ExitState::Exited(1),
            fatal: !passes,
        }
    );
    assert_eq!(outcome.passed(), passes);
    assert!(outcome.describe().is_some());
}

#[test]
fn test_stdout_mismatch_takes_precedence_over_exit_status() {
    let reference = oracle(b"x\n");
    let subject = result(SimulatorKind::UnderTest, b"y\n", ExitState::Signaled(11));
    let outcome = compare(&subject, Reference::Oracle(&reference), ExitStatusPolicy::Warn);
    assert!(matches!(outcome, ComparisonOutcome::Mismatch { .. }));
}

#[test]
fn test_undecodable_side_is_named() {
    let garbled = b"\xFF\xFE";
    let outcome = compare(
        &under_test(b"fine\n"),
        Reference::Oracle(&oracle(garbled)),
        ExitStatusPolicy::Strict,
    );
    assert!(matches!(
        outcome,
        ComparisonOutcome::Undecodable {
            target: SimulatorKind::Oracle,
            ..
        }
    ));
    assert!(!outcome.passed());

    let outcome = compare(
        &under_test(garbled),
        Reference::Literal("fine\n"),
        ExitStatusPolicy::Strict,
    );
    assert!(matches!(
        outcome,
        ComparisonOutcome::Undecodable {
            target: SimulatorKind::UnderTest,
            ..
        }
    ));
}

#[test]
fn test_identical_runs_match() {
    let reference = oracle(b"same\n");
    let outcome = compare(
        &under_test(b"same\n"),
        Reference::Oracle(&reference),
        ExitStatusPolicy::Strict,
    );
    assert_eq!(outcome, ComparisonOutcome::Match);
    assert_eq!(outcome.describe(), None);
}
