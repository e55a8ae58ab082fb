//! # Simulator Runner Tests
//!
//! Runs the fake simulators directly, outside the catalog.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pretty_assertions::assert_eq;
use rvsim_difftest::common::{ExitState, MemoryLayout, MemoryRegion, RunError};
use rvsim_difftest::sim::{SimulatorKind, SimulatorRunner, TextEncoding};
use tempfile::TempDir;

use crate::common::harness::Workspace;

const TIMEOUT: Duration = Duration::from_secs(5);

/// A stand-in image plus the sidecars the fake simulators read.
struct Image {
    _dir: TempDir,
    path: PathBuf,
}

impl Image {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog");
        fs::write(&path, b"image").unwrap();
        Self { _dir: dir, path }
    }

    fn sidecar(&self, suffix: &str, contents: impl AsRef<[u8]>) -> &Self {
        let mut path = self.path.as_os_str().to_owned();
        path.push(format!(".{suffix}"));
        fs::write(path, contents).unwrap();
        self
    }

    fn recorded_args(&self, kind: SimulatorKind) -> Vec<String> {
        let mut path = self.path.as_os_str().to_owned();
        path.push(format!(".{kind}.args"));
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[test]
fn test_oracle_run_is_captured_and_decoded() {
    let workspace = Workspace::new();
    let image = Image::new();
    let _ = image.sidecar("stdout", "Hello world!\n");
    let runner = SimulatorRunner::new(&workspace.config);

    let result = runner
        .run(image.path(), SimulatorKind::Oracle, &MemoryLayout::default(), TIMEOUT)
        .unwrap();

    assert_eq!(result.target(), SimulatorKind::Oracle);
    assert_eq!(result.status(), ExitState::Exited(0));
    assert_eq!(result.stdout_text(), Ok("Hello world!\n"));
    assert!(result.stderr_lossy().contains("oracle: loaded"));
    assert!(result.command().contains("-m0x2000:0xffe000,0x1000000:0x1000000"));
    assert_eq!(
        image.recorded_args(SimulatorKind::Oracle),
        [
            "--isa=RV32IM".to_string(),
            "-m0x2000:0xffe000,0x1000000:0x1000000".to_string(),
            image.path().display().to_string(),
        ]
    );
}

#[test]
fn test_under_test_receives_decimal_memory_flags() {
    let workspace = Workspace::new();
    let image = Image::new();
    let layout = MemoryLayout::single(0x2000, 0x8000_0000 - 0x2000).unwrap();
    let runner = SimulatorRunner::new(&workspace.config);

    let _result = runner
        .run(image.path(), SimulatorKind::UnderTest, &layout, TIMEOUT)
        .unwrap();

    assert_eq!(
        image.recorded_args(SimulatorKind::UnderTest),
        [
            "--mem-base".to_string(),
            "8192".to_string(),
            "--mem-size".to_string(),
            "2147475456".to_string(),
            image.path().display().to_string(),
        ]
    );
}

#[test]
fn test_nonzero_exit_is_data() {
    let workspace = Workspace::new();
    let image = Image::new();
    let _ = image.sidecar("under-test.exit", "7").sidecar("stdout", "partial");
    let runner = SimulatorRunner::new(&workspace.config);

    let result = runner
        .run(image.path(), SimulatorKind::UnderTest, &MemoryLayout::default(), TIMEOUT)
        .unwrap();
    assert_eq!(result.status(), ExitState::Exited(7));
    assert_eq!(result.stdout(), b"partial");
}

#[test]
fn test_non_ascii_output_is_marked() {
    let mut workspace = Workspace::new();
    let image = Image::new();
    let _ = image.sidecar("stdout", b"caf\xC3\xA9\n");

    let ascii = SimulatorRunner::new(&workspace.config)
        .run(image.path(), SimulatorKind::Oracle, &MemoryLayout::default(), TIMEOUT)
        .unwrap();
    let err = ascii.stdout_text().unwrap_err();
    assert_eq!(err.encoding, TextEncoding::Ascii);
    assert_eq!(err.offset, 3);

    workspace.config.comparison.encoding = TextEncoding::Utf8;
    let utf8 = SimulatorRunner::new(&workspace.config)
        .run(image.path(), SimulatorKind::Oracle, &MemoryLayout::default(), TIMEOUT)
        .unwrap();
    assert_eq!(utf8.stdout_text(), Ok("caf\u{e9}\n"));
}

#[test]
fn test_hung_simulator_is_killed() {
    let workspace = Workspace::new();
    let image = Image::new();
    let _ = image.sidecar("under-test.hang", "");
    let runner = SimulatorRunner::new(&workspace.config);

    let result = runner
        .run(
            image.path(),
            SimulatorKind::UnderTest,
            &MemoryLayout::default(),
            Duration::from_millis(200),
        )
        .unwrap();
    assert!(result.timed_out());
    assert_eq!(result.status(), ExitState::TimedOut);
    assert!(result.elapsed() < Duration::from_secs(30));
}

#[test]
fn test_missing_simulator_is_run_error() {
    let mut workspace = Workspace::new();
    workspace.config.simulators.oracle = workspace.root().join("no-such-spike");
    let image = Image::new();

    let err = SimulatorRunner::new(&workspace.config)
        .run(image.path(), SimulatorKind::Oracle, &MemoryLayout::default(), TIMEOUT)
        .unwrap_err();
    assert!(matches!(
        err,
        RunError::Spawn {
            target: SimulatorKind::Oracle,
            ..
        }
    ));
}

#[test]
fn test_layout_with_hole_is_not_widened() {
    let workspace = Workspace::new();
    let image = Image::new();
    let layout = MemoryLayout::new(vec![
        MemoryRegion::new(0x2000, 0x1000).unwrap(),
        MemoryRegion::new(0x10_0000, 0x1000).unwrap(),
    ])
    .unwrap();

    let runner = SimulatorRunner::new(&workspace.config);
    let err = runner
        .run(image.path(), SimulatorKind::UnderTest, &layout, TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, RunError::Layout(_)));

    let oracle = runner
        .run(image.path(), SimulatorKind::Oracle, &layout, TIMEOUT)
        .unwrap();
    assert!(oracle.command().contains("-m0x2000:0x1000,0x100000:0x1000"));
}
