//! # Process Tests
//!
//! Output capture, exit classification, and timeouts of [`CommandLine::run`].

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rvsim_difftest::common::{CommandLine, ExitState};

fn shell(script: &str) -> CommandLine {
    let mut command = CommandLine::new("sh");
    command.extend(["-c", script]);
    command
}

const GENEROUS: Duration = Duration::from_secs(30);

#[test]
fn test_captures_both_streams_and_exit_code() {
    let captured = shell("printf out; printf err >&2; exit 3")
        .run(GENEROUS)
        .unwrap();
    assert_eq!(captured.stdout, b"out");
    assert_eq!(captured.stderr, b"err");
    assert_eq!(captured.status, ExitState::Exited(3));
}

#[test]
fn test_stdin_is_closed() {
    let captured = shell("cat; echo done").run(GENEROUS).unwrap();
    assert_eq!(captured.stdout, b"done\n");
    assert!(captured.status.success());
}

#[test]
fn test_large_output_does_not_block() {
    let captured = shell("head -c 1000000 /dev/zero; head -c 300000 /dev/zero >&2")
        .run(GENEROUS)
        .unwrap();
    assert_eq!(captured.stdout.len(), 1_000_000);
    assert_eq!(captured.stderr.len(), 300_000);
}

#[test]
fn test_timeout_kills_child() {
    let captured = shell("exec sleep 30").run(Duration::from_millis(100)).unwrap();
    assert_eq!(captured.status, ExitState::TimedOut);
    assert!(captured.elapsed < Duration::from_secs(10));
}

#[test]
fn test_timeout_kills_forked_helpers() {
    let captured = shell("sleep 8; echo done")
        .run(Duration::from_millis(200))
        .unwrap();
    assert_eq!(captured.status, ExitState::TimedOut);
    assert!(
        captured.elapsed < Duration::from_secs(3),
        "run blocked for {:?} after a 200ms timeout",
        captured.elapsed
    );
    assert!(captured.stdout.is_empty());
}

#[test]
fn test_background_helper_does_not_hold_output_open() {
    let started = Instant::now();
    let captured = shell("sleep 8 & echo hi").run(GENEROUS).unwrap();
    assert_eq!(captured.stdout, b"hi\n");
    assert!(captured.status.success());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(target_os = "linux")]
#[test]
fn test_timeout_leaves_no_orphan() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
    let captured = shell(&script).run(Duration::from_millis(300)).unwrap();
    assert_eq!(captured.status, ExitState::TimedOut);

    let pid = fs::read_to_string(&pid_file).unwrap().trim().to_string();
    let stat = Path::new("/proc").join(pid).join("stat");
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let gone = match fs::read_to_string(&stat) {
            Ok(stat) => stat.contains(") Z "),
            Err(_) => true,
        };
        if gone {
            break;
        }
        assert!(Instant::now() < deadline, "helper process outlived the timeout");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_signal_is_reported() {
    let captured = shell("kill -9 $$").run(GENEROUS).unwrap();
    assert_eq!(captured.status, ExitState::Signaled(9));
    assert_eq!(captured.status.code(), None);
}

#[test]
fn test_missing_program_is_an_error() {
    let command = CommandLine::new("/nonexistent/definitely-not-a-simulator");
    assert!(command.run(GENEROUS).is_err());
}

#[test]
fn test_args_are_kept_in_order() {
    let mut command = CommandLine::new("spike");
    command.push("--isa=RV32IM");
    command.extend(["-m0x2000:0x1000", "prog.elf"]);
    assert_eq!(
        command.args_lossy(),
        ["--isa=RV32IM", "-m0x2000:0x1000", "prog.elf"]
    );
    assert_eq!(command.to_string(), "spike --isa=RV32IM -m0x2000:0x1000 prog.elf");
}
