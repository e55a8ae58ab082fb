//! Bounded subprocess execution.
//!
//! Every external tool the harness touches (compiler, oracle, simulator under test)
//! is run through [`CommandLine::run`]. It performs:
//! 1. **Capture:** stdout and stderr are drained on helper threads so a chatty child
//!    never blocks on a full pipe.
//! 2. **Timeout:** the child is polled until its deadline, then its whole process
//!    group is killed and the child reaped.
//! 3. **Exit classification:** normal exit, death by signal, or timeout.
//!
//! On Unix each child leads its own process group, so helpers it forks (the
//! compiler driver's `cc1`, `as` and `ld`, or a simulator behind a wrapper script)
//! are killed with it and cannot hold the output pipes open.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long the output pipes may stay open after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// How a child process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitState {
    /// The process exited with this status code.
    Exited(i32),
    /// The process was terminated by this signal.
    Signaled(i32),
    /// The process exceeded its time bound and was killed by the harness.
    TimedOut,
}

impl ExitState {
    /// Returns true for a zero exit code.
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Returns the exit code, if the process exited normally.
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            Self::Signaled(_) | Self::TimedOut => None,
        }
    }
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::Exited(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self::Signaled(signal);
            }
        }
        Self::Exited(-1)
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "signal {signal}"),
            Self::TimedOut => f.write_str("timeout"),
        }
    }
}

/// Everything a finished child left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
    /// How the child finished.
    pub status: ExitState,
    /// Wall time from spawn to reap.
    pub elapsed: Duration,
}

/// A program and its arguments, kept as OS strings so paths pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandLine {
    /// Starts a command line for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn push(&mut self, arg: impl Into<OsString>) {
        self.args.push(arg.into());
    }

    /// Appends several arguments in order.
    pub fn extend<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
    }

    /// The executable to run.
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The arguments, excluding the program.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// The arguments as lossily converted strings, for assertions and diagnostics.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Runs the command to completion or until `timeout` elapses.
    ///
    /// Standard input is closed. A nonzero exit is not an error; it is reported
    /// in [`Captured::status`]. On timeout the child is killed and reaped before
    /// returning [`ExitState::TimedOut`] with whatever output it produced.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Upper bound on the child's wall time.
    ///
    /// # Returns
    ///
    /// The captured output, or the I/O error that prevented spawning or waiting.
    pub fn run(&self, timeout: Duration) -> io::Result<Captured> {
        debug!(command = %self, timeout_ms = timeout.as_millis(), "spawning");
        let started = Instant::now();
        let mut child = own_process_group(
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped()),
        )
        .spawn()?;

        let stdout = child.stdout.take().map(|pipe| drain(pipe, "stdout"));
        let stderr = child.stderr.take().map(|pipe| drain(pipe, "stderr"));

        let status = match wait_with_timeout(&mut child, timeout) {
            Ok(status) => status,
            Err(err) => {
                kill_group(&child);
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        let grace = Instant::now() + DRAIN_GRACE;
        let (stdout, stdout_closed) = collect(stdout, grace);
        let (stderr, stderr_closed) = collect(stderr, grace);
        if !(stdout_closed && stderr_closed) {
            debug!(
                program = %self.program.display(),
                "output pipes still open after exit, killing leftover processes"
            );
            kill_group(&child);
        }

        let captured = Captured {
            stdout,
            stderr,
            status,
            elapsed: started.elapsed(),
        };
        debug!(
            program = %self.program.display(),
            status = %captured.status,
            stdout_bytes = captured.stdout.len(),
            stderr_bytes = captured.stderr.len(),
            "finished"
        );
        Ok(captured)
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Quotes an argument for display if it would not survive a shell unchanged.
fn quote(arg: &OsStr) -> String {
    let text = arg.to_string_lossy();
    if !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_=+,.:/@%".contains(c))
    {
        text.into_owned()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

/// Output read from one pipe by a helper thread.
struct Drain {
    buffer: Arc<Mutex<Vec<u8>>>,
    closed: Receiver<()>,
}

fn drain<R: Read + Send + 'static>(mut reader: R, stream: &'static str) -> Drain {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let (closed_tx, closed) = mpsc::channel();
    let sink = Arc::clone(&buffer);
    let _reader = thread::spawn(move || {
        let mut chunk = [0_u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => {
                    if let (Ok(mut buf), Some(bytes)) = (sink.lock(), chunk.get(..read)) {
                        buf.extend_from_slice(bytes);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    warn!(stream, %err, "pipe read failed, captured output is truncated");
                    break;
                }
            }
        }
        let _ = closed_tx.send(());
    });
    Drain { buffer, closed }
}

/// Waits until the pipe closes or `deadline` passes, then takes what was read.
///
/// The flag is false if the pipe was still open at the deadline.
fn collect(drain: Option<Drain>, deadline: Instant) -> (Vec<u8>, bool) {
    let Some(drain) = drain else {
        return (Vec::new(), true);
    };
    let closed = drain
        .closed
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .is_ok();
    let bytes = drain
        .buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default();
    (bytes, closed)
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) -> &mut Command {
    use std::os::unix::process::CommandExt;
    command.process_group(0)
}

#[cfg(not(unix))]
fn own_process_group(command: &mut Command) -> &mut Command {
    command
}

/// Sends `SIGKILL` to every process in the child's group.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(child: &Child) {
    let Ok(group) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg takes no pointers; the group id is the child's pid because
    // the child was spawned with process_group(0).
    let rc = unsafe { libc::killpg(group, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(group, %err, "could not kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<ExitState> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(ExitState::from(status));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!(pid = child.id(), "deadline reached, killing process group");
            kill_group(child);
            // The child may exit between the poll and the kill; reaping covers both.
            let _ = child.kill();
            let _status = child.wait()?;
            return Ok(ExitState::TimedOut);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
