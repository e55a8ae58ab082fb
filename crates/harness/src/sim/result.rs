//! Captured execution results.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SimulatorKind;
use crate::common::{Captured, CommandLine, DecodeError, ExitState};

/// Text encoding simulator stdout is decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// 7-bit ASCII; any byte above 0x7F is a decode error.
    #[default]
    Ascii,
    /// UTF-8.
    Utf8,
}

impl TextEncoding {
    /// Decodes `bytes` strictly, reporting the first invalid byte.
    pub fn decode(self, bytes: &[u8]) -> Result<String, DecodeError> {
        let invalid_at = match self {
            Self::Ascii => bytes.iter().position(|byte| !byte.is_ascii()),
            Self::Utf8 => std::str::from_utf8(bytes).err().map(|err| err.valid_up_to()),
        };
        match invalid_at {
            Some(offset) => Err(DecodeError {
                encoding: self,
                offset,
                byte: bytes.get(offset).copied().unwrap_or_default(),
            }),
            None => Ok(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ascii => "ASCII",
            Self::Utf8 => "UTF-8",
        })
    }
}

/// The observable behavior of one simulator run.
///
/// Immutable once built. A nonzero exit or a timeout is recorded here, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    target: SimulatorKind,
    command: String,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: ExitState,
    text: Result<String, DecodeError>,
    elapsed: Duration,
}

impl ExecutionResult {
    /// Builds a result from a finished process, decoding stdout with `encoding`.
    ///
    /// # Arguments
    ///
    /// * `target` - Which simulator produced the output.
    /// * `command` - The exact invocation, kept for diagnostics.
    /// * `captured` - Raw output and exit state of the process.
    /// * `encoding` - Encoding stdout is expected to be in.
    pub fn from_capture(
        target: SimulatorKind,
        command: &CommandLine,
        captured: Captured,
        encoding: TextEncoding,
    ) -> Self {
        let text = encoding.decode(&captured.stdout);
        Self {
            target,
            command: command.to_string(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            status: captured.status,
            text,
            elapsed: captured.elapsed,
        }
    }

    /// Which simulator produced this result.
    pub const fn target(&self) -> SimulatorKind {
        self.target
    }

    /// The invocation as displayed in logs.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Raw standard output.
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Raw standard error.
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Standard error with invalid bytes replaced, for diagnostics.
    pub fn stderr_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// How the simulator finished.
    pub const fn status(&self) -> ExitState {
        self.status
    }

    /// Returns true if the harness had to kill the simulator.
    pub const fn timed_out(&self) -> bool {
        matches!(self.status, ExitState::TimedOut)
    }

    /// Decoded stdout, or the decode-error marker.
    pub fn stdout_text(&self) -> Result<&str, &DecodeError> {
        self.text.as_deref()
    }

    /// Wall time of the run.
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Returns true if two runs are observably identical: same stdout, stderr, and exit state.
    pub fn same_behavior(&self, other: &Self) -> bool {
        self.stdout == other.stdout && self.stderr == other.stderr && self.status == other.status
    }
}
