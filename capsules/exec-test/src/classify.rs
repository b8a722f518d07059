use crate::engine::RawOutcome;
use crate::error::{EvaluationError, SpawnCause};
use crate::reference::ImageReference;
use serde::{Deserialize, Serialize};

/// Typed result of one test run. Exactly one variant per request; output is
/// only kept when the script ran to completion.
#[derive(Debug)]
pub enum ExecOutcome {
    Success {
        output: String,
    },
    ScriptFailure {
        /// `-1` when the script was killed by a signal.
        exit_code: i32,
        signal: Option<i32>,
        output: String,
    },
    Timeout {
        timeout_seconds: u64,
    },
    SpawnFailure {
        cause: SpawnCause,
    },
}

/// Response fields handed back to the caller of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub digest: String,
    pub id: String,
    pub exit_code: i32,
    pub output: String,
}

impl ExecResponse {
    pub fn new(reference: &ImageReference, exit_code: i32, output: String) -> Self {
        let digest = reference.to_string();
        Self {
            id: digest.clone(),
            digest,
            exit_code,
            output,
        }
    }
}

pub fn classify(raw: RawOutcome) -> ExecOutcome {
    match raw {
        RawOutcome::SpawnFailed(cause) => ExecOutcome::SpawnFailure { cause },
        RawOutcome::TimedOut { timeout_seconds } => ExecOutcome::Timeout { timeout_seconds },
        RawOutcome::Exited { status, output } => {
            let output = String::from_utf8_lossy(&output).into_owned();
            match status.code() {
                Some(0) => ExecOutcome::Success { output },
                Some(exit_code) => ExecOutcome::ScriptFailure {
                    exit_code,
                    signal: None,
                    output,
                },
                None => ExecOutcome::ScriptFailure {
                    exit_code: -1,
                    signal: termination_signal(&status),
                    output,
                },
            }
        }
    }
}

#[cfg(unix)]
fn termination_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Lowercase description of a signal as consumers see it in failure messages.
#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "hangup",
        libc::SIGINT => "interrupt",
        libc::SIGQUIT => "quit",
        libc::SIGILL => "illegal instruction",
        libc::SIGTRAP => "trace/breakpoint trap",
        libc::SIGABRT => "aborted",
        libc::SIGBUS => "bus error",
        libc::SIGFPE => "floating point exception",
        libc::SIGKILL => "killed",
        libc::SIGUSR1 => "user defined signal 1",
        libc::SIGSEGV => "segmentation fault",
        libc::SIGUSR2 => "user defined signal 2",
        libc::SIGPIPE => "broken pipe",
        libc::SIGALRM => "alarm clock",
        libc::SIGTERM => "terminated",
        other => return format!("signal {}", other),
    };
    name.to_string()
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    format!("signal {}", signal)
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecOutcome::Success { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecOutcome::Success { .. } => Some(0),
            ExecOutcome::ScriptFailure { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            ExecOutcome::Success { output } | ExecOutcome::ScriptFailure { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    /// Turn the outcome into the caller-facing response, or into the error
    /// whose message consumers match on.
    pub fn into_result(self, reference: &ImageReference) -> Result<ExecResponse, EvaluationError> {
        match self {
            ExecOutcome::Success { output } => Ok(ExecResponse::new(reference, 0, output)),
            ExecOutcome::ScriptFailure {
                exit_code,
                signal,
                output,
            } => Err(EvaluationError::ScriptFailed {
                reference: reference.to_string(),
                status: match signal {
                    Some(signal) => format!("signal: {}", signal_name(signal)),
                    None => format!("exit status {}", exit_code),
                },
                exit_code,
                output,
            }),
            ExecOutcome::Timeout { timeout_seconds } => Err(EvaluationError::TimedOut {
                reference: reference.to_string(),
                timeout_seconds,
            }),
            ExecOutcome::SpawnFailure { cause } => Err(EvaluationError::SpawnFailed {
                reference: reference.to_string(),
                cause,
            }),
        }
    }
}
