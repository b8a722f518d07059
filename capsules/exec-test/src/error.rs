use crate::resolver::ResolveError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a test command never ran to completion on its own terms.
#[derive(Debug, Error)]
pub enum SpawnCause {
    #[error("script {} does not exist", path.display())]
    NotFound { path: PathBuf },
    #[error("script {} is not executable", path.display())]
    NotExecutable { path: PathBuf },
    #[error("working directory {} does not exist", path.display())]
    MissingWorkingDir { path: PathBuf },
    #[error("failed to reserve a free port: {source}")]
    PortUnavailable { source: io::Error },
    #[error("failed to prepare output capture: {source}")]
    Capture { source: io::Error },
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("failed to wait for {program}: {source}")]
    Wait { program: String, source: io::Error },
}

impl SpawnCause {
    /// Map an error from `Command::spawn` onto the closest cause.
    pub(crate) fn from_spawn(program: &std::path::Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => SpawnCause::NotFound {
                path: program.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => SpawnCause::NotExecutable {
                path: program.to_path_buf(),
            },
            _ => SpawnCause::Spawn {
                program: program.display().to_string(),
                source,
            },
        }
    }
}

/// Terminal error of one evaluation. The `Display` output of the script and
/// timeout variants is matched by consumers and must not change shape.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Test failed for ref\n{reference},\ngot error: {status}\n{output}")]
    ScriptFailed {
        reference: String,
        status: String,
        exit_code: i32,
        output: String,
    },
    #[error("Test for ref\n{reference}\ntimed out after {timeout_seconds} seconds")]
    TimedOut {
        reference: String,
        timeout_seconds: u64,
    },
    #[error("Test could not start for ref\n{reference}:\n{cause}")]
    SpawnFailed {
        reference: String,
        #[source]
        cause: SpawnCause,
    },
}

impl EvaluationError {
    /// Exit code of the script, when it ran far enough to produce one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            EvaluationError::ScriptFailed { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}
