use crate::error::SpawnCause;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Interpreter for inline scripts; supports `$VAR`, pipelines and `&&`.
pub const SHELL: &str = "/bin/sh";

/// What the caller asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    FilePath(PathBuf),
}

impl ScriptSource {
    /// Decide once whether `script` names an existing file (relative to
    /// `working_dir`) or is inline shell text.
    pub fn detect(script: &str, working_dir: &Path) -> Self {
        let candidate = working_dir.join(script);
        if !script.is_empty() && candidate.is_file() {
            ScriptSource::FilePath(PathBuf::from(script))
        } else {
            ScriptSource::Inline(script.to_string())
        }
    }
}

/// Program and arguments ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

pub fn materialize(source: &ScriptSource, working_dir: &Path) -> Result<Materialized, SpawnCause> {
    if !working_dir.is_dir() {
        return Err(SpawnCause::MissingWorkingDir {
            path: working_dir.to_path_buf(),
        });
    }

    match source {
        ScriptSource::Inline(text) => Ok(Materialized {
            program: PathBuf::from(SHELL),
            args: vec![OsString::from("-c"), OsString::from(text)],
        }),
        ScriptSource::FilePath(path) => {
            let resolved = working_dir.join(path);
            let metadata = fs::metadata(&resolved).map_err(|_| SpawnCause::NotFound {
                path: resolved.clone(),
            })?;
            if !metadata.is_file() || !is_executable(&metadata) {
                return Err(SpawnCause::NotExecutable { path: resolved });
            }
            // The child starts in `working_dir`; a relative program path would be resolved twice.
            let program = if resolved.is_relative() {
                std::env::current_dir()
                    .map(|cwd| cwd.join(&resolved))
                    .unwrap_or(resolved)
            } else {
                resolved
            };
            Ok(Materialized {
                program,
                args: Vec::new(),
            })
        }
    }
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    true
}
