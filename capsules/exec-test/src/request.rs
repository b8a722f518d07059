use crate::environment::EnvVar;
use crate::reference::ImageReference;
use crate::script::ScriptSource;
use crate::timeout::effective_timeout_seconds;
use std::path::{Path, PathBuf};

/// One fully resolved test run. Built fresh per evaluation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    reference: ImageReference,
    script: ScriptSource,
    env: Vec<EnvVar>,
    working_dir: PathBuf,
    timeout_seconds: Option<u64>,
    default_timeout_seconds: u64,
}

impl ExecRequest {
    pub fn builder(reference: ImageReference, script: ScriptSource) -> ExecRequestBuilder {
        ExecRequestBuilder {
            reference,
            script,
            env: Vec::new(),
            working_dir: None,
            timeout_seconds: None,
        }
    }

    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn script(&self) -> &ScriptSource {
        &self.script
    }

    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }

    pub fn effective_timeout_seconds(&self) -> u64 {
        effective_timeout_seconds(self.timeout_seconds, self.default_timeout_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct ExecRequestBuilder {
    reference: ImageReference,
    script: ScriptSource,
    env: Vec<EnvVar>,
    working_dir: Option<PathBuf>,
    timeout_seconds: Option<u64>,
}

impl ExecRequestBuilder {
    pub fn env(mut self, env: impl IntoIterator<Item = EnvVar>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::new(name, value));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout_seconds(mut self, seconds: Option<u64>) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Finish the request. `default_timeout_seconds` applies when the request
    /// carries no timeout of its own (or zero).
    pub fn build(self, default_timeout_seconds: u64) -> ExecRequest {
        let working_dir = self.working_dir.unwrap_or_else(|| PathBuf::from("."));
        ExecRequest {
            reference: self.reference,
            script: self.script,
            env: self.env,
            working_dir: absolute(working_dir),
            timeout_seconds: self.timeout_seconds,
            default_timeout_seconds,
        }
    }
}

fn absolute(dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        return dir;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(dir),
        Err(_) => dir,
    }
}
