use crate::classify::{classify, ExecOutcome, ExecResponse};
use crate::engine::{self, Invocation};
use crate::environment::{build_environment, EnvVar};
use crate::error::{EvaluationError, SpawnCause};
use crate::port::allocate_port;
use crate::request::ExecRequest;
use crate::resolver::DigestResolver;
use crate::script::{materialize, ScriptSource};
use crate::timeout::{Deadline, DEFAULT_TERMINATION_GRACE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Timeout applied when a request does not set one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Harness-wide settings, passed into every request explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessSettings {
    pub default_timeout_seconds: u64,
    pub termination_grace: Duration,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            default_timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }
}

/// Request fields as a caller supplies them, before resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationInput {
    /// Tag or digest reference.
    pub digest: String,
    /// Inline shell text, or a path to an executable relative to `working_dir`.
    pub script: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Zero or absent means the harness default.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

pub struct Harness<R> {
    resolver: R,
    settings: HarnessSettings,
}

impl<R: DigestResolver> Harness<R> {
    pub fn new(resolver: R, settings: HarnessSettings) -> Self {
        Self { resolver, settings }
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Resolve, run and classify one request.
    pub fn evaluate(&self, input: &EvaluationInput) -> Result<ExecResponse, EvaluationError> {
        let span = info_span!("exec_test", evaluation = %Uuid::new_v4(), digest = %input.digest);
        let _enter = span.enter();

        let reference = self.resolver.resolve(&input.digest)?;

        let working_dir = input
            .working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let script = ScriptSource::detect(&input.script, &working_dir);

        let request = ExecRequest::builder(reference, script)
            .env(input.env.iter().cloned())
            .working_dir(working_dir)
            .timeout_seconds(input.timeout_seconds)
            .build(self.settings.default_timeout_seconds);

        run_request(&request, self.settings.termination_grace).into_result(request.reference())
    }
}

/// Run an already resolved request: allocate a port, build the environment,
/// materialize the script, execute under the deadline and classify.
pub fn run_request(request: &ExecRequest, grace: Duration) -> ExecOutcome {
    let reference = request.reference();

    let port = match allocate_port() {
        Ok(port) => port,
        Err(source) => {
            return report(ExecOutcome::SpawnFailure {
                cause: SpawnCause::PortUnavailable { source },
            })
        }
    };

    let env = build_environment(reference, port, request.env());
    debug!(keys = ?env.keys().collect::<Vec<_>>(), "environment overlay");
    let materialized = match materialize(request.script(), request.working_dir()) {
        Ok(materialized) => materialized,
        Err(cause) => return report(ExecOutcome::SpawnFailure { cause }),
    };

    let deadline = Deadline::new(request.effective_timeout_seconds(), grace);
    info!(
        reference = %reference,
        port,
        timeout_secs = deadline.timeout_seconds(),
        env_overrides = request.env().len(),
        "running test script"
    );

    let raw = engine::run(
        &Invocation {
            program: &materialized.program,
            args: &materialized.args,
            env: &env,
            working_dir: request.working_dir(),
        },
        &deadline,
    );

    report(classify(raw))
}

fn report(outcome: ExecOutcome) -> ExecOutcome {
    match &outcome {
        ExecOutcome::Success { .. } => info!("test script passed"),
        ExecOutcome::ScriptFailure { exit_code, .. } => {
            info!(exit_code = *exit_code, "test script failed")
        }
        ExecOutcome::Timeout { timeout_seconds } => {
            warn!(timeout_secs = *timeout_seconds, "test script timed out")
        }
        ExecOutcome::SpawnFailure { cause } => warn!(error = %cause, "test script could not start"),
    }
    outcome
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::resolver::PinnedResolver;

    const REF: &str = "cgr.dev/chainguard/wolfi-base@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn harness() -> Harness<PinnedResolver> {
        Harness::new(
            PinnedResolver,
            HarnessSettings {
                default_timeout_seconds: 30,
                termination_grace: Duration::from_millis(500),
            },
        )
    }

    #[test]
    fn evaluates_inline_script() {
        let dir = tempfile::tempdir().unwrap();
        let response = harness()
            .evaluate(&EvaluationInput {
                digest: REF.to_string(),
                script: "echo hello | grep hello".to_string(),
                working_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(response.exit_code, 0);
        assert_eq!(response.output, "hello\n");
        assert_eq!(response.digest, response.id);
    }

    #[test]
    fn resolver_errors_pass_through() {
        let err = harness()
            .evaluate(&EvaluationInput {
                digest: "cgr.dev/chainguard/wolfi-base:latest".to_string(),
                script: "true".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Resolve(_)));
        assert_eq!(
            err.to_string(),
            "image reference 'cgr.dev/chainguard/wolfi-base:latest' must be digest-pinned (expected '@sha256:')"
        );
    }

    #[test]
    fn input_deserializes_with_defaults() {
        let input: EvaluationInput =
            serde_json::from_str(r#"{"digest": "x", "script": "true"}"#).unwrap();
        assert!(input.env.is_empty());
        assert_eq!(input.working_dir, None);
        assert_eq!(input.timeout_seconds, None);
    }
}
