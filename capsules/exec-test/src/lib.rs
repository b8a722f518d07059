//! Image-scoped test script execution.
//!
//! Given a container image reference, this capsule resolves it to a digest,
//! runs a caller-supplied script with the image exposed through environment
//! variables (`IMAGE_NAME`, `IMAGE_REPOSITORY`, `IMAGE_REGISTRY`, plus a
//! `FREE_PORT`), and classifies the result into success, script failure,
//! timeout, or spawn failure.
//!
//! ```no_run
//! use capsules_exec_test::{EvaluationInput, Harness, HarnessSettings, PinnedResolver};
//!
//! let harness = Harness::new(PinnedResolver, HarnessSettings::default());
//! let response = harness.evaluate(&EvaluationInput {
//!     digest: "cgr.dev/chainguard/wolfi-base@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".into(),
//!     script: "docker run --rm $IMAGE_NAME echo hello | grep hello".into(),
//!     ..Default::default()
//! });
//! match response {
//!     Ok(response) => print!("{}", response.output),
//!     Err(err) => eprintln!("{}", err),
//! }
//! ```

pub mod classify;
pub mod engine;
pub mod environment;
pub mod error;
pub mod harness;
pub mod port;
pub mod reference;
pub mod request;
pub mod resolver;
pub mod script;
pub mod timeout;

pub use classify::{classify, ExecOutcome, ExecResponse};
pub use environment::{build_environment, EnvVar};
pub use error::{EvaluationError, SpawnCause};
pub use harness::{
    run_request, EvaluationInput, Harness, HarnessSettings, DEFAULT_TIMEOUT_SECONDS,
};
pub use port::allocate_port;
pub use reference::{ImageReference, Reference, ReferenceError};
pub use request::{ExecRequest, ExecRequestBuilder};
pub use resolver::{
    DigestResolver, PinnedResolver, RegistryCredentials, RegistryResolver, ResolveError,
};
pub use script::{materialize, ScriptSource};
pub use timeout::{Deadline, DEFAULT_TERMINATION_GRACE};
