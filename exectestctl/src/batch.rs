use anyhow::{Context, Result};
use capsules_exec_test::{DigestResolver, EvaluationInput, ExecResponse, Harness};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// A request file is either a bare sequence or a mapping with `requests:`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BatchFile {
    List(Vec<BatchRequest>),
    Keyed { requests: Vec<BatchRequest> },
}

impl BatchFile {
    fn into_requests(self) -> Vec<BatchRequest> {
        match self {
            BatchFile::List(requests) | BatchFile::Keyed { requests } => requests,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub input: EvaluationInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ExecResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Load requests from a YAML or JSON file. Working directories are resolved
/// against the file's own directory, which is also the default.
pub fn load(path: &Path) -> Result<Vec<BatchRequest>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;

    let file: BatchFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse JSON request file {}", path.display()))?,
        _ => serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse YAML request file {}", path.display()))?,
    };

    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok(file
        .into_requests()
        .into_iter()
        .map(|mut request| {
            request.input.working_dir = Some(match request.input.working_dir.take() {
                Some(dir) if dir.is_absolute() => dir,
                Some(dir) => base_dir.join(dir),
                None => base_dir.clone(),
            });
            request
        })
        .collect())
}

/// Evaluate all requests concurrently, returning results in request order.
pub fn run_all<R: DigestResolver>(harness: &Harness<R>, requests: Vec<BatchRequest>) -> Vec<BatchResult> {
    info!(count = requests.len(), "running batch");
    std::thread::scope(|scope| {
        let handles: Vec<_> = requests
            .into_iter()
            .enumerate()
            .map(|(idx, request)| {
                let name = request
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("request-{}", idx + 1));
                let handle = scope.spawn(move || harness.evaluate(&request.input));
                (name, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(name, handle)| match handle.join() {
                Ok(Ok(response)) => BatchResult {
                    name,
                    response: Some(response),
                    error: None,
                },
                Ok(Err(err)) => BatchResult {
                    name,
                    response: None,
                    error: Some(err.to_string()),
                },
                Err(_) => BatchResult {
                    name,
                    response: None,
                    error: Some("evaluation thread panicked".to_string()),
                },
            })
            .collect()
    })
}
