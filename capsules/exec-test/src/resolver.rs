//! Resolution of tag references to canonical digests.
//!
//! The harness calls a [`DigestResolver`] exactly once per evaluation, before
//! anything runs, and surfaces its errors unchanged.

use crate::reference::{ImageReference, Reference, ReferenceError, DEFAULT_REGISTRY};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const MANIFEST_MEDIA_TYPES: [&str; 4] = [
    "application/vnd.oci.image.index.v1+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.docker.distribution.manifest.v2+json",
];

const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
const CONTENT_DIGEST_HEADER: &str = "docker-content-digest";

static CHALLENGE_PARAM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z][A-Za-z0-9_-]*)=(?:"([^"]*)"|([^,\s]+))"#).unwrap());

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("registry request to {url} failed: {message}")]
    RequestFailed { url: String, message: String },

    #[error("registry authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("manifest for {reference} not found")]
    NotFound { reference: String },

    #[error("invalid registry response for {reference}: {message}")]
    InvalidResponse { reference: String, message: String },

    #[error("registry client configuration error: {message}")]
    ConfigError { message: String },
}

/// Turns a caller-supplied reference (tag or digest) into a canonical one.
pub trait DigestResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<ImageReference, ResolveError>;
}

impl<R: DigestResolver + ?Sized> DigestResolver for Box<R> {
    fn resolve(&self, reference: &str) -> Result<ImageReference, ResolveError> {
        (**self).resolve(reference)
    }
}

/// Accepts only references that already carry a digest; never touches the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinnedResolver;

impl DigestResolver for PinnedResolver {
    fn resolve(&self, reference: &str) -> Result<ImageReference, ResolveError> {
        Ok(ImageReference::parse(reference)?)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
enum Authorization {
    Bearer(String),
    Basic { username: String, password: String },
}

impl Authorization {
    fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Bearer(token) => builder.bearer_auth(token),
            Authorization::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Challenge {
    scheme: String,
    params: BTreeMap<String, String>,
}

/// Resolves tags against an OCI distribution registry.
///
/// Digest references short-circuit without any I/O. Tags are resolved with a
/// manifest `HEAD`, following a single bearer or basic auth challenge.
pub struct RegistryResolver {
    client: Client,
    credentials: Option<RegistryCredentials>,
}

impl RegistryResolver {
    pub fn new(credentials: Option<RegistryCredentials>) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("exec-test/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolveError::ConfigError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            credentials,
        })
    }

    fn fetch_digest(&self, reference: &Reference) -> Result<String, ResolveError> {
        let url = manifest_url(reference);
        debug!(url = %url, "resolving tag via registry");

        let mut auth = None;
        let mut response = self.send(Method::HEAD, &url, None)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let granted = self.authorize(reference, response.headers())?;
            response = self.send(Method::HEAD, &url, Some(&granted))?;
            auth = Some(granted);
        }
        check_status(reference, &url, response.status())?;

        if let Some(digest) = response
            .headers()
            .get(CONTENT_DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            return Ok(digest.trim().to_string());
        }

        // Some registries omit the digest header on HEAD; hash the manifest body instead.
        let response = self.send(Method::GET, &url, auth.as_ref())?;
        check_status(reference, &url, response.status())?;
        let body = response.bytes().map_err(|e| ResolveError::RequestFailed {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&body))))
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        auth: Option<&Authorization>,
    ) -> Result<Response, ResolveError> {
        let mut builder = self
            .client
            .request(method, url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES.join(", "));
        if let Some(auth) = auth {
            builder = auth.apply(builder);
        }
        builder.send().map_err(|e| ResolveError::RequestFailed {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn authorize(
        &self,
        reference: &Reference,
        headers: &HeaderMap,
    ) -> Result<Authorization, ResolveError> {
        let registry = reference.registry().to_string();
        let challenge = headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
            .ok_or_else(|| ResolveError::AuthFailed {
                registry: registry.clone(),
                message: "registry returned 401 without a usable WWW-Authenticate challenge"
                    .to_string(),
            })?;

        if challenge.scheme.eq_ignore_ascii_case("basic") {
            return match &self.credentials {
                Some(creds) => Ok(Authorization::Basic {
                    username: creds.username.clone(),
                    password: creds.password.clone(),
                }),
                None => Err(ResolveError::AuthFailed {
                    registry,
                    message: "registry requires basic credentials".to_string(),
                }),
            };
        }

        if !challenge.scheme.eq_ignore_ascii_case("bearer") {
            return Err(ResolveError::AuthFailed {
                registry,
                message: format!("unsupported auth scheme '{}'", challenge.scheme),
            });
        }

        let realm = challenge
            .params
            .get("realm")
            .ok_or_else(|| ResolveError::AuthFailed {
                registry: registry.clone(),
                message: "bearer challenge is missing a realm".to_string(),
            })?;
        let scope = challenge
            .params
            .get("scope")
            .cloned()
            .unwrap_or_else(|| format!("repository:{}:pull", reference.repository()));

        let mut query = vec![("scope", scope)];
        if let Some(service) = challenge.params.get("service") {
            query.push(("service", service.clone()));
        }

        let mut request = self.client.get(realm).query(&query);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        let response = request.send().map_err(|e| ResolveError::AuthFailed {
            registry: registry.clone(),
            message: format!("token request to {} failed: {}", realm, e),
        })?;
        if !response.status().is_success() {
            return Err(ResolveError::AuthFailed {
                registry,
                message: format!("token endpoint returned {}", response.status()),
            });
        }

        let token: TokenResponse = response.json().map_err(|e| ResolveError::AuthFailed {
            registry: registry.clone(),
            message: format!("invalid token response: {}", e),
        })?;
        token
            .token
            .or(token.access_token)
            .filter(|t| !t.is_empty())
            .map(Authorization::Bearer)
            .ok_or_else(|| ResolveError::AuthFailed {
                registry,
                message: "token response did not contain a token".to_string(),
            })
    }
}

impl DigestResolver for RegistryResolver {
    fn resolve(&self, input: &str) -> Result<ImageReference, ResolveError> {
        let reference = Reference::parse(input)?;
        if reference.digest().is_some() {
            return Ok(reference.into_pinned()?);
        }

        let digest = self.fetch_digest(&reference)?;
        let pinned = reference
            .pin(&digest)
            .map_err(|e| ResolveError::InvalidResponse {
                reference: input.to_string(),
                message: e.to_string(),
            })?;
        info!(reference = %input, resolved = %pinned, "resolved tag to digest");
        Ok(pinned)
    }
}

fn check_status(reference: &Reference, url: &str, status: StatusCode) -> Result<(), ResolveError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND => Err(ResolveError::NotFound {
            reference: format!("{}:{}", reference.name(), reference.tag_or_latest()),
        }),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ResolveError::AuthFailed {
            registry: reference.registry().to_string(),
            message: format!("registry returned {}", status),
        }),
        _ => Err(ResolveError::RequestFailed {
            url: url.to_string(),
            message: format!("unexpected status {}", status),
        }),
    }
}

fn manifest_url(reference: &Reference) -> String {
    let registry = reference.registry();
    let host = if registry == DEFAULT_REGISTRY {
        DOCKER_HUB_API_HOST
    } else {
        registry
    };
    format!(
        "{}://{}/v2/{}/manifests/{}",
        registry_scheme(registry),
        host,
        reference.repository(),
        reference.tag_or_latest()
    )
}

/// Plain HTTP for loopback and `.local` registries, HTTPS everywhere else.
fn registry_scheme(registry: &str) -> &'static str {
    let host = if registry.starts_with('[') {
        registry.split(']').next().map(|h| &h[1..]).unwrap_or(registry)
    } else {
        registry.split(':').next().unwrap_or(registry)
    };
    if host == "localhost" || host.starts_with("127.") || host == "::1" || host.ends_with(".local")
    {
        "http"
    } else {
        "https"
    }
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(char::is_whitespace) {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }
    let params = CHALLENGE_PARAM_RE
        .captures_iter(rest)
        .map(|cap| {
            let value = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
            (cap[1].to_ascii_lowercase(), value.to_string())
        })
        .collect();
    Some(Challenge {
        scheme: scheme.to_string(),
        params,
    })
}
