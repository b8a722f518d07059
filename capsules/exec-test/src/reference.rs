//! Image reference parsing.
//!
//! A [`Reference`] is whatever the caller typed (tag or digest). An
//! [`ImageReference`] is the canonical, digest-pinned form that execution
//! requires: `<registry>/<repository>@sha256:<64-hex>`, with Docker Hub
//! names expanded to `index.docker.io/library/...`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Registry host assumed when a reference names no registry.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

static DIGEST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^sha256:[a-f0-9]{64}$").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap());
static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("image reference cannot be empty")]
    Empty,
    #[error("invalid digest '{digest}' in reference '{reference}' (expected sha256:<64 hex>)")]
    InvalidDigest { reference: String, digest: String },
    #[error("invalid tag '{tag}' in reference '{reference}'")]
    InvalidTag { reference: String, tag: String },
    #[error("invalid repository '{repository}' in reference '{reference}'")]
    InvalidRepository {
        reference: String,
        repository: String,
    },
    #[error("image reference '{reference}' must be digest-pinned (expected '@sha256:')")]
    NotPinned { reference: String },
}

/// A parsed reference that may still point at a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    name: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(ReferenceError::InvalidDigest {
                        reference: input.to_string(),
                        digest: digest.to_string(),
                    });
                }
                (rest, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A ':' only introduces a tag when no '/' follows it; otherwise it is a registry port.
        let (name, tag) = match rest.rfind(':') {
            Some(idx) if !rest[idx + 1..].contains('/') => (&rest[..idx], Some(&rest[idx + 1..])),
            _ => (rest, None),
        };

        if let Some(tag) = tag {
            if !TAG_RE.is_match(tag) {
                return Err(ReferenceError::InvalidTag {
                    reference: input.to_string(),
                    tag: tag.to_string(),
                });
            }
        }

        let (registry, repository) = split_name(input, name)?;

        Ok(Self {
            name: name.to_string(),
            registry,
            repository,
            tag: tag.map(str::to_string),
            digest,
        })
    }

    /// Name as written by the caller, without tag or digest.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Tag to resolve when no digest is present; `latest` when none was given.
    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }

    /// Pin this reference to `digest`, dropping any tag.
    pub fn pin(&self, digest: &str) -> Result<ImageReference, ReferenceError> {
        if !DIGEST_RE.is_match(digest) {
            return Err(ReferenceError::InvalidDigest {
                reference: self.name.clone(),
                digest: digest.to_string(),
            });
        }
        Ok(ImageReference {
            name: self.name.clone(),
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            digest: digest.to_string(),
        })
    }

    /// The canonical form when this reference already carries a digest.
    pub fn into_pinned(self) -> Result<ImageReference, ReferenceError> {
        match self.digest {
            Some(digest) => Ok(ImageReference {
                name: self.name,
                registry: self.registry,
                repository: self.repository,
                digest,
            }),
            None => Err(ReferenceError::NotPinned {
                reference: match &self.tag {
                    Some(tag) => format!("{}:{}", self.name, tag),
                    None => self.name,
                },
            }),
        }
    }
}

fn split_name(reference: &str, name: &str) -> Result<(String, String), ReferenceError> {
    let (registry, path) = match name.split_once('/') {
        Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    let registry = if registry == "docker.io" {
        DEFAULT_REGISTRY.to_string()
    } else {
        registry
    };

    let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
        format!("library/{}", path)
    } else {
        path
    };

    if repository.is_empty() || !repository.split('/').all(|c| COMPONENT_RE.is_match(c)) {
        return Err(ReferenceError::InvalidRepository {
            reference: reference.to_string(),
            repository,
        });
    }

    Ok((registry, repository))
}

/// Canonical `<registry>/<repository>@sha256:<hex>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    name: String,
    registry: String,
    repository: String,
    digest: String,
}

impl ImageReference {
    /// Parse an already canonical reference. Tags are rejected.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        Reference::parse(input)?.into_pinned()
    }

    /// Name as written by the caller, e.g. `ubuntu`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry host, e.g. `cgr.dev`.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry, e.g. `chainguard/wolfi-base`.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// `sha256:<hex>`.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.registry, self.repository, self.digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn splits_registry_and_repository() {
        let input = format!("cgr.dev/chainguard/wolfi-base@sha256:{}", HEX);
        let reference = ImageReference::parse(&input).unwrap();
        assert_eq!(reference.registry(), "cgr.dev");
        assert_eq!(reference.repository(), "chainguard/wolfi-base");
        assert_eq!(reference.digest(), format!("sha256:{}", HEX));
        assert_eq!(reference.to_string(), input);
    }

    #[test]
    fn docker_hub_names_get_default_registry_and_library_prefix() {
        let reference = ImageReference::parse(&format!("ubuntu@sha256:{}", HEX)).unwrap();
        assert_eq!(reference.registry(), DEFAULT_REGISTRY);
        assert_eq!(reference.repository(), "library/ubuntu");
        assert_eq!(reference.name(), "ubuntu");
        assert_eq!(
            reference.to_string(),
            format!("index.docker.io/library/ubuntu@sha256:{}", HEX)
        );

        let reference =
            ImageReference::parse(&format!("docker.io/grafana/grafana@sha256:{}", HEX)).unwrap();
        assert_eq!(reference.registry(), DEFAULT_REGISTRY);
        assert_eq!(reference.repository(), "grafana/grafana");
        assert_eq!(
            reference.to_string(),
            format!("index.docker.io/grafana/grafana@sha256:{}", HEX)
        );
    }

    #[test]
    fn pinned_tag_is_fully_qualified() {
        let reference = Reference::parse("docker.io/library/ubuntu:latest").unwrap();
        let pinned = reference.pin(&format!("sha256:{}", HEX)).unwrap();
        assert_eq!(pinned.name(), "docker.io/library/ubuntu");
        assert_eq!(
            pinned.to_string(),
            format!("index.docker.io/library/ubuntu@sha256:{}", HEX)
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        let reference = Reference::parse("localhost:5000/team/app").unwrap();
        assert_eq!(reference.registry(), "localhost:5000");
        assert_eq!(reference.repository(), "team/app");
        assert_eq!(reference.tag(), None);
        assert_eq!(reference.tag_or_latest(), "latest");

        let reference = Reference::parse("localhost:5000/team/app:v1.2").unwrap();
        assert_eq!(reference.tag(), Some("v1.2"));
        assert_eq!(reference.name(), "localhost:5000/team/app");
    }

    #[test]
    fn tag_and_digest_canonicalizes_without_tag() {
        let input = format!("ghcr.io/acme/app:main@sha256:{}", HEX);
        let reference = ImageReference::parse(&input).unwrap();
        assert_eq!(
            reference.to_string(),
            format!("ghcr.io/acme/app@sha256:{}", HEX)
        );
    }

    #[test]
    fn tag_reference_is_not_pinned() {
        let err = ImageReference::parse("cgr.dev/chainguard/wolfi-base:latest").unwrap_err();
        assert_eq!(
            err,
            ReferenceError::NotPinned {
                reference: "cgr.dev/chainguard/wolfi-base:latest".to_string()
            }
        );
    }

    #[test]
    fn rejects_malformed_references() {
        assert_eq!(Reference::parse("  ").unwrap_err(), ReferenceError::Empty);
        assert!(matches!(
            Reference::parse("ghcr.io/acme/app@sha256:abc"),
            Err(ReferenceError::InvalidDigest { .. })
        ));
        assert!(matches!(
            Reference::parse("ghcr.io/Acme/App:latest"),
            Err(ReferenceError::InvalidRepository { .. })
        ));
        assert!(matches!(
            Reference::parse("ghcr.io/acme/app:-bad"),
            Err(ReferenceError::InvalidTag { .. })
        ));
    }

    #[test]
    fn pin_validates_digest() {
        let reference = Reference::parse("ghcr.io/acme/app:main").unwrap();
        assert!(reference.pin("sha256:nothex").is_err());
        let pinned = reference.pin(&format!("sha256:{}", HEX)).unwrap();
        assert_eq!(pinned.to_string(), format!("ghcr.io/acme/app@sha256:{}", HEX));
    }
}
