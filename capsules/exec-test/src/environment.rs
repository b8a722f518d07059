use crate::reference::ImageReference;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const IMAGE_NAME: &str = "IMAGE_NAME";
pub const IMAGE_REPOSITORY: &str = "IMAGE_REPOSITORY";
pub const IMAGE_REGISTRY: &str = "IMAGE_REGISTRY";
pub const FREE_PORT: &str = "FREE_PORT";

/// Caller-declared environment variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Variables layered over the inherited process environment.
///
/// Reserved image variables come first, caller variables are applied after
/// them in declaration order, and the last occurrence of a name wins. A
/// caller may therefore override `IMAGE_NAME` and friends.
pub fn build_environment(
    reference: &ImageReference,
    port: u16,
    caller_vars: &[EnvVar],
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(IMAGE_NAME.to_string(), reference.to_string());
    env.insert(
        IMAGE_REPOSITORY.to_string(),
        reference.repository().to_string(),
    );
    env.insert(IMAGE_REGISTRY.to_string(), reference.registry().to_string());
    env.insert(FREE_PORT.to_string(), port.to_string());

    for var in caller_vars {
        env.insert(var.name.clone(), var.value.clone());
    }

    env
}
