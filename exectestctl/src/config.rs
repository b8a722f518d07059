//! Harness-wide configuration for exectestctl

use anyhow::{Context, Result};
use capsules_exec_test::{
    DigestResolver, HarnessSettings, PinnedResolver, RegistryCredentials, RegistryResolver,
    DEFAULT_TIMEOUT_SECONDS,
};
use clap::Args;
use std::time::Duration;

/// Settings shared by every subcommand. Each flag falls back to an environment variable.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Timeout in seconds for scripts that do not set their own
    #[arg(
        long,
        env = "EXEC_TEST_DEFAULT_TIMEOUT_SECONDS",
        default_value_t = DEFAULT_TIMEOUT_SECONDS,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub default_timeout_seconds: u64,

    /// Time between SIGTERM and SIGKILL when a script times out
    #[arg(
        long,
        env = "EXEC_TEST_TERMINATION_GRACE_MS",
        default_value_t = 2000,
        global = true
    )]
    pub termination_grace_ms: u64,

    /// Only accept digest-pinned references; never contact a registry
    #[arg(long, env = "EXEC_TEST_OFFLINE", global = true)]
    pub offline: bool,

    /// Username for registry authentication when resolving tags
    #[arg(long, env = "EXEC_TEST_REGISTRY_USERNAME", global = true)]
    pub registry_username: Option<String>,

    /// Password or token for registry authentication
    #[arg(
        long,
        env = "EXEC_TEST_REGISTRY_PASSWORD",
        hide_env_values = true,
        global = true
    )]
    pub registry_password: Option<String>,

    /// Output logs in JSON format
    #[arg(long, env = "EXEC_TEST_LOG_JSON", global = true)]
    pub log_json: bool,
}

impl Config {
    pub fn settings(&self) -> HarnessSettings {
        HarnessSettings {
            default_timeout_seconds: self.default_timeout_seconds,
            termination_grace: Duration::from_millis(self.termination_grace_ms),
        }
    }

    pub fn credentials(&self) -> Option<RegistryCredentials> {
        match (&self.registry_username, &self.registry_password) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn resolver(&self) -> Result<Box<dyn DigestResolver>> {
        if self.offline {
            return Ok(Box::new(PinnedResolver));
        }
        let resolver =
            RegistryResolver::new(self.credentials()).context("Failed to build registry resolver")?;
        Ok(Box::new(resolver))
    }
}
