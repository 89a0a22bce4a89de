//! Named relay configurations.
//!
//! A configuration is a RON file `<dir>/<name>.ron` describing one source
//! mailbox, one relay and the destinations every message is copied to.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use postern_common::audit::AuditConfig;
use postern_delivery::{ExpungePolicy, RetryPolicy, RoutingRule, RuleError, RunSettings};
use postern_transport::{ImapSettings, SmtpSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod defaults {
    use postern_delivery::RetryPolicy;

    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn concurrency() -> usize {
        1
    }

    pub fn base_delay_ms() -> u64 {
        RetryPolicy::default().base_delay_ms
    }

    pub fn max_delay_ms() -> u64 {
        RetryPolicy::default().max_delay_ms
    }

    pub fn jitter_factor() -> f64 {
        RetryPolicy::default().jitter_factor
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration named {name:?} (looked for {})", path.display())]
    NotFound { name: String, path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// One address or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Destinations {
    One(String),
    Many(Vec<String>),
}

impl Destinations {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(address) => vec![address.clone()],
            Self::Many(addresses) => addresses.clone(),
        }
    }
}

/// Backoff between relay attempts. The number of retries is configured
/// separately as `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub source: ImapSettings,
    pub relay: SmtpSettings,
    pub destinations: Destinations,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry: BackoffConfig,
    #[serde(default = "defaults::concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub expunge: ExpungePolicy,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Load and validate the configuration called `name` from `dir`.
    pub fn load(name: &str, dir: &Path) -> Result<Self, ConfigError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "{name:?} is not a configuration name"
            )));
        }

        let path = dir.join(format!("{name}.ron"));
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                name: name.to_string(),
                path,
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        let config = ron::from_str::<Self>(&content).map_err(|e| ConfigError::Parse {
            path,
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.host.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("source.host is empty")));
        }
        if self.relay.host.trim().is_empty() {
            return Err(ConfigError::Invalid(String::from("relay.host is empty")));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(String::from(
                "concurrency must be at least 1",
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter_factor must be within 0.0..=1.0, got {}",
                self.retry.jitter_factor
            )));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(String::from(
                "retry.base_delay_ms exceeds retry.max_delay_ms",
            )));
        }

        self.routing_rule()?;
        Ok(())
    }

    pub fn routing_rule(&self) -> Result<RoutingRule, RuleError> {
        RoutingRule::new(self.destinations.to_vec(), self.relay.sender.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry.base_delay_ms,
            max_delay_ms: self.retry.max_delay_ms,
            jitter_factor: self.retry.jitter_factor,
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            concurrency: self.concurrency,
            retry: self.retry_policy(),
            expunge: self.expunge,
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
            audit: self.audit.clone(),
        }
    }
}
