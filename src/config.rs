// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration management for vault-dr
//!
//! The configuration file is read once at startup and treated as immutable for
//! the rest of the run. [`RoleAssignment::resolve`] turns it, together with the
//! mode and environment given on the command line, into the node roles.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DrError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Cluster domains per environment
    #[serde(default)]
    pub clusters: Clusters,

    /// Route 53 settings
    #[serde(default)]
    pub dns: DnsConfig,

    /// Retry and timeout settings for node calls
    #[serde(default)]
    pub http: HttpConfig,

    /// Seconds to wait after the CNAME change before demoting the old primary
    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The three supported environments
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Clusters {
    pub prod: Option<ClusterConfig>,
    pub staging: Option<ClusterConfig>,
    pub test: Option<ClusterConfig>,
}

/// A DR pair of clusters and the alias clients use to reach the active one
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the cluster that is primary in normal operation
    pub primary_domain: String,

    /// Base URL of the DR secondary
    pub secondary_domain: String,

    /// Public CNAME pointed at the active cluster
    pub cname: String,

    /// Overrides the id fragment derived from the demoted node's domain
    #[serde(default)]
    pub secondary_id_prefix: Option<String>,
}

/// Route 53 configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Hosted zone holding the public CNAME
    #[serde(default)]
    pub hosted_zone_id: String,

    /// TTL of the upserted record
    #[serde(default = "default_ttl")]
    pub ttl: i64,

    /// AWS region used to sign Route 53 requests
    #[serde(default = "default_region")]
    pub region: String,
}

/// Retry policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff for the first retry; doubled on each following one
    #[serde(default = "default_base_backoff")]
    pub base_backoff_secs: u64,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clusters: Clusters::default(),
            dns: DnsConfig::default(),
            http: HttpConfig::default(),
            propagation_delay_secs: default_propagation_delay(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            hosted_zone_id: String::new(),
            ttl: default_ttl(),
            region: default_region(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_secs: default_base_backoff(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DrError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dns.hosted_zone_id.trim().is_empty() {
            return Err(DrError::InvalidConfig {
                message: "dns.hosted_zone_id cannot be empty".to_string(),
            });
        }

        if self.dns.ttl <= 0 {
            return Err(DrError::InvalidConfig {
                message: format!("dns.ttl must be positive, got {}", self.dns.ttl),
            });
        }

        let configured: Vec<_> = Environment::ALL
            .iter()
            .filter_map(|env| self.clusters.get(*env).map(|c| (*env, c)))
            .collect();

        if configured.is_empty() {
            return Err(DrError::InvalidConfig {
                message: "no clusters configured".to_string(),
            });
        }

        for (env, cluster) in configured {
            cluster.validate(env)?;
        }

        Ok(())
    }

    /// Apply overrides that operators pass through the environment
    ///
    /// `DNS_PROPAGATION_DELAY` replaces `propagation_delay_secs`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DNS_PROPAGATION_DELAY") {
            self.propagation_delay_secs =
                raw.trim().parse().map_err(|_| DrError::InvalidConfig {
                    message: format!("DNS_PROPAGATION_DELAY must be a number of seconds, got '{raw}'"),
                })?;
        }
        Ok(self)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

impl Clusters {
    pub fn get(&self, environment: Environment) -> Option<&ClusterConfig> {
        match environment {
            Environment::Prod => self.prod.as_ref(),
            Environment::Staging => self.staging.as_ref(),
            Environment::Test => self.test.as_ref(),
        }
    }
}

impl ClusterConfig {
    fn validate(&self, environment: Environment) -> Result<()> {
        for (field, value) in [
            ("primary_domain", &self.primary_domain),
            ("secondary_domain", &self.secondary_domain),
        ] {
            if !(value.starts_with("https://") || value.starts_with("http://")) {
                return Err(DrError::InvalidConfig {
                    message: format!(
                        "clusters.{environment}.{field} must be an http(s) URL, got '{value}'"
                    ),
                });
            }
        }

        if self.primary_domain == self.secondary_domain {
            return Err(DrError::InvalidConfig {
                message: format!("clusters.{environment} primary and secondary are the same node"),
            });
        }

        if self.cname.trim().is_empty() {
            return Err(DrError::InvalidConfig {
                message: format!("clusters.{environment}.cname cannot be empty"),
            });
        }

        Ok(())
    }
}

/// Direction of the role swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DrMode {
    /// Promote the configured secondary, demote the configured primary
    Failover,
    /// Promote the configured primary back, demote the configured secondary
    Failback,
}

/// Deployment environment selecting a cluster pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Environment {
    Prod,
    Staging,
    Test,
}

impl Environment {
    pub const ALL: [Environment; 3] = [Environment::Prod, Environment::Staging, Environment::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }
}

impl DrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrMode::Failover => "failover",
            DrMode::Failback => "failback",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = DrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prod" => Ok(Environment::Prod),
            "staging" => Ok(Environment::Staging),
            "test" => Ok(Environment::Test),
            other => Err(DrError::Usage {
                message: format!("unknown environment '{other}', expected prod|staging|test"),
            }),
        }
    }
}

impl FromStr for DrMode {
    type Err = DrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "failover" => Ok(DrMode::Failover),
            "failback" => Ok(DrMode::Failback),
            other => Err(DrError::Usage {
                message: format!("unknown mode '{other}', expected failover|failback"),
            }),
        }
    }
}

/// Which node plays which role for the rest of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub mode: DrMode,
    pub environment: Environment,
    /// Current DR secondary, promoted by this run
    pub target: String,
    /// Current primary, demoted by this run
    pub source: String,
    /// Public alias repointed at the target
    pub cname: String,
    pub secondary_id_prefix: Option<String>,
}

impl RoleAssignment {
    /// Resolve node roles; performs no I/O
    pub fn resolve(mode: DrMode, environment: Environment, clusters: &Clusters) -> Result<Self> {
        let cluster = clusters.get(environment).ok_or_else(|| DrError::InvalidConfig {
            message: format!("no cluster configured for environment '{environment}'"),
        })?;

        let (source, target) = match mode {
            DrMode::Failover => (&cluster.primary_domain, &cluster.secondary_domain),
            DrMode::Failback => (&cluster.secondary_domain, &cluster.primary_domain),
        };

        Ok(Self {
            mode,
            environment,
            target: target.clone(),
            source: source.clone(),
            cname: cluster.cname.clone(),
            secondary_id_prefix: cluster.secondary_id_prefix.clone(),
        })
    }

    /// Address the demoted node uses to reach the new primary
    pub fn primary_api_addr(&self) -> String {
        format!("https://{}", self.cname)
    }
}

// Default value functions

fn default_propagation_delay() -> u64 {
    60
}

fn default_ttl() -> i64 {
    300
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_retries() -> u32 {
    10
}

fn default_base_backoff() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}
