//! Configuration for proxy-core
//!
//! Loaded from a TOML file with `PROXY_`-prefixed environment overrides,
//! e.g. `PROXY_POLICY__DISPATCHER=false` or `PROXY_ROLES__PUBLIC_IP=203.0.113.1`.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::common::{ProxyError, Result};
use crate::logging::LogSettings;
use crate::network::{NetworkClassifier, DEFAULT_PRIVATE_RANGES};
use crate::policy::{BlocklistPolicy, PolicyFlags, SubscribeHandling, ViaParamStrip};
use crate::roles::RoleConfiguration;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "PROXY";

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub roles: RoleConfiguration,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LogSettings,
}

/// Routing policy settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub subscribe: SubscribeHandling,
    pub dispatcher: bool,
    /// Regex matched against the source address of every request
    pub blocklist: Option<String>,
    pub reject_exhausted_hops: bool,
    pub strip_via_params: Vec<ViaParamStrip>,
}

/// Address ranges treated as private
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub private_ranges: Vec<String>,
}

/// Dispatcher affinity table settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub affinity_ttl_secs: u64,
    pub purge_interval_secs: u64,
}

impl ProxyConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?;
        Self::finish(settings)
    }

    /// Parse configuration from TOML text, then apply environment overrides
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .add_source(Self::environment())
            .build()?;
        Self::finish(settings)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: ProxyConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parts serde cannot: regexes, CIDR ranges, intervals and log filters
    pub fn validate(&self) -> Result<()> {
        self.admission_policy()?;
        self.network_classifier()?;
        self.logging.env_filter()?;

        if self.dispatcher.purge_interval_secs == 0 {
            return Err(ProxyError::ConfigError(
                "dispatcher.purge_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.roles.app_servers.is_empty() {
            warn!("No application servers configured; dialog requests will be answered 502");
        }
        Ok(())
    }

    pub fn role_configuration(&self) -> Arc<RoleConfiguration> {
        Arc::new(self.roles.clone())
    }

    pub fn policy_flags(&self) -> PolicyFlags {
        PolicyFlags {
            subscribe: self.policy.subscribe,
            dispatcher: self.policy.dispatcher,
            reject_exhausted_hops: self.policy.reject_exhausted_hops,
            strip_via_params: self.policy.strip_via_params.clone(),
        }
    }

    pub fn network_classifier(&self) -> Result<NetworkClassifier> {
        NetworkClassifier::from_cidrs(&self.network.private_ranges)
    }

    pub fn admission_policy(&self) -> Result<BlocklistPolicy> {
        BlocklistPolicy::from_optional(self.policy.blocklist.as_deref())
    }

    pub fn affinity_ttl(&self) -> Duration {
        Duration::from_secs(self.dispatcher.affinity_ttl_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.dispatcher.purge_interval_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let flags = PolicyFlags::default();
        Self {
            subscribe: flags.subscribe,
            dispatcher: flags.dispatcher,
            blocklist: None,
            reject_exhausted_hops: flags.reject_exhausted_hops,
            strip_via_params: flags.strip_via_params,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            private_ranges: DEFAULT_PRIVATE_RANGES.iter().map(|range| range.to_string()).collect(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            affinity_ttl_secs: 3600,
            purge_interval_secs: 60,
        }
    }
}
