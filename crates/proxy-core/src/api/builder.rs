//! Builder assembling a routing engine from configuration

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::common::{ProxyError, Result};
use crate::config::ProxyConfig;
use crate::dispatcher::{AffinityTable, DispatcherTable};
use crate::message::SipMessage;
use crate::policy::AdmissionPolicy;
use crate::routing::{RoutingContext, RoutingEngine, RoutingOutcome};
use crate::transport::ProxyTransport;

/// Builds a [`ProxyRouter`].
///
/// The configuration and transport are required. Dispatcher table and
/// admission policy default to an [`AffinityTable`] and the configured
/// blocklist.
pub struct ProxyRouterBuilder {
    config: Option<ProxyConfig>,
    transport: Option<Arc<dyn ProxyTransport>>,
    dispatcher: Option<Arc<dyn DispatcherTable>>,
    admission: Option<Arc<dyn AdmissionPolicy>>,
}

impl ProxyRouterBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
            dispatcher: None,
            admission: None,
        }
    }

    pub fn config(mut self, config: ProxyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ProxyTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use an external affinity store instead of the in-memory table
    pub fn dispatcher(mut self, dispatcher: Arc<dyn DispatcherTable>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Replace the configured blocklist with a custom admission check
    pub fn admission_policy(mut self, admission: Arc<dyn AdmissionPolicy>) -> Self {
        self.admission = Some(admission);
        self
    }

    /// Build the router.
    ///
    /// When the default affinity table is used, a task purging expired
    /// entries is spawned on the current tokio runtime.
    pub async fn build(self) -> Result<ProxyRouter> {
        let config = self
            .config
            .ok_or_else(|| ProxyError::ConfigError("proxy configuration is required".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| ProxyError::ConfigError("a transport is required".to_string()))?;
        config.validate()?;

        let admission = match self.admission {
            Some(admission) => admission,
            None => Arc::new(config.admission_policy()?),
        };

        let (dispatcher, eviction) = match self.dispatcher {
            Some(dispatcher) => (dispatcher, None),
            None => {
                let table = Arc::new(AffinityTable::new(config.affinity_ttl()));
                let eviction = table.spawn_eviction(config.purge_interval());
                (table as Arc<dyn DispatcherTable>, Some(eviction))
            }
        };

        let engine = RoutingEngine::new(
            config.role_configuration(),
            config.network_classifier()?,
            config.policy_flags(),
            admission,
            dispatcher,
            transport,
        );

        info!(
            "Proxy routing core ready: internal {}, {} application server(s), dispatcher {}",
            config.roles.proxy_internal,
            config.roles.app_servers.len(),
            if config.policy.dispatcher { "on" } else { "off" }
        );

        Ok(ProxyRouter {
            engine: Arc::new(engine),
            eviction,
        })
    }
}

impl Default for ProxyRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured routing engine plus the background work it owns
pub struct ProxyRouter {
    engine: Arc<RoutingEngine>,
    eviction: Option<JoinHandle<()>>,
}

impl ProxyRouter {
    pub fn builder() -> ProxyRouterBuilder {
        ProxyRouterBuilder::new()
    }

    /// Shared handle for routing from many tasks
    pub fn engine(&self) -> Arc<RoutingEngine> {
        Arc::clone(&self.engine)
    }

    pub async fn route(&self, message: SipMessage, ctx: RoutingContext) -> Result<RoutingOutcome> {
        self.engine.route(message, ctx).await
    }

    /// Stop background affinity eviction
    pub fn shutdown(&mut self) {
        if let Some(eviction) = self.eviction.take() {
            eviction.abort();
        }
    }
}

impl Drop for ProxyRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
