//! Admission policy and per-deployment routing toggles

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::{Result, SipEndpoint};
use crate::message::{SipMessage, StatusCode};

/// Verdict of the admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    /// Let the request proceed
    Allow,
    /// Answer the request directly and forward nothing
    Reject { status: StatusCode, reason: String },
}

/// Trait for implementing admission logic
#[async_trait]
pub trait AdmissionPolicy: Send + Sync {
    /// Evaluate an incoming request from `remote`
    async fn evaluate(&self, remote: &SipEndpoint, request: &SipMessage) -> PolicyAction;
}

/// Rejects requests whose source address matches a pattern
#[derive(Debug, Clone, Default)]
pub struct BlocklistPolicy {
    pattern: Option<Regex>,
}

impl BlocklistPolicy {
    /// Policy that admits everything
    pub fn allow_all() -> Self {
        Self { pattern: None }
    }

    /// Block source addresses matching `pattern`, e.g. `^(192\.0\.2\.|198\.51\.100\.)`
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    pub fn from_optional(pattern: Option<&str>) -> Result<Self> {
        match pattern {
            Some(pattern) => Self::new(pattern),
            None => Ok(Self::allow_all()),
        }
    }

    pub fn is_blocked(&self, remote: &SipEndpoint) -> bool {
        self.pattern
            .as_ref()
            .map(|pattern| pattern.is_match(&remote.address.to_string()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl AdmissionPolicy for BlocklistPolicy {
    async fn evaluate(&self, remote: &SipEndpoint, _request: &SipMessage) -> PolicyAction {
        if self.is_blocked(remote) {
            PolicyAction::Reject {
                status: StatusCode::NotAcceptable,
                reason: "Banned".to_string(),
            }
        } else {
            PolicyAction::Allow
        }
    }
}

/// How SUBSCRIBE requests from external user agents are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeHandling {
    /// Forward to the configured notifier
    #[default]
    Notifier,
    /// Answer 405 Method Not Allowed
    Reject,
}

/// Remove a Via parameter for specific User-Agent strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViaParamStrip {
    pub param: String,
    pub user_agents: Vec<String>,
}

/// Toggles that distinguish one deployment from another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyFlags {
    pub subscribe: SubscribeHandling,
    /// Consult and update the dispatcher affinity table
    pub dispatcher: bool,
    /// Answer 483 to requests arriving with Max-Forwards 0
    pub reject_exhausted_hops: bool,
    pub strip_via_params: Vec<ViaParamStrip>,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            subscribe: SubscribeHandling::Notifier,
            dispatcher: true,
            reject_exhausted_hops: true,
            strip_via_params: Vec::new(),
        }
    }
}
