//! Dispatcher affinity: sticky mapping from a dialog to the application-server
//! instance handling it.
//!
//! Several application-server processes can sit behind one proxy without
//! sharing session state, so every message of a dialog has to reach the
//! instance that saw its first request. The table is the only mutable state
//! the routing engine shares between concurrently routed messages.
//!
//! Entries expire after a sliding TTL (each successful lookup refreshes it).
//! Concurrent records for the same key are last-writer-wins.

use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::common::SipEndpoint;
use crate::message::SipMessage;

/// Default lifetime of an idle affinity entry
pub const DEFAULT_AFFINITY_TTL: Duration = Duration::from_secs(3600);

/// Dialog-correlation key.
///
/// Derived from the Call-ID, which every transaction of a dialog (INVITE, its
/// ACK and CANCEL, later BYE or re-INVITE) and every response shares, so the
/// key derived from any later message matches the recorded one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn for_message(msg: &SipMessage) -> Self {
        Self(msg.call_id.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keyed store of application-server affinities, injected into the engine
pub trait DispatcherTable: Send + Sync {
    fn lookup(&self, key: &CorrelationKey) -> Option<SipEndpoint>;

    fn record(&self, key: CorrelationKey, endpoint: SipEndpoint);

    fn remove(&self, key: &CorrelationKey) -> Option<SipEndpoint>;

    /// Drop expired entries, returning how many were removed
    fn purge_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct AffinityEntry {
    endpoint: SipEndpoint,
    last_used: Instant,
}

impl AffinityEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_used.elapsed() >= ttl
    }
}

/// In-memory affinity table backed by a sharded concurrent map
#[derive(Debug)]
pub struct AffinityTable {
    entries: DashMap<CorrelationKey, AffinityEntry>,
    ttl: Duration,
}

impl Default for AffinityTable {
    fn default() -> Self {
        Self::new(DEFAULT_AFFINITY_TTL)
    }
}

impl AffinityTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Purge expired entries every `period` until the table is dropped
    pub fn spawn_eviction(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let table: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(table) = table.upgrade() else {
                    break;
                };
                let purged = table.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired dispatcher affinities, {} remaining", purged, table.len());
                }
            }
        })
    }
}

impl DispatcherTable for AffinityTable {
    fn lookup(&self, key: &CorrelationKey) -> Option<SipEndpoint> {
        // The shard guard must be released before remove_if touches the same shard.
        let expired = match self.entries.get_mut(key) {
            None => return None,
            Some(mut entry) => {
                if !entry.is_expired(self.ttl) {
                    entry.last_used = Instant::now();
                    return Some(entry.endpoint);
                }
                true
            }
        };

        if expired {
            let ttl = self.ttl;
            self.entries.remove_if(key, |_, entry| entry.is_expired(ttl));
        }
        None
    }

    fn record(&self, key: CorrelationKey, endpoint: SipEndpoint) {
        debug!("Dispatcher affinity {} -> {}", key, endpoint);
        self.entries.insert(
            key,
            AffinityEntry {
                endpoint,
                last_used: Instant::now(),
            },
        );
    }

    fn remove(&self, key: &CorrelationKey) -> Option<SipEndpoint> {
        self.entries.remove(key).map(|(_, entry)| entry.endpoint)
    }

    fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
