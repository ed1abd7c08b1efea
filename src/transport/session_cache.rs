//! # Session Cache
//!
//! Server-side map from session key to data channel, so a client that
//! redials with the same key resumes its channel (exported services, proxies
//! and handshake policy) instead of starting over.
//!
//! ## Features
//! - **Grace period**: a channel detached longer than the grace period is
//!   evicted and closed
//! - **Memory-bounded**: at capacity the longest-detached session is evicted;
//!   when every session is live, new sessions are refused
//! - **Thread-safe**: one async mutex around the map; channels are closed
//!   after the lock is released
//!
//! ## Usage
//! ```rust,no_run
//! use objwire::transport::session_cache::SessionCache;
//! use std::time::Duration;
//!
//! let cache = SessionCache::new(1000, Duration::from_secs(30));
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{constants, ProtocolError, Result};
use crate::service::channel::{DataChannel, LinkState};

#[derive(Clone, Debug)]
struct SessionEntry {
    channel: DataChannel,
    created_at: Instant,
}

impl SessionEntry {
    fn is_expired(&self, grace: Duration) -> bool {
        self.channel.is_closed()
            || self
                .channel
                .detached_for()
                .is_some_and(|detached| detached > grace)
    }
}

struct SessionCacheInner {
    sessions: HashMap<String, SessionEntry>,
    total_inserts: u64,
}

/// Channels kept for resumption, keyed by session key.
pub struct SessionCache {
    max_entries: usize,
    grace_period: Duration,
    inner: Mutex<SessionCacheInner>,
}

impl SessionCache {
    pub fn new(max_entries: usize, grace_period: Duration) -> Self {
        Self {
            max_entries,
            grace_period,
            inner: Mutex::new(SessionCacheInner {
                sessions: HashMap::new(),
                total_inserts: 0,
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Store a new session.
    ///
    /// # Errors
    /// `TransportError` when the cache is full of attached sessions.
    pub async fn insert<S: Into<String>>(&self, key: S, channel: DataChannel) -> Result<()> {
        let evicted = {
            let mut inner = self.inner.lock().await;
            let mut evicted = self.evict_expired_locked(&mut inner);

            if inner.sessions.len() >= self.max_entries {
                match self.evict_longest_detached(&mut inner) {
                    Some(channel) => evicted.push(channel),
                    None => {
                        drop(inner);
                        close_all(evicted).await;
                        return Err(ProtocolError::TransportError(
                            constants::ERR_SESSIONS_FULL.into(),
                        ));
                    }
                }
            }

            inner.sessions.insert(
                key.into(),
                SessionEntry {
                    channel,
                    created_at: Instant::now(),
                },
            );
            inner.total_inserts += 1;
            trace!(session_count = inner.sessions.len(), "Session stored");
            evicted
        };
        close_all(evicted).await;
        Ok(())
    }

    /// The live channel stored under `key`, if it is still within its grace period.
    pub async fn get(&self, key: &str) -> Option<DataChannel> {
        let expired = {
            let mut inner = self.inner.lock().await;
            match inner.sessions.get(key) {
                Some(entry) if !entry.is_expired(self.grace_period) => {
                    trace!("Session cache hit");
                    return Some(entry.channel.clone());
                }
                Some(_) => {}
                None => return None,
            }
            inner.sessions.remove(key)
        };
        if let Some(entry) = expired {
            debug!("Expired session dropped on lookup");
            entry.channel.close().await;
        }
        None
    }

    pub async fn remove(&self, key: &str) -> Option<DataChannel> {
        self.inner
            .lock()
            .await
            .sessions
            .remove(key)
            .map(|entry| entry.channel)
    }

    /// Evict and close every session past its grace period.
    pub async fn evict_expired(&self) -> usize {
        let evicted = {
            let mut inner = self.inner.lock().await;
            self.evict_expired_locked(&mut inner)
        };
        let count = evicted.len();
        close_all(evicted).await;
        count
    }

    /// Remove every session, returning the channels.
    pub async fn drain(&self) -> Vec<DataChannel> {
        let mut inner = self.inner.lock().await;
        let count = inner.sessions.len();
        debug!(cleared_count = count, "Session cache drained");
        inner
            .sessions
            .drain()
            .map(|(_, entry)| entry.channel)
            .collect()
    }

    /// Whether no stored channel currently has a stream attached.
    pub async fn all_detached(&self) -> bool {
        self.inner
            .lock()
            .await
            .sessions
            .values()
            .all(|entry| entry.channel.link_state() != LinkState::Attached)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.sessions.is_empty()
    }

    pub async fn stats(&self) -> SessionCacheStats {
        let inner = self.inner.lock().await;
        let detached_count = inner
            .sessions
            .values()
            .filter(|e| e.channel.detached_for().is_some())
            .count();
        let oldest = inner.sessions.values().map(|e| e.created_at).min();

        SessionCacheStats {
            total_entries: inner.sessions.len(),
            max_entries: self.max_entries,
            detached_count,
            total_inserts: inner.total_inserts,
            oldest_age: oldest.map(|created| created.elapsed()),
        }
    }

    fn evict_expired_locked(&self, inner: &mut SessionCacheInner) -> Vec<DataChannel> {
        let grace = self.grace_period;
        let expired: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.is_expired(grace))
            .map(|(key, _)| key.clone())
            .collect();
        let evicted: Vec<DataChannel> = expired
            .iter()
            .filter_map(|key| inner.sessions.remove(key))
            .map(|entry| entry.channel)
            .collect();

        if !evicted.is_empty() {
            debug!(
                removed_count = evicted.len(),
                remaining_count = inner.sessions.len(),
                "Expired sessions evicted"
            );
        }
        evicted
    }

    fn evict_longest_detached(&self, inner: &mut SessionCacheInner) -> Option<DataChannel> {
        let key = inner
            .sessions
            .iter()
            .filter_map(|(key, entry)| entry.channel.detached_for().map(|d| (key, d)))
            .max_by_key(|(_, detached)| *detached)
            .map(|(key, _)| key.clone())?;
        debug!("Longest-detached session evicted to make room");
        inner.sessions.remove(&key).map(|entry| entry.channel)
    }
}

async fn close_all(channels: Vec<DataChannel>) {
    for channel in channels {
        channel.close().await;
    }
}

/// Statistics about the session cache
#[derive(Debug, Clone, Copy)]
pub struct SessionCacheStats {
    /// Stored sessions
    pub total_entries: usize,
    /// Maximum capacity
    pub max_entries: usize,
    /// Sessions currently without a stream
    pub detached_count: usize,
    /// Total sessions ever inserted
    pub total_inserts: u64,
    /// Age of the oldest stored session
    pub oldest_age: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::service::channel::Role;

    fn channel() -> DataChannel {
        DataChannel::new(Role::Server, ChannelConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let cache = SessionCache::new(10, Duration::from_secs(60));
        let stored = channel();
        cache.insert("session-1", stored.clone()).await.unwrap();

        let found = cache.get("session-1").await.unwrap();
        assert!(found.ptr_eq(&stored));
        assert!(cache.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_grace_period_expiry() {
        let cache = SessionCache::new(10, Duration::from_millis(10));
        let stored = channel();
        cache.insert("session-1", stored.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.evict_expired().await, 1);
        assert!(stored.is_closed());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_capacity_evicts_detached() {
        let cache = SessionCache::new(2, Duration::from_secs(60));
        let first = channel();
        cache.insert("a", first.clone()).await.unwrap();
        cache.insert("b", channel()).await.unwrap();
        cache.insert("c", channel()).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_inserts, 3);
    }

    #[tokio::test]
    async fn test_full_of_live_sessions_refuses() {
        let cache = SessionCache::new(1, Duration::from_secs(60));
        let live = channel();
        let (a, _b) = tokio::io::duplex(1024);
        live.attach(a).await.unwrap();
        cache.insert("live", live).await.unwrap();

        assert!(matches!(
            cache.insert("next", channel()).await,
            Err(ProtocolError::TransportError(_))
        ));
        assert!(!cache.all_detached().await);
    }

    #[tokio::test]
    async fn test_drain() {
        let cache = SessionCache::new(10, Duration::from_secs(60));
        cache.insert("session-1", channel()).await.unwrap();
        assert_eq!(cache.drain().await.len(), 1);
        assert!(cache.get("session-1").await.is_none());
    }
}
