//! In-process revocation cache for access tokens.
//!
//! Maps revoked token ids to the token's natural expiry. An entry is never
//! useful past that expiry (the codec already rejects expired tokens), so
//! stale entries are evicted lazily on read and in bulk by a periodic
//! sweep. Single-process by design; a multi-instance deployment would put
//! a shared TTL store behind the same interface.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Concurrent revoked-token map. Cloning is cheap and shares the map.
///
/// The API is infallible by construction: a lookup can only say "revoked"
/// or "not revoked", so a cache problem can never block request handling.
#[derive(Clone, Default)]
pub struct RevocationCache {
    entries: Arc<DashMap<String, DateTime<Utc>>>,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a token id revoked until its natural expiry. Idempotent;
    /// re-revoking overwrites the stored expiry.
    pub fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) {
        if expires_at <= Utc::now() {
            // Nothing to track: the codec already rejects this token.
            return;
        }
        self.entries.insert(token_id.to_string(), expires_at);
        tracing::info!(token_id, %expires_at, "access token revoked");
    }

    /// Whether the token id was explicitly revoked. Unknown ids and
    /// entries past their expiry answer `false`; stale entries are evicted
    /// on the way out.
    pub fn is_revoked(&self, token_id: &str) -> bool {
        let expired = match self.entries.get(token_id) {
            None => return false,
            Some(entry) => *entry.value() <= Utc::now(),
        };
        if expired {
            self.entries.remove(token_id);
            return false;
        }
        true
    }

    /// Remove every entry whose expiry has passed. Returns the number of
    /// entries removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        let now = Utc::now();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the periodic sweep task. The returned handle must be kept and
    /// shut down on process exit.
    pub fn spawn_sweeper(&self, interval: StdDuration) -> SweeperHandle {
        let cache = self.clone();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the cache starts empty, skip the immediate tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        tracing::debug!(removed, remaining = cache.len(), "revocation cache sweep");
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("revocation sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle for the background sweep task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to stop, bounded by a short
    /// grace period.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(StdDuration::from_secs(5), self.handle)
            .await
            .is_err()
        {
            tracing::warn!("revocation sweeper did not stop within grace period");
        }
    }
}
