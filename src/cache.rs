//! # Expiring Value Cache Module
//!
//! ## Purpose
//! Generic single-value cache with a hard TTL and an asynchronous background
//! refresh that runs some margin before expiry, so readers essentially always
//! hit a warm value and never pay rebuild latency.
//!
//! ## Input/Output Specification
//! - **Input**: Immutable snapshot values (`Arc<T>`), a refresh closure
//! - **Output**: Lock-free reads of the current value, or `None` when cold
//! - **Lifecycle**: set → warm reads → background refresh before expiry → swap
//!
//! ## Key Features
//! - Non-blocking `get` returning `None` for absent or expired values
//! - `set` installs a new value and resets the expiry deadline
//! - At most one background refresh task per cache instance; the refresh
//!   closure is invoked directly on the timer task, not fire-and-forget
//! - Failed refreshes keep the stale value in place until the next tick;
//!   a hard TTL lapse with no successful refresh leaves the cache empty and
//!   the next reader pays the full rebuild cost

use crate::errors::Result;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedEntry<T> {
    value: Arc<T>,
    expires_at: Instant,
}

/// Single-value cache with TTL expiry and background refresh
pub struct ExpiringValueCache<T> {
    name: String,
    ttl: Duration,
    refresh_margin: Duration,
    slot: RwLock<Option<CachedEntry<T>>>,
    refresher_started: AtomicBool,
}

impl<T> ExpiringValueCache<T> {
    /// Create an empty cache.
    ///
    /// `refresh_margin` must be non-zero and smaller than `ttl`; config
    /// validation enforces this for the cache slots built from settings.
    pub fn new(name: impl Into<String>, ttl: Duration, refresh_margin: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            refresh_margin,
            slot: RwLock::new(None),
            refresher_started: AtomicBool::new(false),
        }
    }

    /// Non-blocking read of the cached value.
    ///
    /// Returns `None` when nothing has been set or the value has passed its
    /// hard TTL. Callers with a build path must fall back to their own
    /// build-if-absent section.
    pub fn get(&self) -> Option<Arc<T>> {
        let slot = self.slot.read();
        match slot.as_ref() {
            Some(entry) if Instant::now() < entry.expires_at => Some(Arc::clone(&entry.value)),
            _ => None,
        }
    }

    /// Install a new value and reset the expiry deadline.
    pub fn set(&self, value: Arc<T>) {
        let mut slot = self.slot.write();
        *slot = Some(CachedEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Drop the cached value. The next `get` returns `None`.
    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    /// Spawn the background refresh task for this cache instance.
    ///
    /// The task sleeps until `refresh_margin` before the current deadline,
    /// invokes `refresh` and installs the result via `set`. A refresh error is
    /// logged and the stale value kept; the task retries on a margin-paced
    /// cadence. Only one refresh task is accepted per instance; later calls
    /// log a warning and return `false`.
    pub fn spawn_refresher<F, Fut>(self: &Arc<Self>, refresh: F) -> bool
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>>> + Send + 'static,
    {
        if self.refresher_started.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "Cache '{}' already has a refresh task, ignoring duplicate",
                self.name
            );
            return false;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let deadline = cache.slot.read().as_ref().map(|entry| entry.expires_at);

                match deadline {
                    Some(expires_at) => {
                        let refresh_at = expires_at
                            .checked_sub(cache.refresh_margin)
                            .unwrap_or(expires_at);
                        let now = Instant::now();
                        if refresh_at > now {
                            tokio::time::sleep(refresh_at - now).await;
                            // Re-read the deadline: a concurrent set may have
                            // moved it while we slept.
                            continue;
                        }

                        match refresh().await {
                            Ok(value) => {
                                cache.set(value);
                                tracing::info!("Cache '{}' refreshed before expiry", cache.name);
                            }
                            Err(e) => {
                                tracing::warn!(
                                    "Cache '{}' refresh failed, keeping stale value: {}",
                                    cache.name,
                                    e
                                );
                                tokio::time::sleep(cache.refresh_margin).await;
                            }
                        }
                    }
                    // Nothing cached yet; cold starts are served by the
                    // callers' build-if-absent path.
                    None => tokio::time::sleep(cache.refresh_margin).await,
                }
            }
        });

        true
    }
}
