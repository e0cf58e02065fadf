//! # Replay Guard
//!
//! Freshness checks for incoming commands.
//!
//! - Timestamps are accepted within `timestamp_tolerance` of the server clock,
//!   in either direction.
//! - A nonce is accepted once per `replay_window`. After the window it may be
//!   accepted again; the timestamp check bounds what that buys an attacker.
//! - Records are swept periodically so memory stays bounded by request rate.

use crate::domain::config::SecurityConfig;
use crate::domain::error::ReplayError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Time-bounded nonce cache plus timestamp tolerance.
pub struct ReplayGuard {
    /// Nonce -> first time it was accepted
    seen: DashMap<String, Instant>,
    replay_window: Duration,
    timestamp_tolerance: Duration,
}

impl ReplayGuard {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            seen: DashMap::new(),
            replay_window: config.replay_window,
            timestamp_tolerance: config.timestamp_tolerance,
        }
    }

    /// Accept `timestamp` iff `|now - timestamp| <= tolerance`.
    pub fn check_timestamp(&self, timestamp: i64, now_secs: u64) -> Result<(), ReplayError> {
        let skew = (now_secs as i64).abs_diff(timestamp);
        if skew <= self.timestamp_tolerance.as_secs() {
            Ok(())
        } else {
            debug!(timestamp, now = now_secs, skew, "Timestamp outside tolerance");
            Err(ReplayError::TimestampOutOfRange)
        }
    }

    /// Record `nonce`, failing if it was accepted within the window.
    pub fn check_and_record_nonce(&self, nonce: &str) -> Result<(), ReplayError> {
        self.check_and_record_nonce_at(nonce, Instant::now())
    }

    /// [`ReplayGuard::check_and_record_nonce`] against an explicit clock.
    pub fn check_and_record_nonce_at(&self, nonce: &str, now: Instant) -> Result<(), ReplayError> {
        match self.seen.entry(nonce.to_string()) {
            Entry::Occupied(mut existing) => {
                if now.saturating_duration_since(*existing.get()) > self.replay_window {
                    existing.insert(now);
                    Ok(())
                } else {
                    Err(ReplayError::NonceReused)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(())
            }
        }
    }

    /// Forget nonces older than the window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now())
    }

    /// [`ReplayGuard::sweep`] against an explicit clock.
    pub fn sweep_at(&self, now: Instant) {
        let before = self.seen.len();
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) <= self.replay_window);
        let removed = before.saturating_sub(self.seen.len());
        if removed > 0 {
            debug!(removed, remaining = self.seen.len(), "Swept expired nonces");
        }
    }

    /// Number of remembered nonces
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.seen.clear();
    }
}

/// Background task to sweep expired nonces
pub async fn cleanup_task(guard: Arc<ReplayGuard>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        guard.sweep();
    }
}
