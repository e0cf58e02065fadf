//! Per-address sliding-window rate limiting.
//!
//! Each client address keeps the instants of its admitted requests from the
//! last minute. A request is admitted iff fewer than `requests_per_minute`
//! remain after eviction. Rejected requests are not recorded.

use crate::domain::config::RateLimitConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Length of the sliding window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Rate limiter state shared across requests
pub struct RateLimitState {
    /// Admitted request instants per client address
    windows: DashMap<String, VecDeque<Instant>>,
    /// Ceiling per window
    requests_per_minute: usize,
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            requests_per_minute: config.requests_per_minute as usize,
        }
    }

    /// Admit or reject one request from `client`.
    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    /// [`RateLimitState::allow`] against an explicit clock.
    pub fn allow_at(&self, client: &str, now: Instant) -> bool {
        // The entry guard holds the shard lock, so evict-count-push is atomic
        // per address.
        let mut window = self.windows.entry(client.to_string()).or_default();
        evict(&mut window, now);

        if window.len() < self.requests_per_minute {
            window.push_back(now);
            true
        } else {
            warn!(client = %client, limit = self.requests_per_minute, "Rate limit exceeded");
            false
        }
    }

    /// Drop expired instants and forget addresses with none left.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now())
    }

    /// [`RateLimitState::sweep`] against an explicit clock.
    pub fn sweep_at(&self, now: Instant) {
        self.windows.retain(|client, window| {
            evict(window, now);
            if window.is_empty() {
                debug!(client = %client, "Removing idle rate limit window");
                false
            } else {
                true
            }
        });
    }

    /// Get number of tracked addresses
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.windows.clear();
    }
}

fn evict(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&oldest) = window.front() {
        if now.saturating_duration_since(oldest) > WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Background task to clean up idle rate limit windows
pub async fn cleanup_task(state: Arc<RateLimitState>, interval: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        state.sweep();
    }
}
