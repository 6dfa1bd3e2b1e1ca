//! Per-source submission throttle.
//!
//! Fixed window: the first request from a key opens a window and counts as 1;
//! requests inside the window are accepted until the cap is hit; the first
//! request after the deadline opens a fresh window.
//!
//! State is process-local. Multiple instances each keep their own counters, so
//! a shared counter store should implement [`RateLimiter`] for those
//! deployments.

use axum::http::HeaderMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Bucket shared by every caller whose address could not be determined.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Expired windows are swept once the map grows past this size.
const PRUNE_THRESHOLD: usize = 10_000;

/// Check-and-increment by source key.
pub trait RateLimiter: Send + Sync {
    /// Records a request for `key` and returns whether it is allowed.
    fn allow(&self, key: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    reset_at: Instant,
}

/// In-memory fixed-window limiter.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops every window whose deadline has passed.
    pub fn prune_expired(&self) {
        let now = Instant::now();
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, w| w.reset_at >= now);
    }
}

impl Default for FixedWindowLimiter {
    /// 5 submissions per source per minute.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        // A panic while holding the lock leaves counters consistent, so poisoning is ignored
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, w| w.reset_at >= now);
        }

        match windows.get_mut(key) {
            Some(state) if now <= state.reset_at => {
                if state.count >= self.max_requests {
                    return false;
                }
                state.count += 1;
                true
            }
            _ => {
                windows.insert(
                    key.to_string(),
                    WindowState {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }
}

/// Best-effort caller identifier: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer. Falls back to [`UNKNOWN_SOURCE`].
pub fn source_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(ip) = forwarded.or_else(real_ip) {
        return ip.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => {
            tracing::warn!(
                "Could not determine caller address, using shared '{}' rate limit bucket",
                UNKNOWN_SOURCE
            );
            UNKNOWN_SOURCE.to_string()
        }
    }
}
