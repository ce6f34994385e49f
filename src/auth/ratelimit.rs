//! Login failure throttling
//!
//! Failed logins are counted per client IP inside a sliding window. Once an IP
//! reaches the configured number of failures it is blocked for a while, and
//! every login attempt from it fails fast without touching the identity store.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum number of failed attempts before blocking
    pub max_failures: u32,

    /// Duration to block an IP after max failures
    pub block_duration: Duration,

    /// Duration after which failure count resets
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: 10,
            block_duration: Duration::from_secs(300),
            window_duration: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
struct FailureEntry {
    count: u32,
    window_start: Instant,
    blocked_at: Option<Instant>,
}

impl FailureEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            blocked_at: None,
        }
    }
}

/// Per-IP login failure tracker
///
/// The map is only ever updated with whole entries, so a lock poisoned by a
/// panicking holder still guards consistent data and is recovered.
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: RwLock<HashMap<IpAddr, FailureEntry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    /// Record a failed login for an IP
    ///
    /// Returns `true` if the IP is now blocked
    pub fn record_failure(&self, ip: IpAddr) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let entry = entries.entry(ip).or_insert_with(|| FailureEntry::new(now));

        if let Some(blocked_at) = entry.blocked_at {
            if now.duration_since(blocked_at) < self.config.block_duration {
                return true;
            }
            *entry = FailureEntry::new(now);
        }

        if now.duration_since(entry.window_start) >= self.config.window_duration {
            *entry = FailureEntry::new(now);
        }
        entry.count += 1;

        if entry.count >= self.config.max_failures {
            entry.blocked_at = Some(now);
            tracing::warn!(%ip, failures = entry.count, "Login blocked for IP");
            true
        } else {
            false
        }
    }

    /// Check if an IP is currently blocked
    pub fn is_blocked(&self, ip: IpAddr) -> bool {
        self.remaining_block_time(ip).is_some()
    }

    /// Forget an IP's failures (after a successful login)
    pub fn reset(&self, ip: IpAddr) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ip);
    }

    /// Number of failures in the current window
    pub fn failure_count(&self, ip: IpAddr) -> u32 {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        match entries.get(&ip) {
            Some(entry) if entry.window_start.elapsed() < self.config.window_duration => {
                entry.count
            }
            _ => 0,
        }
    }

    /// Remaining block time for an IP, `None` if not blocked
    pub fn remaining_block_time(&self, ip: IpAddr) -> Option<Duration> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let blocked_at = entries.get(&ip)?.blocked_at?;
        self.config
            .block_duration
            .checked_sub(blocked_at.elapsed())
            .filter(|d| !d.is_zero())
    }

    /// Drop entries whose block and window have both expired
    pub fn cleanup(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        entries.retain(|_, entry| {
            let blocked = entry
                .blocked_at
                .is_some_and(|at| now.duration_since(at) < self.config.block_duration);
            blocked || now.duration_since(entry.window_start) < self.config.window_duration
        });
    }

    /// Number of IPs currently tracked
    pub fn tracked_ips_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
