//! Per-key token-bucket rate limiter with abuse blocking.
//!
//! Keys are typed strings: `ip:<addr>` for anonymous producers and
//! `api_key:<fingerprint>` for authenticated ones. Each key owns a token
//! bucket (burst capacity, refilled at `requests_per_minute / 60` tokens per
//! second). Denied requests increment a per-key violation tracker; enough
//! violations inside the block window put the key on a timed block list.
//!
//! A single mutex guards the three maps. A dedicated cleanup worker removes
//! expired blocks, stale violation trackers, and -- past a watermark --
//! evicts the least-recently-used half of the buckets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loghive_core::ClockSource;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::worker::WorkerHandle;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Whether limiting is enforced at all.
    pub enabled: bool,
    /// Sustained refill rate per key.
    pub requests_per_minute: u32,
    /// Bucket capacity: how many requests may burst at once.
    pub burst_size: u32,
    /// Violations inside the block window that trigger a block.
    pub max_violations: u32,
    /// How long a blocked key stays blocked (also the violation window).
    pub block_duration: Duration,
    /// Cleanup worker interval; also the violation-tracker TTL.
    pub cleanup_interval: Duration,
    /// Bucket-count watermark above which cleanup evicts half the buckets.
    pub max_tracked_keys: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 300,
            burst_size: 50,
            max_violations: 10,
            block_duration: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            max_tracked_keys: 10_000,
        }
    }
}

/// Builds the limiter key for an anonymous caller.
#[must_use]
pub fn ip_key(addr: &std::net::IpAddr) -> String {
    format!("ip:{addr}")
}

/// Builds the limiter key for an authenticated caller.
#[must_use]
pub fn api_key_key(fingerprint: &str) -> String {
    format!("api_key:{fingerprint}")
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Whole tokens left in the bucket after this request.
    pub remaining: u32,
    /// When the bucket is full again.
    pub reset_time: DateTime<Utc>,
    /// True when the key is on the block list.
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
}

impl RateDecision {
    /// Seconds a denied caller should wait before retrying.
    #[must_use]
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let until = self.blocked_until.unwrap_or(self.reset_time);
        let secs = until.signed_duration_since(now).num_seconds();
        u64::try_from(secs.max(1)).unwrap_or(1)
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    rate_per_sec: f64,
    last_refill: DateTime<Utc>,
}

#[derive(Debug)]
struct ViolationTracker {
    count: u32,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: HashMap<String, TokenBucket>,
    violations: HashMap<String, ViolationTracker>,
    blocked: HashMap<String, DateTime<Utc>>,
}

/// Counts for the admin stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub enabled: bool,
    pub tracked_keys: usize,
    pub tracked_violations: usize,
    pub blocked_keys: usize,
}

/// Per-key token-bucket limiter with violation tracking and timed blocks.
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn ClockSource>,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Checks (and consumes) one request for `key`.
    ///
    /// `rpm_override` replaces the configured `requests_per_minute` for this
    /// key -- used for API keys that carry their own limit.
    #[allow(clippy::cast_precision_loss)]
    pub fn check(&self, key: &str, rpm_override: Option<u32>) -> RateDecision {
        let now = self.clock.now();
        if !self.config.enabled {
            return RateDecision {
                allowed: true,
                remaining: self.config.burst_size,
                reset_time: now,
                blocked: false,
                blocked_until: None,
            };
        }

        let rpm = rpm_override.unwrap_or(self.config.requests_per_minute);
        let rate_per_sec = f64::from(rpm) / 60.0;
        let burst = f64::from(self.config.burst_size);

        let mut inner = self.inner.lock();

        if let Some(&until) = inner.blocked.get(key) {
            if now < until {
                return RateDecision {
                    allowed: false,
                    remaining: 0,
                    reset_time: until,
                    blocked: true,
                    blocked_until: Some(until),
                };
            }
            inner.blocked.remove(key);
        }

        let bucket = inner
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: burst,
                rate_per_sec,
                last_refill: now,
            });

        // Refill according to elapsed time, honoring per-key overrides that
        // may have changed since the bucket was created.
        bucket.rate_per_sec = rate_per_sec;
        let elapsed = now
            .signed_duration_since(bucket.last_refill)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        bucket.tokens = (bucket.tokens + elapsed * rate_per_sec).min(burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let remaining = bucket.tokens.floor().max(0.0) as u32;
            let to_full_secs = (burst - bucket.tokens) / rate_per_sec;
            let reset_time =
                now + chrono::Duration::milliseconds((to_full_secs * 1000.0).ceil() as i64);
            return RateDecision {
                allowed: true,
                remaining,
                reset_time,
                blocked: false,
                blocked_until: None,
            };
        }

        // Denied: track the violation and decide whether to block the key.
        let to_next_secs = (1.0 - bucket.tokens) / rate_per_sec;
        let reset_time =
            now + chrono::Duration::milliseconds((to_next_secs * 1000.0).ceil() as i64);

        let tracker = inner
            .violations
            .entry(key.to_string())
            .or_insert_with(|| ViolationTracker {
                count: 0,
                first_seen: now,
                last_seen: now,
            });
        tracker.count += 1;
        tracker.last_seen = now;

        let window = chrono::Duration::from_std(self.config.block_duration)
            .unwrap_or(chrono::Duration::MAX);
        if tracker.count >= self.config.max_violations
            && now.signed_duration_since(tracker.first_seen) <= window
        {
            let until = now + window;
            warn!(key, violations = tracker.count, "rate limiter blocked key");
            inner.blocked.insert(key.to_string(), until);
            inner.violations.remove(key);
        }

        RateDecision {
            allowed: false,
            remaining: 0,
            reset_time,
            blocked: false,
            blocked_until: None,
        }
    }

    /// Removes a key from the block list. Returns whether it was blocked.
    pub fn unblock(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.violations.remove(key);
        let was_blocked = inner.blocked.remove(key).is_some();
        if was_blocked {
            info!(key, "rate limiter unblocked key");
        }
        was_blocked
    }

    /// One cleanup pass: expired blocks, stale trackers, bucket eviction.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        let tracker_ttl = chrono::Duration::from_std(self.config.cleanup_interval)
            .unwrap_or(chrono::Duration::MAX);

        let mut inner = self.inner.lock();
        inner.blocked.retain(|_, until| *until > now);
        inner
            .violations
            .retain(|_, t| now.signed_duration_since(t.last_seen) <= tracker_ttl);

        if inner.buckets.len() > self.config.max_tracked_keys {
            // Watermark exceeded: drop the least-recently-refilled half.
            let mut entries: Vec<(String, DateTime<Utc>)> = inner
                .buckets
                .iter()
                .map(|(k, b)| (k.clone(), b.last_refill))
                .collect();
            entries.sort_by_key(|(_, refill)| *refill);
            let evict = entries.len() / 2;
            for (key, _) in entries.into_iter().take(evict) {
                inner.buckets.remove(&key);
            }
            debug!(evicted = evict, "rate limiter evicted buckets");
        }
    }

    /// Spawns the periodic cleanup worker.
    pub fn spawn_cleaner(self: &Arc<Self>) -> WorkerHandle {
        let limiter = Arc::clone(self);
        let interval = self.config.cleanup_interval;
        WorkerHandle::spawn("rate-limit-cleaner", move |mut stop_rx| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => limiter.cleanup(),
                }
            }
        })
    }

    /// Snapshot for the stats endpoint.
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let inner = self.inner.lock();
        LimiterStats {
            enabled: self.config.enabled,
            tracked_keys: inner.buckets.len(),
            tracked_violations: inner.violations.len(),
            blocked_keys: inner.blocked.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use loghive_core::ManualClock;

    use super::*;

    fn limiter(config: RateLimiterConfig) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = RateLimiter::new(config, clock.clone());
        (clock, limiter)
    }

    fn s4_config() -> RateLimiterConfig {
        RateLimiterConfig {
            enabled: true,
            requests_per_minute: 60,
            burst_size: 2,
            max_violations: 2,
            block_duration: Duration::from_secs(2),
            cleanup_interval: Duration::from_secs(60),
            max_tracked_keys: 10_000,
        }
    }

    #[test]
    fn burst_allows_up_to_burst_size() {
        let (_clock, limiter) = limiter(s4_config());
        assert!(limiter.check("ip:1.2.3.4", None).allowed);
        assert!(limiter.check("ip:1.2.3.4", None).allowed);
        assert!(!limiter.check("ip:1.2.3.4", None).allowed);
    }

    #[test]
    fn tokens_refill_over_time() {
        let (clock, limiter) = limiter(s4_config());
        assert!(limiter.check("k", None).allowed);
        assert!(limiter.check("k", None).allowed);
        assert!(!limiter.check("k", None).allowed);

        // 60 rpm = one token per second.
        clock.advance(Duration::from_millis(1_100));
        assert!(limiter.check("k", None).allowed);
        assert!(!limiter.check("k", None).allowed);
    }

    #[test]
    fn violation_block_cycle() {
        // S4: 2 allowed, 2 denied, block, then recovery after the window.
        let (clock, limiter) = limiter(s4_config());
        let key = "ip:10.0.0.1";

        assert!(limiter.check(key, None).allowed);
        assert!(limiter.check(key, None).allowed);

        let third = limiter.check(key, None);
        assert!(!third.allowed);
        assert!(!third.blocked);

        let fourth = limiter.check(key, None);
        assert!(!fourth.allowed);
        // The fourth call trips the block; the flag shows on the next call.
        assert!(!fourth.blocked);

        let fifth = limiter.check(key, None);
        assert!(!fifth.allowed);
        assert!(fifth.blocked);
        let until = fifth.blocked_until.expect("blocked_until set");
        let now = clock.now();
        assert!(until > now && until <= now + chrono::Duration::seconds(2));

        clock.advance(Duration::from_millis(2_100));
        let after = limiter.check(key, None);
        assert!(after.allowed, "block expired and bucket refilled");
    }

    #[test]
    fn keys_are_isolated() {
        let (_clock, limiter) = limiter(s4_config());
        assert!(limiter.check("ip:a", None).allowed);
        assert!(limiter.check("ip:a", None).allowed);
        assert!(!limiter.check("ip:a", None).allowed);

        // A different key still has its full burst.
        assert!(limiter.check("ip:b", None).allowed);
    }

    #[test]
    fn rpm_override_changes_refill_rate() {
        let (clock, limiter) = limiter(s4_config());
        let key = "api_key:abc";

        assert!(limiter.check(key, Some(600)).allowed);
        assert!(limiter.check(key, Some(600)).allowed);
        assert!(!limiter.check(key, Some(600)).allowed);

        // 600 rpm = ten tokens per second: 200ms buys two tokens.
        clock.advance(Duration::from_millis(210));
        assert!(limiter.check(key, Some(600)).allowed);
        assert!(limiter.check(key, Some(600)).allowed);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let (_clock, limiter) = limiter(RateLimiterConfig {
            enabled: false,
            ..s4_config()
        });
        for _ in 0..100 {
            assert!(limiter.check("k", None).allowed);
        }
    }

    #[test]
    fn allowed_decision_reports_remaining() {
        let (_clock, limiter) = limiter(RateLimiterConfig {
            burst_size: 3,
            ..s4_config()
        });
        assert_eq!(limiter.check("k", None).remaining, 2);
        assert_eq!(limiter.check("k", None).remaining, 1);
        assert_eq!(limiter.check("k", None).remaining, 0);
    }

    #[test]
    fn unblock_clears_block_and_violations() {
        let (_clock, limiter) = limiter(s4_config());
        let key = "ip:bad";
        for _ in 0..4 {
            let _ = limiter.check(key, None);
        }
        assert!(limiter.check(key, None).blocked);

        assert!(limiter.unblock(key));
        // Bucket is still empty, but the key is no longer blocked.
        let decision = limiter.check(key, None);
        assert!(!decision.blocked);
        assert!(!limiter.unblock(key), "second unblock is a no-op");
    }

    #[test]
    fn cleanup_removes_expired_blocks_and_stale_trackers() {
        let (clock, limiter) = limiter(s4_config());
        let key = "ip:bad";
        for _ in 0..4 {
            let _ = limiter.check(key, None);
        }
        assert_eq!(limiter.stats().blocked_keys, 1);

        clock.advance(Duration::from_secs(120));
        limiter.cleanup();

        let stats = limiter.stats();
        assert_eq!(stats.blocked_keys, 0);
        assert_eq!(stats.tracked_violations, 0);
    }

    #[test]
    fn cleanup_evicts_half_past_watermark() {
        let (_clock, limiter) = limiter(RateLimiterConfig {
            max_tracked_keys: 10,
            ..s4_config()
        });
        for i in 0..20 {
            let _ = limiter.check(&format!("ip:{i}"), None);
        }
        assert_eq!(limiter.stats().tracked_keys, 20);

        limiter.cleanup();
        assert_eq!(limiter.stats().tracked_keys, 10);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let (clock, limiter) = limiter(s4_config());
        let _ = limiter.check("k", None);
        let _ = limiter.check("k", None);
        let denied = limiter.check("k", None);
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs(clock.now()) >= 1);
    }

    #[test]
    fn key_helpers_format() {
        let addr: std::net::IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(ip_key(&addr), "ip:10.1.2.3");
        assert_eq!(api_key_key("abcd1234"), "api_key:abcd1234");
    }

    #[tokio::test]
    async fn cleaner_worker_runs_and_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig {
                cleanup_interval: Duration::from_millis(10),
                ..s4_config()
            },
            clock,
        ));
        let worker = limiter.spawn_cleaner();
        tokio::time::sleep(Duration::from_millis(30)).await;
        worker.stop().await;
    }
}
