//! Login admission control: a token bucket per identifier and per source
//! with independent capacities. The in-memory limiter is the default; the
//! Redis-backed one is the fallback for multi-instance deployments, where
//! buckets have to be shared.

use crate::config::RateLimitConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Mutex;

/// What the limiter decided for one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Admission check for a login attempt keyed by case-folded identifier and
/// source address.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(
        &self,
        identifier: &str,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RateDecision>;
}

struct Bucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn full(burst: u32, now: DateTime<Utc>) -> Self {
        Self {
            tokens: burst as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, burst: u32, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * rate).min(burst as f64);
        self.last_refill = now;
    }

    fn retry_after_secs(&self, rate: f64) -> u64 {
        ((1.0 - self.tokens) / rate).ceil().max(1.0) as u64
    }
}

/// Per-key token buckets behind a mutexed map. Updates to one bucket are
/// serialized by the map lock; an attempt only consumes tokens when both
/// its buckets can pay, so a denial never drains the other key.
pub struct MemoryRateLimiter {
    cfg: RateLimitConfig,
    identifier_buckets: Mutex<HashMap<String, Bucket>>,
    source_buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryRateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            cfg,
            identifier_buckets: Mutex::new(HashMap::new()),
            source_buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Drops buckets that have fully refilled; they are indistinguishable
    /// from absent ones. Meant to run from a periodic maintenance task.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cfg = self.cfg;
        let mut identifiers = self.identifier_buckets.lock().unwrap();
        identifiers.retain(|_, b| {
            b.refill(cfg.per_identifier_rps, cfg.burst, now);
            b.tokens < cfg.burst as f64
        });
        let mut sources = self.source_buckets.lock().unwrap();
        sources.retain(|_, b| {
            b.refill(cfg.per_source_rps, cfg.source_burst, now);
            b.tokens < cfg.source_burst as f64
        });
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(
        &self,
        identifier: &str,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let mut identifiers = self.identifier_buckets.lock().unwrap();
        let id_bucket = identifiers
            .entry(identifier.to_string())
            .or_insert_with(|| Bucket::full(self.cfg.burst, now));
        id_bucket.refill(self.cfg.per_identifier_rps, self.cfg.burst, now);
        if id_bucket.tokens < 1.0 {
            return Ok(RateDecision::Limited {
                retry_after_secs: id_bucket.retry_after_secs(self.cfg.per_identifier_rps),
            });
        }

        if let Some(source) = source {
            let mut sources = self.source_buckets.lock().unwrap();
            let src_bucket = sources
                .entry(source.to_string())
                .or_insert_with(|| Bucket::full(self.cfg.source_burst, now));
            src_bucket.refill(self.cfg.per_source_rps, self.cfg.source_burst, now);
            if src_bucket.tokens < 1.0 {
                return Ok(RateDecision::Limited {
                    retry_after_secs: src_bucket.retry_after_secs(self.cfg.per_source_rps),
                });
            }
            src_bucket.tokens -= 1.0;
        }

        id_bucket.tokens -= 1.0;
        Ok(RateDecision::Allowed)
    }
}

/// Fixed-window counters in Redis, for deployments where several service
/// instances must share the login budget. INCR the key, set the window TTL
/// on first increment, deny past the window budget.
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    cfg: RateLimitConfig,
    window_secs: u64,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager, cfg: RateLimitConfig) -> Self {
        Self {
            conn,
            cfg,
            window_secs: 60,
        }
    }

    fn window_budget(&self, rps: f64, burst: u32) -> i64 {
        (rps * self.window_secs as f64).ceil() as i64 + burst as i64
    }

    async fn take(&self, key: &str, budget: i64) -> Result<RateDecision> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(self.window_secs as i64)
                .query_async(&mut conn)
                .await?;
        }
        if count > budget {
            let ttl: i64 = redis::cmd("TTL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .unwrap_or(self.window_secs as i64);
            return Ok(RateDecision::Limited {
                retry_after_secs: ttl.max(1) as u64,
            });
        }
        Ok(RateDecision::Allowed)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        identifier: &str,
        source: Option<&str>,
        _now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let decision = self
            .take(
                &format!("rate_limit:login:identifier:{identifier}"),
                self.window_budget(self.cfg.per_identifier_rps, self.cfg.burst),
            )
            .await?;
        if let RateDecision::Limited { .. } = decision {
            return Ok(decision);
        }
        if let Some(source) = source {
            return self
                .take(
                    &format!("rate_limit:login:source:{source}"),
                    self.window_budget(self.cfg.per_source_rps, self.cfg.source_burst),
                )
                .await;
        }
        Ok(RateDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> MemoryRateLimiter {
        MemoryRateLimiter::new(RateLimitConfig {
            per_identifier_rps: 1.0,
            per_source_rps: 100.0,
            burst: 3,
            source_burst: 10,
        })
    }

    #[tokio::test]
    async fn burst_then_limited() {
        let l = limiter();
        let now = Utc::now();
        for _ in 0..3 {
            assert_eq!(
                l.check("alice", Some("10.0.0.1"), now).await.unwrap(),
                RateDecision::Allowed
            );
        }
        assert!(matches!(
            l.check("alice", Some("10.0.0.1"), now).await.unwrap(),
            RateDecision::Limited { .. }
        ));
    }

    #[tokio::test]
    async fn exhausting_one_identifier_leaves_another_untouched() {
        let l = limiter();
        let now = Utc::now();
        for _ in 0..3 {
            l.check("alice", Some("10.0.0.1"), now).await.unwrap();
        }
        assert!(matches!(
            l.check("alice", Some("10.0.0.1"), now).await.unwrap(),
            RateDecision::Limited { .. }
        ));
        // Same source, different identifier: still within its own budget.
        assert_eq!(
            l.check("bob", Some("10.0.0.1"), now).await.unwrap(),
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn source_budget_is_independent() {
        let l = MemoryRateLimiter::new(RateLimitConfig {
            per_identifier_rps: 100.0,
            per_source_rps: 1.0,
            burst: 2,
            source_burst: 2,
        });
        let now = Utc::now();
        l.check("a", Some("10.0.0.1"), now).await.unwrap();
        l.check("b", Some("10.0.0.1"), now).await.unwrap();
        assert!(matches!(
            l.check("c", Some("10.0.0.1"), now).await.unwrap(),
            RateDecision::Limited { .. }
        ));
        assert_eq!(
            l.check("c", Some("10.0.0.2"), now).await.unwrap(),
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn buckets_refill_over_time() {
        let l = limiter();
        let now = Utc::now();
        for _ in 0..3 {
            l.check("alice", None, now).await.unwrap();
        }
        assert!(matches!(
            l.check("alice", None, now).await.unwrap(),
            RateDecision::Limited { .. }
        ));
        let later = now + chrono::Duration::seconds(2);
        assert_eq!(
            l.check("alice", None, later).await.unwrap(),
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn denial_does_not_drain_the_source_bucket() {
        let l = MemoryRateLimiter::new(RateLimitConfig {
            per_identifier_rps: 0.001,
            per_source_rps: 0.001,
            burst: 1,
            source_burst: 2,
        });
        let now = Utc::now();
        l.check("alice", Some("10.0.0.1"), now).await.unwrap();
        // Alice's bucket is dry; repeated denials must not consume the
        // shared source budget.
        for _ in 0..5 {
            assert!(matches!(
                l.check("alice", Some("10.0.0.1"), now).await.unwrap(),
                RateDecision::Limited { .. }
            ));
        }
        assert_eq!(
            l.check("bob", Some("10.0.0.1"), now).await.unwrap(),
            RateDecision::Allowed
        );
    }

    #[test]
    fn prune_drops_full_buckets() {
        let l = limiter();
        let now = Utc::now();
        futures_block(l.check("alice", Some("10.0.0.1"), now));
        l.prune(now + chrono::Duration::hours(1));
        assert!(l.identifier_buckets.lock().unwrap().is_empty());
        assert!(l.source_buckets.lock().unwrap().is_empty());
    }

    fn futures_block<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
