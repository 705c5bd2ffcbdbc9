use crate::crypto::password::PasswordPolicy;
use anyhow::{Context, Result, bail};
use chrono::Duration;
use std::env;
use std::str::FromStr;

/// How a session is bound to client characteristics captured at mint time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPolicy {
    /// No binding checks.
    None,
    /// Exact match of the normalized user-agent; mismatch revokes.
    UaStrict,
    /// Revoke on IP prefix change; the reason is not disclosed.
    NetworkSoft,
}

impl FromStr for BindingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(BindingPolicy::None),
            "ua_strict" => Ok(BindingPolicy::UaStrict),
            "network_soft" => Ok(BindingPolicy::NetworkSoft),
            other => bail!("unknown binding policy: {other}"),
        }
    }
}

/// Token-bucket capacities for login admission.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Refill rate of the per-identifier bucket, tokens per second.
    pub per_identifier_rps: f64,
    /// Refill rate of the per-source bucket, tokens per second.
    pub per_source_rps: f64,
    /// Maximum tokens the per-identifier bucket can hold.
    pub burst: u32,
    /// Maximum tokens the per-source bucket can hold. A source serves many
    /// identifiers, so this is sized well above `burst`.
    pub source_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_identifier_rps: 1.0,
            per_source_rps: 10.0,
            burst: 5,
            source_burst: 50,
        }
    }
}

/// The service's configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sliding-expiry window: a session dies this long after last use.
    pub idle_ttl: Duration,
    /// Hard cap on session lifetime from creation, unaffected by use.
    pub absolute_ttl: Duration,
    /// Minimum idle time before a validate refreshes `expires_at`.
    pub refresh_threshold: Duration,
    /// Argon2 cost policy for new verifiers.
    pub hash: PasswordPolicy,
    /// Session-to-client binding policy.
    pub binding_policy: BindingPolicy,
    /// Login admission buckets.
    pub rate_limit: RateLimitConfig,
    /// Queue depth of the blocking pool that runs password hashes.
    pub hash_queue_depth: usize,
    /// Interval between garbage-collection passes.
    pub sweep_interval: std::time::Duration,
    /// How long expired rows are kept before the sweeper deletes them.
    pub retention_after_expiry: Duration,
    /// Deadline applied around every store operation.
    pub store_timeout: std::time::Duration,
    /// Emit `SameSite=Strict` cookies instead of the default `Lax`.
    pub cookie_same_site_strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        let idle_ttl = Duration::minutes(30);
        Self {
            idle_ttl,
            absolute_ttl: Duration::hours(12),
            refresh_threshold: idle_ttl / 3,
            hash: PasswordPolicy::default(),
            binding_policy: BindingPolicy::UaStrict,
            rate_limit: RateLimitConfig::default(),
            hash_queue_depth: 64,
            sweep_interval: std::time::Duration::from_secs(300),
            retention_after_expiry: Duration::hours(24),
            store_timeout: std::time::Duration::from_secs(5),
            cookie_same_site_strict: false,
        }
    }
}

impl Config {
    /// Builds a `Config` from environment variables, falling back to the
    /// defaults above for anything unset.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let idle_ttl = env_secs("AUTH_IDLE_TTL_SECS")?.unwrap_or(defaults.idle_ttl);
        let refresh_threshold =
            env_secs("AUTH_REFRESH_THRESHOLD_SECS")?.unwrap_or(idle_ttl / 3);

        let binding_policy = match env::var("AUTH_BINDING_POLICY") {
            Ok(v) => v.parse().context("invalid AUTH_BINDING_POLICY")?,
            Err(_) => defaults.binding_policy,
        };

        let rate_limit = RateLimitConfig {
            per_identifier_rps: env_parse("AUTH_RATE_PER_IDENTIFIER_RPS")?
                .unwrap_or(defaults.rate_limit.per_identifier_rps),
            per_source_rps: env_parse("AUTH_RATE_PER_SOURCE_RPS")?
                .unwrap_or(defaults.rate_limit.per_source_rps),
            burst: env_parse("AUTH_RATE_BURST")?.unwrap_or(defaults.rate_limit.burst),
            source_burst: env_parse("AUTH_RATE_SOURCE_BURST")?
                .unwrap_or(defaults.rate_limit.source_burst),
        };

        let hash = PasswordPolicy {
            memory_kib: env_parse("AUTH_ARGON2_MEMORY_KIB")?.unwrap_or(defaults.hash.memory_kib),
            iterations: env_parse("AUTH_ARGON2_ITERATIONS")?.unwrap_or(defaults.hash.iterations),
            parallelism: env_parse("AUTH_ARGON2_PARALLELISM")?
                .unwrap_or(defaults.hash.parallelism),
        };

        let cfg = Self {
            idle_ttl,
            absolute_ttl: env_secs("AUTH_ABSOLUTE_TTL_SECS")?.unwrap_or(defaults.absolute_ttl),
            refresh_threshold,
            hash,
            binding_policy,
            rate_limit,
            hash_queue_depth: env_parse("AUTH_HASH_QUEUE_DEPTH")?
                .unwrap_or(defaults.hash_queue_depth),
            sweep_interval: env_parse("AUTH_SWEEP_INTERVAL_SECS")?
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            retention_after_expiry: env_secs("AUTH_RETENTION_AFTER_EXPIRY_SECS")?
                .unwrap_or(defaults.retention_after_expiry),
            store_timeout: env_parse("AUTH_STORE_TIMEOUT_SECS")?
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.store_timeout),
            cookie_same_site_strict: env_parse("AUTH_COOKIE_SAMESITE_STRICT")?
                .unwrap_or(defaults.cookie_same_site_strict),
        };
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> Result<()> {
        if self.idle_ttl <= Duration::zero() || self.absolute_ttl <= Duration::zero() {
            bail!("session TTLs must be positive");
        }
        if self.absolute_ttl < self.idle_ttl {
            bail!("absolute_ttl must be at least idle_ttl");
        }
        if self.hash_queue_depth == 0 {
            bail!("hash_queue_depth must be at least 1");
        }
        Ok(())
    }
}

fn env_secs(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<i64>(key)?.map(Duration::seconds))
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) => Ok(Some(
            v.parse::<T>().with_context(|| format!("invalid {key}"))?,
        )),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.refresh_threshold, cfg.idle_ttl / 3);
        assert!(cfg.absolute_ttl > cfg.idle_ttl);
        assert!(cfg.check().is_ok());
    }

    #[test]
    fn binding_policy_parses() {
        assert_eq!(
            "ua_strict".parse::<BindingPolicy>().unwrap(),
            BindingPolicy::UaStrict
        );
        assert_eq!("none".parse::<BindingPolicy>().unwrap(), BindingPolicy::None);
        assert!("ip_hard".parse::<BindingPolicy>().is_err());
    }

    #[test]
    fn absolute_ttl_below_idle_is_rejected() {
        let cfg = Config {
            absolute_ttl: Duration::minutes(5),
            ..Config::default()
        };
        assert!(cfg.check().is_err());
    }
}
