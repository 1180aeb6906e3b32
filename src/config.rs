//! Application configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::kernel::tiers::{Tier, TierLimits, TierTable};

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub tiers: TierTable,
    pub safety_key_ttl: Duration,
    pub store_call_timeout: Duration,
    pub worker_pool_size: usize,
    pub progress_interval: u64,
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// spec defaults for anything not overridden.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let defaults = TierTable::default();
        let tiers = TierTable::new(vec![
            tier_limits_from_env("SMALL", &defaults, Tier::Small)?,
            tier_limits_from_env("MEDIUM", &defaults, Tier::Medium)?,
            tier_limits_from_env("LARGE", &defaults, Tier::Large)?,
            tier_limits_from_env("XL", &defaults, Tier::Xl)?,
        ]);

        Ok(Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env_parse_or("PORT", 8080)?,
            tiers,
            safety_key_ttl: Duration::from_secs(env_parse_or("SAFETY_KEY_TTL_SECONDS", 900)?),
            store_call_timeout: Duration::from_millis(env_parse_or(
                "STORE_CALL_TIMEOUT_MS",
                1_000,
            )?),
            worker_pool_size: env_parse_or("WORKER_POOL_SIZE", default_worker_pool_size())?,
            progress_interval: env_parse_or("PROGRESS_INTERVAL", 1)?,
            sweep_interval: Duration::from_secs(env_parse_or("SWEEP_INTERVAL_SECONDS", 60)?),
        })
    }
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be valid: {e}")),
        Err(_) => Ok(default),
    }
}

fn tier_limits_from_env(prefix: &str, defaults: &TierTable, tier: Tier) -> Result<TierLimits> {
    let default_limits = defaults.limits(tier);

    let max_count = match env::var(format!("{prefix}_MAX_COUNT")) {
        Ok(raw) => Some(
            raw.parse()
                .with_context(|| format!("{prefix}_MAX_COUNT must be a positive integer"))?,
        ),
        Err(_) => default_limits.max_count,
    };

    Ok(TierLimits {
        tier,
        max_count,
        max_concurrent: env_parse_or(
            &format!("{prefix}_MAX_CONCURRENT"),
            default_limits.max_concurrent,
        )?,
        cooldown_seconds: env_parse_or(
            &format!("{prefix}_COOLDOWN_SECONDS"),
            default_limits.cooldown_seconds,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_overrides_fall_back_to_spec_defaults() {
        let defaults = TierTable::default();
        let limits = tier_limits_from_env("NOPE_PREFIX_UNSET", &defaults, Tier::Small).unwrap();
        assert_eq!(limits.max_concurrent, 10);
        assert_eq!(limits.cooldown_seconds, 5);
        assert_eq!(limits.max_count, Some(100));
    }
}
