//! Engine configuration.
//!
//! All tunables live in [`EngineConfig`]. Defaults match the documented
//! behaviour (100-entry cache, 5 minute TTL, 15 minute sync interval) and can
//! be overridden from `OFFSYNC_*` environment variables.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default read-cache capacity.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Default read-cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Share of entries evicted when the cache is full.
pub const DEFAULT_EVICTION_FRACTION: f64 = 0.2;

/// Default periodic sync interval.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How long the last background sync result stays in the cache table.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Bounded TTL cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Nominal maximum number of entries
    pub capacity: usize,
    /// Lifetime applied by `set` when no explicit TTL is given
    pub default_ttl: Duration,
    /// Fraction of entries evicted (oldest first) when full
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            default_ttl: DEFAULT_CACHE_TTL,
            eviction_fraction: DEFAULT_EVICTION_FRACTION,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("cache capacity must be at least 1".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::InvalidConfig("cache TTL must be positive".into()));
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "eviction fraction must be in (0, 1], got {}",
                self.eviction_fraction
            )));
        }
        Ok(())
    }
}

/// What the engine does with a detected write/write conflict.
///
/// Both policies push the local edit over the newer remote copy; they only
/// differ in whether `SyncResult::conflicts` reflects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictReporting {
    /// Log a warning, leave the counter at zero
    #[default]
    Silent,
    /// Log a warning and increment the counter
    Counted,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub conflict_reporting: ConflictReporting,
}

/// Exponential backoff for retrying a failed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound on any delay
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// When the trigger coordinator runs reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    /// Periodic sync interval while online
    pub interval: Duration,
    /// Retry policy after a failed run; `None` waits for the next tick
    pub retry: Option<RetryPolicy>,
    /// Lifetime of the persisted `last_sync_result` entry
    pub result_ttl: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            retry: Some(RetryPolicy::default()),
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

impl TriggerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("sync interval must be positive".into()));
        }
        if let Some(retry) = &self.retry {
            if retry.base.is_zero() || retry.max < retry.base {
                return Err(Error::InvalidConfig(
                    "retry base must be positive and not exceed retry max".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub trigger: TriggerConfig,
}

impl EngineConfig {
    /// Load configuration from `OFFSYNC_*` environment variables, falling back
    /// to defaults for anything unset.
    ///
    /// - `OFFSYNC_CACHE_CAPACITY`
    /// - `OFFSYNC_CACHE_TTL_SECS`
    /// - `OFFSYNC_SYNC_INTERVAL_SECS`
    /// - `OFFSYNC_RETRY_BASE_SECS` / `OFFSYNC_RETRY_MAX_SECS` (`0` disables retry)
    /// - `OFFSYNC_COUNT_CONFLICTS` (`true`/`false`)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(capacity) = env_parse::<usize>("OFFSYNC_CACHE_CAPACITY")? {
            config.cache.capacity = capacity;
        }
        if let Some(secs) = env_parse::<u64>("OFFSYNC_CACHE_TTL_SECS")? {
            config.cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("OFFSYNC_SYNC_INTERVAL_SECS")? {
            config.trigger.interval = Duration::from_secs(secs);
        }

        let base = env_parse::<u64>("OFFSYNC_RETRY_BASE_SECS")?;
        let max = env_parse::<u64>("OFFSYNC_RETRY_MAX_SECS")?;
        if base == Some(0) {
            config.trigger.retry = None;
        } else if base.is_some() || max.is_some() {
            let defaults = RetryPolicy::default();
            config.trigger.retry = Some(RetryPolicy {
                base: base.map(Duration::from_secs).unwrap_or(defaults.base),
                max: max.map(Duration::from_secs).unwrap_or(defaults.max),
            });
        }

        if let Some(count) = env_parse::<bool>("OFFSYNC_COUNT_CONFLICTS")? {
            config.sync.conflict_reporting = if count {
                ConflictReporting::Counted
            } else {
                ConflictReporting::Silent
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.trigger.validate()
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}
