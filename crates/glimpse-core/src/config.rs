//! Engine configuration
//!
//! Every knob has a default, so an empty TOML document is a valid
//! configuration. Load with [`GlimpseConfig::from_toml_str`] or
//! [`GlimpseConfig::from_file`]; both validate before returning.
//!
//! ```toml
//! debounce_ms = 150
//! max_concurrent_samples = 5
//!
//! [latency]
//! t1_ms = 300
//! t2_ms = 800
//! t3_ms = 1500
//! t4_ms = 3000
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 1000
//! max_delay_ms = 60000
//! jitter_ceiling = 0.5
//!
//! [cache]
//! capacity = 1024
//! ttl_secs = 300
//! ```

use crate::coalesce::DEFAULT_MAX_CONCURRENT_SAMPLES;
use crate::error::{GlimpseError, GlimpseResult};
use crate::essence::DEFAULT_ESSENCE_WORDS;
use crate::latency::LatencyThresholds;
use crate::retry::RetryPolicy;
use crate::types::SamplerParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prompt cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum live entries
    pub capacity: u64,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// Entry lifetime as a duration
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: glimpse_cache::DEFAULT_CAPACITY,
            ttl_secs: glimpse_cache::DEFAULT_TTL.as_secs(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlimpseConfig {
    /// Latency thresholds
    pub latency: LatencyThresholds,
    /// Sampler retry policy
    pub retry: RetryPolicy,
    /// Prompt cache sizing
    pub cache: CacheConfig,
    /// Wait after superseding an in-flight preview before sampling
    pub debounce_ms: u64,
    /// Concurrent sampler calls across all lineages
    pub max_concurrent_samples: usize,
    /// Essence length in words
    pub essence_max_words: usize,
    /// Essence-only mode for new lineages
    pub essence_only: bool,
    /// Non-redial attempts per lineage
    pub max_attempts_per_lineage: u32,
    /// Model selection passed to the sampler
    pub sampler: SamplerParams,
}

impl Default for GlimpseConfig {
    fn default() -> Self {
        Self {
            latency: LatencyThresholds::default(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
            debounce_ms: 150,
            max_concurrent_samples: DEFAULT_MAX_CONCURRENT_SAMPLES,
            essence_max_words: DEFAULT_ESSENCE_WORDS,
            essence_only: false,
            max_attempts_per_lineage: 2,
            sampler: SamplerParams::default(),
        }
    }
}

impl GlimpseConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// - `GlimpseError::ConfigParse` on malformed TOML
    /// - `GlimpseError::InvalidConfig` if validation fails
    pub fn from_toml_str(text: &str) -> GlimpseResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// - `GlimpseError::ConfigIo` if the file cannot be read
    /// - otherwise as [`GlimpseConfig::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> GlimpseResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading glimpse configuration");
        Self::from_toml_str(&text)
    }

    /// Check every section
    ///
    /// # Errors
    /// - `GlimpseError::InvalidConfig` naming the first violated bound
    pub fn validate(&self) -> GlimpseResult<()> {
        self.latency.validate()?;
        self.retry.validate()?;
        if self.cache.capacity == 0 {
            return Err(GlimpseError::InvalidConfig("cache capacity must be positive".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(GlimpseError::InvalidConfig("cache ttl_secs must be positive".into()));
        }
        if self.cache.ttl() > glimpse_cache::MAX_TTL {
            return Err(GlimpseError::InvalidConfig(format!(
                "cache ttl_secs must not exceed {}",
                glimpse_cache::MAX_TTL.as_secs()
            )));
        }
        if self.max_concurrent_samples == 0 {
            return Err(GlimpseError::InvalidConfig(
                "max_concurrent_samples must be positive".into(),
            ));
        }
        if self.essence_max_words == 0 {
            return Err(GlimpseError::InvalidConfig("essence_max_words must be positive".into()));
        }
        if self.max_attempts_per_lineage == 0 {
            return Err(GlimpseError::InvalidConfig(
                "max_attempts_per_lineage must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Debounce as a duration
    #[inline]
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// With latency thresholds
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyThresholds) -> Self {
        self.latency = latency;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With cache sizing
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, capacity: u64, ttl: Duration) -> Self {
        self.cache = CacheConfig {
            capacity,
            ttl_secs: ttl.as_secs(),
        };
        self
    }

    /// With debounce
    #[inline]
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = u64::try_from(debounce.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With sampler concurrency limit
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_samples(mut self, max: usize) -> Self {
        self.max_concurrent_samples = max;
        self
    }

    /// With essence length
    #[inline]
    #[must_use]
    pub fn with_essence_max_words(mut self, words: usize) -> Self {
        self.essence_max_words = words;
        self
    }

    /// With essence-only default
    #[inline]
    #[must_use]
    pub fn with_essence_only(mut self, enabled: bool) -> Self {
        self.essence_only = enabled;
        self
    }

    /// With per-lineage attempt cap
    #[inline]
    #[must_use]
    pub fn with_max_attempts_per_lineage(mut self, max: u32) -> Self {
        self.max_attempts_per_lineage = max;
        self
    }

    /// With sampler parameters
    #[inline]
    #[must_use]
    pub fn with_sampler(mut self, sampler: SamplerParams) -> Self {
        self.sampler = sampler;
        self
    }
}
