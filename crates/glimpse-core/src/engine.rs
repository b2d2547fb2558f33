//! Glimpse engine
//!
//! The shared half of the orchestrator. One engine serves many independent
//! lineages; it owns everything that is safe to share between them:
//! - The prompt cache (the only mutable cross-lineage state)
//! - The sampler, behind the coalescer and its concurrency limit
//! - Read-only collaborators: latency monitor, retry coordinator,
//!   clarifier detector, essence extractor, divergence strategy
//!
//! Per-lineage state lives in [`Lineage`].

use crate::clarifier::{Clarifier, ClarifierDetector};
use crate::coalesce::{Coalescer, CoalescerStats};
use crate::config::GlimpseConfig;
use crate::divergence::{ConstraintChange, DivergenceStrategy};
use crate::error::{GlimpseResult, RetryError};
use crate::essence::{EssenceExtractor, TruncatingEssence};
use crate::latency::LatencyMonitor;
use crate::lineage::Lineage;
use crate::retry::RetryCoordinator;
use crate::sampler::Sampler;
use crate::types::{Draft, SampleRequest};
use glimpse_cache::{Fingerprint, PromptCache};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Text for a request and where it came from
#[derive(Debug, Clone)]
pub(crate) struct Sampled {
    pub(crate) text: Arc<str>,
    pub(crate) from_cache: bool,
}

/// State shared by the engine and all of its lineages
pub(crate) struct EngineShared {
    pub(crate) config: GlimpseConfig,
    pub(crate) cache: PromptCache,
    pub(crate) sampler: Arc<dyn Sampler>,
    pub(crate) detector: ClarifierDetector,
    pub(crate) essence: Arc<dyn EssenceExtractor>,
    pub(crate) divergence: Arc<dyn DivergenceStrategy>,
    pub(crate) monitor: LatencyMonitor,
    pub(crate) retry: RetryCoordinator,
    pub(crate) coalescer: Coalescer,
    pub(crate) essence_only: AtomicBool,
}

impl fmt::Debug for EngineShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineShared")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("essence", &self.essence)
            .field("divergence", &self.divergence.name())
            .field("coalescer", &self.coalescer)
            .finish_non_exhaustive()
    }
}

impl EngineShared {
    /// Normalized request for a draft, with clarifier defaults applied
    pub(crate) fn request_for(&self, draft: &Draft, clarifiers: &[Clarifier]) -> SampleRequest {
        SampleRequest::from_draft(
            draft,
            &self.config.sampler,
            clarifiers.iter().map(Clarifier::default_constraint),
        )
    }

    /// Cached text, or one coalesced, retried sampler call
    pub(crate) async fn sample(
        &self,
        request: &SampleRequest,
        fingerprint: Fingerprint,
        cancel: &CancellationToken,
    ) -> Result<Sampled, RetryError> {
        if let Some(text) = self.cache.get(&fingerprint).await {
            return Ok(Sampled {
                text,
                from_cache: true,
            });
        }

        let coalesced = self
            .coalescer
            .run(fingerprint, move || async move {
                let text = self
                    .retry
                    .call_with_backoff(cancel, |call| async move {
                        let _permit = self.coalescer.acquire().await?;
                        tracing::debug!(call, fingerprint = %fingerprint.short(), "calling sampler");
                        self.sampler.sample(request, cancel).await
                    })
                    .await?;
                let text: Arc<str> = Arc::from(text);
                self.cache.put_default(fingerprint, Arc::clone(&text)).await;
                Ok::<_, RetryError>(text)
            })
            .await?;

        Ok(Sampled {
            text: coalesced.value,
            from_cache: false,
        })
    }
}

/// Draft, preview and commit orchestrator
///
/// Cheap to clone; clones share the cache, sampler and limits.
///
/// # Example
///
/// ```rust,ignore
/// let engine = GlimpseEngine::new(sampler, GlimpseConfig::default())?;
/// let lineage = engine.lineage();
/// let result = lineage.preview(&draft).await?;
/// if result.is_aligned() {
///     lineage.commit(&draft, |draft| async move { send(draft).await }).await?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GlimpseEngine {
    shared: Arc<EngineShared>,
}

impl GlimpseEngine {
    /// Create engine with default collaborators
    ///
    /// # Errors
    /// - `GlimpseError::InvalidConfig` if `config` fails validation
    pub fn new(sampler: Arc<dyn Sampler>, config: GlimpseConfig) -> GlimpseResult<Self> {
        Self::builder(sampler).with_config(config).build()
    }

    /// Start building an engine around a sampler
    #[inline]
    #[must_use]
    pub fn builder(sampler: Arc<dyn Sampler>) -> GlimpseEngineBuilder {
        GlimpseEngineBuilder::new(sampler)
    }

    /// Open a fresh lineage
    #[must_use]
    pub fn lineage(&self) -> Lineage {
        let essence_only = self.shared.essence_only.load(Ordering::Acquire);
        let lineage = Lineage::new(Arc::clone(&self.shared), essence_only);
        tracing::info!(lineage = %lineage.id(), "lineage opened");
        lineage
    }

    /// Prompt cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &PromptCache {
        &self.shared.cache
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &GlimpseConfig {
        &self.shared.config
    }

    /// Latency classifier
    #[inline]
    #[must_use]
    pub fn latency_monitor(&self) -> &LatencyMonitor {
        &self.shared.monitor
    }

    /// Essence-only default for lineages opened from now on
    pub fn set_essence_only(&self, enabled: bool) {
        self.shared.essence_only.store(enabled, Ordering::Release);
        tracing::info!(enabled, "default essence-only mode changed");
    }

    /// Current essence-only default
    #[must_use]
    pub fn essence_only(&self) -> bool {
        self.shared.essence_only.load(Ordering::Acquire)
    }

    /// Clarifiers the engine would attach to a draft
    #[must_use]
    pub fn detect_ambiguity(&self, draft: &Draft) -> Vec<Clarifier> {
        self.shared.detector.detect_ambiguity(draft).collect()
    }

    /// Fingerprint the engine would cache a draft under
    ///
    /// # Errors
    /// - `GlimpseError::Fingerprint` if the request cannot be serialized
    pub fn fingerprint(&self, draft: &Draft) -> GlimpseResult<Fingerprint> {
        let clarifiers = self.detect_ambiguity(draft);
        Ok(self.shared.request_for(draft, &clarifiers).fingerprint()?)
    }

    /// Coalescer statistics
    #[must_use]
    pub fn coalescer_stats(&self) -> CoalescerStats {
        self.shared.coalescer.stats()
    }
}

/// Builder for [`GlimpseEngine`]
#[derive(Debug)]
pub struct GlimpseEngineBuilder {
    sampler: SamplerSlot,
    config: GlimpseConfig,
    cache: Option<PromptCache>,
    detector: ClarifierDetector,
    essence: Option<Arc<dyn EssenceExtractor>>,
    divergence: Arc<dyn DivergenceStrategy>,
}

struct SamplerSlot(Arc<dyn Sampler>);

impl fmt::Debug for SamplerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sampler")
    }
}

impl GlimpseEngineBuilder {
    /// Start with default configuration
    #[must_use]
    pub fn new(sampler: Arc<dyn Sampler>) -> Self {
        Self {
            sampler: SamplerSlot(sampler),
            config: GlimpseConfig::default(),
            cache: None,
            detector: ClarifierDetector::default(),
            essence: None,
            divergence: Arc::new(ConstraintChange),
        }
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: GlimpseConfig) -> Self {
        self.config = config;
        self
    }

    /// With an existing cache, shared with other engines
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: PromptCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// With clarifier detector
    #[inline]
    #[must_use]
    pub fn with_clarifier_detector(mut self, detector: ClarifierDetector) -> Self {
        self.detector = detector;
        self
    }

    /// With essence extractor
    #[inline]
    #[must_use]
    pub fn with_essence_extractor(mut self, essence: Arc<dyn EssenceExtractor>) -> Self {
        self.essence = Some(essence);
        self
    }

    /// With divergence strategy
    #[inline]
    #[must_use]
    pub fn with_divergence_strategy(mut self, divergence: Arc<dyn DivergenceStrategy>) -> Self {
        self.divergence = divergence;
        self
    }

    /// Validate configuration and build
    ///
    /// # Errors
    /// - `GlimpseError::InvalidConfig` if the configuration fails validation
    pub fn build(self) -> GlimpseResult<GlimpseEngine> {
        let config = self.config;
        config.validate()?;

        let cache = self
            .cache
            .unwrap_or_else(|| PromptCache::with_ttl(config.cache.capacity, config.cache.ttl()));
        let essence = self
            .essence
            .unwrap_or_else(|| Arc::new(TruncatingEssence::new(config.essence_max_words)));

        tracing::info!(
            capacity = config.cache.capacity,
            ttl_secs = config.cache.ttl_secs,
            max_concurrent_samples = config.max_concurrent_samples,
            divergence = self.divergence.name(),
            "glimpse engine ready"
        );

        Ok(GlimpseEngine {
            shared: Arc::new(EngineShared {
                monitor: LatencyMonitor::new(config.latency),
                retry: RetryCoordinator::new(config.retry),
                coalescer: Coalescer::new(config.max_concurrent_samples),
                essence_only: AtomicBool::new(config.essence_only),
                cache,
                sampler: self.sampler.0,
                detector: self.detector,
                essence,
                divergence: self.divergence,
                config,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::latency::LatencyThresholds;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Sampler for Counting {
        async fn sample(
            &self,
            request: &SampleRequest,
            _cancel: &CancellationToken,
        ) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sampled: {}", request.input_text))
        }
    }

    #[test]
    fn invalid_config_is_rejected_at_build() {
        let mut config = GlimpseConfig::default();
        config.latency = LatencyThresholds {
            t1_ms: 10,
            t2_ms: 5,
            t3_ms: 20,
            t4_ms: 30,
        };
        assert!(GlimpseEngine::new(Arc::new(Counting::default()), config).is_err());
    }

    #[test]
    fn fingerprint_includes_clarifier_defaults() {
        let engine = GlimpseEngine::new(Arc::new(Counting::default()), GlimpseConfig::default()).unwrap();
        let implicit = Draft::new("Do the thing");
        let explicit = Draft::new("Do the thing")
            .with_constraint("audience", "general")
            .with_constraint("tone", "neutral")
            .with_constraint("format", "paragraph")
            .with_constraint("length", "short");
        assert_eq!(
            engine.fingerprint(&implicit).unwrap(),
            engine.fingerprint(&explicit).unwrap()
        );
    }

    #[tokio::test]
    async fn shared_sample_path_fills_cache() {
        let sampler = Arc::new(Counting::default());
        let engine = GlimpseEngine::new(sampler.clone(), GlimpseConfig::default()).unwrap();
        let draft = Draft::new("Write a short friendly email to customers");
        let request = engine.shared.request_for(&draft, &[]);
        let fingerprint = request.fingerprint().unwrap();
        let token = CancellationToken::new();

        let first = engine.shared.sample(&request, fingerprint, &token).await.unwrap();
        let second = engine.shared.sample(&request, fingerprint, &token).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.text, second.text);
        assert_eq!(sampler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn essence_only_default_flows_to_new_lineages() {
        let engine = GlimpseEngine::new(Arc::new(Counting::default()), GlimpseConfig::default()).unwrap();
        assert!(!engine.lineage().essence_only());
        engine.set_essence_only(true);
        assert!(engine.lineage().essence_only());
    }
}
