//! Glimpse Core - draft, preview and commit pipeline
//!
//! Lets a caller see the effect of a generative request before anything
//! leaves the process:
//! - Previews a draft against a sampler, at most twice per lineage
//! - Degrades gracefully under latency (indicators, essence-only, staleness)
//! - Caches identical requests and coalesces them while in flight
//! - Retries transient backend failures with jittered backoff
//! - Asks structured clarifying questions for underspecified drafts
//! - Gates the single side effect behind an explicit commit
//!
//! # Example
//!
//! ```rust,ignore
//! use glimpse_core::prelude::*;
//!
//! # async fn example(sampler: std::sync::Arc<dyn Sampler>) -> GlimpseResult<()> {
//! let engine = GlimpseEngine::new(sampler, GlimpseConfig::default())?;
//! let lineage = engine.lineage();
//!
//! let draft = Draft::new("Tell customers about the new feature")
//!     .with_goal("announce")
//!     .with_constraint("tone", "professional");
//! let preview = lineage.preview(&draft).await?;
//! println!("{}: {}", preview.status, preview.essence);
//!
//! if preview.is_aligned() {
//!     lineage.commit(&draft, |d| async move { publish(d).await }).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod clarifier;
pub mod coalesce;
pub mod config;
pub mod divergence;
pub mod engine;
pub mod error;
pub mod essence;
pub mod latency;
pub mod lineage;
pub mod privacy;
pub mod retry;
pub mod sampler;
pub mod types;

pub use clarifier::{Clarifier, ClarifierDetector, Dimension};
pub use coalesce::{Coalesced, Coalescer, CoalescerStats};
pub use config::{CacheConfig, GlimpseConfig};
pub use divergence::{AnyChange, ConstraintChange, DivergenceStrategy, NeverDiverge};
pub use engine::{GlimpseEngine, GlimpseEngineBuilder};
pub use error::{classify, BackendError, FailureKind, GlimpseError, GlimpseResult, RetryError};
pub use essence::{degraded_essence, truncate_words, EssenceExtractor, TruncatingEssence};
pub use latency::{Indicator, LatencyBand, LatencyMonitor, LatencyThresholds, Progress};
pub use lineage::Lineage;
pub use privacy::PrivacyGuard;
pub use retry::{backoff_delay, jittered_delay, RetryCoordinator, RetryPolicy};
pub use sampler::Sampler;
pub use types::{
    AttemptMetrics, Constraints, Draft, LineageId, PreviewResult, PreviewStatus, SampleRequest,
    SamplerParams,
};

pub use glimpse_cache::{CacheStats, Fingerprint, PromptCache};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the engine
    pub use crate::{
        BackendError, Clarifier, Constraints, Draft, FailureKind, GlimpseConfig, GlimpseEngine,
        GlimpseError, GlimpseResult, Lineage, PreviewResult, PreviewStatus, SampleRequest,
        Sampler,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
