//! Glimpse prompt cache
//!
//! Avoids duplicate backend calls for identical previews.
//!
//! # Core Concepts
//!
//! - [`Fingerprint`]: 32-byte Blake3 digest of a normalized request
//! - [`PromptCache`]: bounded LRU keyed by fingerprint, with per-entry expiry
//!   checked at read time
//!
//! # Example
//!
//! ```rust,ignore
//! use glimpse_cache::{Fingerprint, PromptCache};
//! use std::time::Duration;
//!
//! let cache = PromptCache::new(1_024);
//! let fp = Fingerprint::compute(b"normalized request");
//! cache.put(fp, "sampled text", Duration::from_secs(300)).await;
//! assert!(cache.get(&fp).await.is_some());
//! println!("hit rate: {:.2}", cache.hit_rate());
//! ```

#![warn(unreachable_pub)]

pub mod cache;
pub mod fingerprint;

pub use cache::{CacheEntry, CacheStats, PromptCache, DEFAULT_CAPACITY, DEFAULT_TTL, MAX_TTL};
pub use fingerprint::{Fingerprint, FingerprintError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
