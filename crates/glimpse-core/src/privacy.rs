//! Privacy guard
//!
//! The commit effect is the only code path allowed to touch the outside
//! world. The guard runs it at most once per lineage. Previews never see the
//! effect: it is handed over only inside an explicit commit call.

use crate::error::{GlimpseError, GlimpseResult};
use crate::types::{Draft, LineageId};
use std::error::Error;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// At-most-once gate for a lineage's commit effect
#[derive(Debug, Default)]
pub struct PrivacyGuard {
    consumed: AtomicBool,
}

impl PrivacyGuard {
    /// Fresh, unconsumed guard
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the commit effect has been handed out
    #[inline]
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// Run `commit_fn` unless this lineage already committed
    ///
    /// The lineage is consumed before the effect runs, so a failing effect
    /// still cannot be retried on the same lineage.
    ///
    /// # Errors
    /// - `GlimpseError::AlreadyCommitted` on a second call
    /// - `GlimpseError::CommitFailed` if the effect itself fails
    pub async fn guard_commit<F, Fut, E>(
        &self,
        lineage: LineageId,
        draft: Draft,
        commit_fn: F,
    ) -> GlimpseResult<()>
    where
        F: FnOnce(Draft) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        if self.consumed.swap(true, Ordering::AcqRel) {
            return Err(GlimpseError::AlreadyCommitted {
                lineage: lineage.to_string(),
            });
        }
        commit_fn(draft)
            .await
            .map_err(|e| GlimpseError::CommitFailed(e.into()))
    }
}
