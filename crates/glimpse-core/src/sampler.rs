//! The one external capability the engine consumes
//!
//! A [`Sampler`] turns a normalized request into text. Implementations wrap
//! an LLM backend (or a test double) and report failures as
//! [`BackendError`]; the engine classifies and absorbs them.

use crate::error::BackendError;
use crate::types::SampleRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Generative backend
#[async_trait]
pub trait Sampler: Send + Sync {
    /// Produce text for a request
    ///
    /// `cancel` fires when the caller abandons the preview; implementations
    /// should stop work promptly. Any result returned after that is dropped.
    ///
    /// # Errors
    /// - `BackendError` describing the backend failure
    async fn sample(
        &self,
        request: &SampleRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError>;
}

#[async_trait]
impl<S: Sampler + ?Sized> Sampler for Arc<S> {
    async fn sample(
        &self,
        request: &SampleRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        (**self).sample(request, cancel).await
    }
}
