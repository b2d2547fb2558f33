//! Testing utilities for the Glimpse workspace
//!
//! Sampler doubles, draft fixtures and commit effects shared by the
//! integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use glimpse_core::{
    BackendError, Draft, GlimpseConfig, GlimpseEngine, RetryPolicy, SampleRequest, Sampler,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sampler replaying a queue of scripted outcomes
///
/// Once the script runs dry every call succeeds with an echo of the
/// request. Each call waits `delay` first, giving up early on cancellation.
#[derive(Debug, Default)]
pub struct ScriptedSampler {
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    delay: Duration,
    calls: AtomicU32,
    requests: Mutex<Vec<SampleRequest>>,
}

impl ScriptedSampler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(text.into()));
        self
    }

    #[must_use]
    pub fn then_err(self, error: BackendError) -> Self {
        self.script.lock().push_back(Err(error));
        self
    }

    #[must_use]
    pub fn then_status(self, code: u16, times: usize) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(Err(BackendError::status(code, format!("scripted {code}"))));
            }
        }
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SampleRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Sampler for ScriptedSampler {
    async fn sample(
        &self,
        request: &SampleRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let outcome = self.script.lock().pop_front();

        if !self.delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(BackendError::Transport("cancelled".into())),
                () = tokio::time::sleep(self.delay) => {}
            }
        }
        outcome.unwrap_or_else(|| Ok(echo(request)))
    }
}

/// Sampler that echoes the request back, instantly
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoSampler;

#[async_trait]
impl Sampler for EchoSampler {
    async fn sample(
        &self,
        request: &SampleRequest,
        _cancel: &CancellationToken,
    ) -> Result<String, BackendError> {
        Ok(echo(request))
    }
}

fn echo(request: &SampleRequest) -> String {
    let constraints: Vec<String> = request
        .constraints
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("Preview of '{}' [{}]", request.input_text, constraints.join(", "))
}

/// Records every committed draft
#[derive(Debug, Clone, Default)]
pub struct RecordingEffect {
    committed: Arc<Mutex<Vec<Draft>>>,
}

impl RecordingEffect {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Effect closure that records and succeeds
    pub fn effect(&self) -> impl FnOnce(Draft) -> Ready<Result<(), Infallible>> {
        let committed = Arc::clone(&self.committed);
        move |draft| {
            committed.lock().push(draft);
            ready(Ok(()))
        }
    }

    /// Effect closure that records and then fails
    pub fn failing(&self) -> impl FnOnce(Draft) -> Ready<Result<(), std::io::Error>> {
        let committed = Arc::clone(&self.committed);
        move |draft| {
            committed.lock().push(draft);
            ready(Err(std::io::Error::other("downstream rejected the draft")))
        }
    }

    pub fn count(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn committed(&self) -> Vec<Draft> {
        self.committed.lock().clone()
    }
}

/// Draft that settles audience, tone, format and length
pub fn aligned_draft() -> Draft {
    Draft::new("Write a short friendly email to customers announcing dark mode")
        .with_goal("announce")
}

/// Announcement draft with only tone pinned
pub fn announcement_draft() -> Draft {
    Draft::new("Tell customers about the new feature")
        .with_goal("announce")
        .with_constraint("tone", "professional")
}

/// Bare request with no audience or tone
pub fn ambiguous_draft() -> Draft {
    Draft::new("Write an email")
}

/// Configuration with short backoff and no debounce
pub fn fast_config() -> GlimpseConfig {
    GlimpseConfig::default()
        .with_retry(
            RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_millis(1_000)),
        )
        .with_debounce(Duration::ZERO)
}

/// Engine over a shared sampler
pub fn engine_with(sampler: Arc<dyn Sampler>, config: GlimpseConfig) -> GlimpseEngine {
    GlimpseEngine::new(sampler, config).expect("test config is valid")
}
