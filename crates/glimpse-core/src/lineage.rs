//! Draft lineages
//!
//! A lineage is the sequence of preview attempts for one draft, ending in a
//! commit or a redial. It owns the per-draft state machine:
//!
//! ```text
//!   (none) --preview--> aligned | not_aligned | stale
//!      ^                      |
//!      +------ preview -------+   (at most two attempts)
//!
//!   third preview --> redial (terminal)
//!   commit        --> committed (terminal)
//! ```
//!
//! Overlapping previews on one lineage are treated as "the caller kept
//! typing": the newer call cancels the older one, waits the debounce, then
//! samples. Abandoned attempts never count toward the cap and never appear
//! in the status history.

use crate::clarifier::Clarifier;
use crate::divergence::describe_changes;
use crate::engine::{EngineShared, Sampled};
use crate::error::{FailureKind, GlimpseError, GlimpseResult, RetryError};
use crate::latency::{Indicator, LatencyBand, Progress};
use crate::privacy::PrivacyGuard;
use crate::types::{AttemptMetrics, Draft, LineageId, PreviewResult, PreviewStatus};
use chrono::Utc;
use parking_lot::Mutex;
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Mutable per-lineage state; never held across an await
#[derive(Debug, Default)]
struct LineageState {
    /// Bumped whenever a preview starts; detects superseded attempts
    generation: u64,
    in_flight: Option<CancellationToken>,
    /// Set once a commit passes its gate; previews are refused from then on
    committing: bool,
    completed_attempts: u32,
    history: Vec<PreviewStatus>,
    previous: Option<Draft>,
    last_aligned: Option<Draft>,
    redial: Option<PreviewResult>,
    essence_only: bool,
    metrics: Vec<AttemptMetrics>,
}

#[derive(Debug)]
struct LineageInner {
    id: LineageId,
    engine: Arc<EngineShared>,
    state: Mutex<LineageState>,
    guard: PrivacyGuard,
    progress: watch::Sender<Progress>,
}

/// Handle to one draft lineage
///
/// Clones refer to the same lineage, so a UI can hold one clone to call
/// [`Lineage::cancel`] while another awaits [`Lineage::preview`].
#[derive(Debug, Clone)]
pub struct Lineage {
    inner: Arc<LineageInner>,
}

/// Ticket for one started attempt
struct Ticket {
    attempt: u32,
    generation: u64,
    token: CancellationToken,
    superseded: bool,
}

enum Start {
    Run(Ticket),
    Done(PreviewResult),
}

impl Lineage {
    pub(crate) fn new(engine: Arc<EngineShared>, essence_only: bool) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            inner: Arc::new(LineageInner {
                id: LineageId::new(),
                engine,
                state: Mutex::new(LineageState {
                    essence_only,
                    ..LineageState::default()
                }),
                guard: PrivacyGuard::new(),
                progress,
            }),
        }
    }

    /// Lineage id
    #[inline]
    #[must_use]
    pub fn id(&self) -> LineageId {
        self.inner.id
    }

    /// Preview a draft
    ///
    /// Backend failures never surface here: they become degraded results.
    ///
    /// # Errors
    /// - `GlimpseError::EmptyInput` for a draft without input text
    /// - `GlimpseError::LineageCommitted` after a commit
    /// - `GlimpseError::Superseded` if a newer preview replaced this one
    /// - `GlimpseError::Cancelled` if [`Lineage::cancel`] fired first
    #[tracing::instrument(skip_all, fields(lineage = %self.inner.id))]
    pub async fn preview(&self, draft: &Draft) -> GlimpseResult<PreviewResult> {
        draft.validate()?;
        let engine = &self.inner.engine;

        let clarifiers: Vec<Clarifier> = engine.detector.detect_ambiguity(draft).collect();
        let request = engine.request_for(draft, &clarifiers);
        let fingerprint = request.fingerprint()?;

        let ticket = match self.start_attempt(draft)? {
            Start::Run(ticket) => ticket,
            Start::Done(result) => return Ok(result),
        };

        if ticket.superseded && engine.config.debounce_ms > 0 {
            tokio::select! {
                biased;
                () = ticket.token.cancelled() => return Err(self.abandoned(ticket.generation)),
                () = tokio::time::sleep(engine.config.debounce()) => {}
            }
        }

        tracing::info!(attempt = ticket.attempt, "preview started");
        let started = Instant::now();
        self.publish(Progress {
            attempt: ticket.attempt,
            band: Some(LatencyBand::Fresh),
            in_flight: true,
        });

        let work = engine.sample(&request, fingerprint, &ticket.token);
        tokio::pin!(work);
        let outcome = loop {
            let deadline = engine
                .monitor
                .next_boundary(started.elapsed())
                .map(|boundary| started + boundary);
            tokio::select! {
                biased;
                () = ticket.token.cancelled() => break None,
                outcome = &mut work => break Some(outcome),
                () = tokio::time::sleep_until(deadline.unwrap_or(started)), if deadline.is_some() => {
                    let band = engine.monitor.classify(started.elapsed());
                    tracing::debug!(attempt = ticket.attempt, ?band, "latency band reached");
                    self.publish(Progress {
                        attempt: ticket.attempt,
                        band: Some(band),
                        in_flight: true,
                    });
                }
            }
        };
        let elapsed = started.elapsed();

        let Some(outcome) = outcome else {
            return Err(self.abandoned(ticket.generation));
        };

        let result = {
            let mut state = self.inner.state.lock();
            if state.generation != ticket.generation {
                return Err(self.superseded());
            }
            if ticket.token.is_cancelled() {
                return Err(self.cancelled());
            }
            state.in_flight = None;
            self.finish_attempt(&mut state, &ticket, draft, clarifiers, outcome, elapsed, fingerprint)?
        };

        self.publish(Progress {
            attempt: result.attempt,
            band: Some(result.latency),
            in_flight: false,
        });
        metrics::counter!("glimpse_previews_total", "status" => result.status.as_str()).increment(1);
        metrics::histogram!("glimpse_preview_elapsed_ms").record(elapsed.as_secs_f64() * 1_000.0);
        tracing::info!(
            attempt = result.attempt,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            from_cache = result.from_cache,
            stale = result.stale,
            "preview finished"
        );
        Ok(result)
    }

    /// Commit a draft after an aligned preview
    ///
    /// `effect` is the only code that may touch the outside world. It runs
    /// at most once per lineage, and the lineage is consumed even if it
    /// fails.
    ///
    /// # Errors
    /// - `GlimpseError::EmptyInput` for a draft without input text
    /// - `GlimpseError::AlreadyCommitted` on a second commit
    /// - `GlimpseError::NoPriorAlignedPreview` if no preview was aligned
    /// - `GlimpseError::CommitFailed` if `effect` fails
    pub async fn commit<F, Fut, E>(&self, draft: &Draft, effect: F) -> GlimpseResult<()>
    where
        F: FnOnce(Draft) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.commit_gated(draft, effect, false).await
    }

    /// Commit without requiring an aligned preview
    ///
    /// # Errors
    /// - As [`Lineage::commit`], minus `NoPriorAlignedPreview`
    pub async fn commit_with_override<F, Fut, E>(&self, draft: &Draft, effect: F) -> GlimpseResult<()>
    where
        F: FnOnce(Draft) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        self.commit_gated(draft, effect, true).await
    }

    #[tracing::instrument(skip_all, fields(lineage = %self.inner.id, overridden = allow_unaligned))]
    async fn commit_gated<F, Fut, E>(
        &self,
        draft: &Draft,
        effect: F,
        allow_unaligned: bool,
    ) -> GlimpseResult<()>
    where
        F: FnOnce(Draft) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        draft.validate()?;
        let last_aligned = self.begin_commit(allow_unaligned)?;

        if let Some(aligned) = last_aligned.filter(|aligned| aligned != draft) {
            tracing::warn!(
                changes = %describe_changes(&aligned, draft).unwrap_or_default(),
                "committing a draft that differs from the last aligned preview"
            );
        }

        self.inner
            .guard
            .guard_commit(self.inner.id, draft.clone(), effect)
            .await?;
        tracing::info!("lineage committed");
        Ok(())
    }

    /// Pass the commit gate and close the lineage to previews
    ///
    /// Runs under the state lock, so no preview can start between the gate
    /// check and the effect.
    fn begin_commit(&self, allow_unaligned: bool) -> GlimpseResult<Option<Draft>> {
        let mut state = self.inner.state.lock();
        if state.committing || self.inner.guard.is_consumed() {
            return Err(GlimpseError::AlreadyCommitted {
                lineage: self.inner.id.to_string(),
            });
        }
        if state.last_aligned.is_none() && !allow_unaligned {
            return Err(GlimpseError::NoPriorAlignedPreview {
                lineage: self.inner.id.to_string(),
            });
        }
        state.committing = true;
        if let Some(token) = state.in_flight.take() {
            token.cancel();
        }
        Ok(state.last_aligned.clone())
    }

    /// Abort the in-flight preview, if any
    pub fn cancel(&self) {
        let token = self.inner.state.lock().in_flight.take();
        if let Some(token) = token {
            token.cancel();
            tracing::info!(lineage = %self.inner.id, "in-flight preview cancelled");
        }
    }

    /// Withhold samples from results produced from now on
    pub fn set_essence_only(&self, enabled: bool) {
        self.inner.state.lock().essence_only = enabled;
        tracing::info!(lineage = %self.inner.id, enabled, "essence-only mode changed");
    }

    /// Whether samples are withheld
    #[must_use]
    pub fn essence_only(&self) -> bool {
        self.inner.state.lock().essence_only
    }

    /// Surfaced (non-abandoned, non-redial) attempts so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.state.lock().completed_attempts
    }

    /// Every status surfaced on this lineage, in initiation order
    #[must_use]
    pub fn status_history(&self) -> Vec<PreviewStatus> {
        self.inner.state.lock().history.clone()
    }

    /// Elapsed-time record of each surfaced attempt
    #[must_use]
    pub fn attempt_metrics(&self) -> Vec<AttemptMetrics> {
        self.inner.state.lock().metrics.clone()
    }

    /// Whether a preview is in flight
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    /// Whether the commit effect has run
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.inner.guard.is_consumed()
    }

    /// Whether the lineage hit its attempt cap
    #[must_use]
    pub fn is_redialed(&self) -> bool {
        self.inner.state.lock().redial.is_some()
    }

    /// Live progress of the current attempt
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.inner.progress.subscribe()
    }

    /// Indicators to show for the current attempt
    #[must_use]
    pub fn indicators(&self) -> &'static [Indicator] {
        let progress = *self.inner.progress.borrow();
        match progress.band {
            Some(band) if progress.in_flight => band.indicators(),
            _ => &[],
        }
    }

    fn start_attempt(&self, draft: &Draft) -> GlimpseResult<Start> {
        let engine = &self.inner.engine;
        let mut state = self.inner.state.lock();

        if state.committing || self.inner.guard.is_consumed() {
            return Err(GlimpseError::LineageCommitted {
                lineage: self.inner.id.to_string(),
            });
        }
        if let Some(redial) = &state.redial {
            return Ok(Start::Done(redial.clone()));
        }
        if state.completed_attempts >= engine.config.max_attempts_per_lineage {
            return Ok(Start::Done(self.redial(&mut state, draft)));
        }

        let superseded = match state.in_flight.take() {
            Some(previous) => {
                previous.cancel();
                tracing::warn!(lineage = %self.inner.id, "superseding in-flight preview");
                true
            }
            None => false,
        };
        state.generation += 1;
        let token = CancellationToken::new();
        state.in_flight = Some(token.clone());

        Ok(Start::Run(Ticket {
            attempt: state.completed_attempts + 1,
            generation: state.generation,
            token,
            superseded,
        }))
    }

    fn redial(&self, state: &mut LineageState, draft: &Draft) -> PreviewResult {
        let engine = &self.inner.engine;
        state.history.push(PreviewStatus::Redial);
        let result = PreviewResult {
            lineage_id: self.inner.id,
            attempt: state.completed_attempts + 1,
            status: PreviewStatus::Redial,
            sample: String::new(),
            essence: engine.essence.essence(draft, ""),
            delta: Some(format!(
                "attempt limit of {} reached; start a new lineage",
                engine.config.max_attempts_per_lineage
            )),
            stale: false,
            status_history: state.history.clone(),
            clarifiers: Vec::new(),
            latency: LatencyBand::Fresh,
            essence_offered: false,
            elapsed_ms: 0,
            failure: None,
            from_cache: false,
            fingerprint: None,
            generated_at: Utc::now(),
        };
        state.redial = Some(result.clone());
        metrics::counter!("glimpse_previews_total", "status" => PreviewStatus::Redial.as_str()).increment(1);
        tracing::info!(lineage = %self.inner.id, attempt = result.attempt, "lineage redialed");
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_attempt(
        &self,
        state: &mut LineageState,
        ticket: &Ticket,
        draft: &Draft,
        clarifiers: Vec<Clarifier>,
        outcome: Result<Sampled, RetryError>,
        elapsed: std::time::Duration,
        fingerprint: glimpse_cache::Fingerprint,
    ) -> GlimpseResult<PreviewResult> {
        let engine = &self.inner.engine;
        let latency = engine.monitor.classify(elapsed);

        let (mut status, text, essence, delta, failure, from_cache) = match outcome {
            Ok(Sampled { text, from_cache }) => {
                let essence = engine.essence.essence(draft, &text);
                let (status, delta) = if let Some(first) = clarifiers.first() {
                    (PreviewStatus::NotAligned, Some(first.prompt()))
                } else if let Some(why) = state
                    .previous
                    .as_ref()
                    .and_then(|previous| engine.divergence.diverges(previous, draft))
                {
                    (PreviewStatus::NotAligned, Some(why))
                } else {
                    let delta = state
                        .previous
                        .as_ref()
                        .and_then(|previous| describe_changes(previous, draft));
                    (PreviewStatus::Aligned, delta)
                };
                (status, text.to_string(), essence, delta, None, from_cache)
            }
            Err(RetryError::Failed { kind, attempts, message }) => {
                tracing::warn!(attempt = ticket.attempt, %kind, calls = attempts, %message, "sampling failed");
                let status = if kind == FailureKind::Timeout {
                    PreviewStatus::Stale
                } else {
                    PreviewStatus::NotAligned
                };
                let delta = if kind.needs_credentials() {
                    format!("sampling failed ({kind}); refresh credentials and preview again")
                } else {
                    format!("sampling failed ({kind}); showing essence only")
                };
                (
                    status,
                    String::new(),
                    engine.essence.degraded(draft, kind),
                    Some(delta),
                    Some(kind),
                    false,
                )
            }
            Err(RetryError::Cancelled { .. }) => return Err(self.cancelled()),
        };

        if latency.is_stale() {
            status = PreviewStatus::Stale;
        }
        let stale = status == PreviewStatus::Stale;
        let sample = if state.essence_only { String::new() } else { text };
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        state.completed_attempts += 1;
        state.history.push(status);
        state.previous = Some(draft.clone());
        if status == PreviewStatus::Aligned {
            state.last_aligned = Some(draft.clone());
        }
        state.metrics.push(AttemptMetrics {
            attempt: ticket.attempt,
            status,
            elapsed_ms,
            latency,
            from_cache,
        });

        Ok(PreviewResult {
            lineage_id: self.inner.id,
            attempt: ticket.attempt,
            status,
            sample,
            essence,
            delta,
            stale,
            status_history: state.history.clone(),
            clarifiers,
            latency,
            essence_offered: latency.offers_essence_only(),
            elapsed_ms,
            failure,
            from_cache,
            fingerprint: Some(fingerprint),
            generated_at: Utc::now(),
        })
    }

    fn publish(&self, progress: Progress) {
        self.inner.progress.send_replace(progress);
    }

    /// Error for an attempt that stopped before producing a result
    fn abandoned(&self, generation: u64) -> GlimpseError {
        if self.inner.state.lock().generation == generation {
            let last = *self.inner.progress.borrow();
            self.publish(Progress {
                in_flight: false,
                ..last
            });
            self.cancelled()
        } else {
            self.superseded()
        }
    }

    fn superseded(&self) -> GlimpseError {
        GlimpseError::Superseded {
            lineage: self.inner.id.to_string(),
        }
    }

    fn cancelled(&self) -> GlimpseError {
        GlimpseError::Cancelled {
            lineage: self.inner.id.to_string(),
        }
    }
}
