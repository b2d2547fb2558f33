//! Functional tests for backend failures, retries and latency handling.
//!
//! Backend failures never escape `preview`:
//! - Transient failures are retried with jittered backoff.
//! - Permanent failures degrade to an essence-only result at once.
//! - Timeouts and slow attempts surface as stale.

use glimpse_core::{
    BackendError, FailureKind, GlimpseConfig, LatencyBand, PreviewStatus, RetryPolicy,
};
use glimpse_test_utils::{aligned_draft, engine_with, fast_config, ScriptedSampler};
use std::sync::Arc;
use std::time::Duration;

/// Tenet: three rate-limit responses followed by success still align, and
/// the elapsed time reflects the three backoff waits (10, 20 and 40 ms plus
/// up to 50% jitter each).
#[tokio::test(start_paused = true)]
async fn rate_limited_calls_are_retried_to_alignment() {
    let sampler = Arc::new(
        ScriptedSampler::new()
            .then_status(429, 3)
            .then_ok("Dark mode is here"),
    );
    let engine = engine_with(sampler.clone(), fast_config());

    let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

    assert_eq!(result.status, PreviewStatus::Aligned);
    assert_eq!(result.sample, "Dark mode is here");
    assert_eq!(result.failure, None);
    assert_eq!(sampler.calls(), 4);
    assert!(result.elapsed_ms >= 70, "elapsed {}", result.elapsed_ms);
    assert!(result.elapsed_ms <= 106, "elapsed {}", result.elapsed_ms);
}

/// Tenet: with one-second base backoff the same script takes longer than
/// the staleness threshold, so the result is flagged stale.
#[tokio::test(start_paused = true)]
async fn slow_backoff_crosses_staleness_threshold() {
    let sampler = Arc::new(ScriptedSampler::new().then_status(429, 3).then_ok("late"));
    let engine = engine_with(sampler, GlimpseConfig::default());

    let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

    assert!(result.elapsed_ms >= 7_000);
    assert!(result.stale);
    assert_eq!(result.status, PreviewStatus::Stale);
    assert_eq!(result.latency, LatencyBand::Stale);
    assert_eq!(result.sample, "late");
}

/// Tenet: authentication failures are not retried and are flagged so the
/// caller can ask for fresh credentials.
#[tokio::test(start_paused = true)]
async fn authentication_failure_is_flagged() {
    let sampler = Arc::new(ScriptedSampler::new().then_status(401, 1));
    let engine = engine_with(sampler.clone(), fast_config());

    let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

    assert_eq!(result.status, PreviewStatus::NotAligned);
    assert_eq!(result.failure, Some(FailureKind::Authentication));
    assert!(result.needs_credentials());
    assert!(result.sample.is_empty());
    assert!(result
        .essence
        .starts_with("[essence-only fallback: authentication required]"));
    assert_eq!(sampler.calls(), 1);
}

/// Tenet: permanent failures degrade immediately and are never cached.
#[tokio::test(start_paused = true)]
async fn permanent_failures_degrade_without_caching() {
    for (code, kind) in [
        (400, FailureKind::BadRequest),
        (403, FailureKind::PermissionDenied),
        (404, FailureKind::NotFound),
        (422, FailureKind::Unprocessable),
    ] {
        let sampler = Arc::new(ScriptedSampler::new().then_status(code, 1));
        let engine = engine_with(sampler.clone(), fast_config());
        let lineage = engine.lineage();

        let failed = lineage.preview(&aligned_draft()).await.unwrap();
        assert_eq!(failed.status, PreviewStatus::NotAligned, "status {code}");
        assert_eq!(failed.failure, Some(kind));
        assert!(!failed.needs_credentials());

        let recovered = lineage.preview(&aligned_draft()).await.unwrap();
        assert_eq!(recovered.status, PreviewStatus::Aligned);
        assert!(!recovered.from_cache);
        assert_eq!(sampler.calls(), 2);
    }
}

/// Tenet: exhausting the retry budget on server errors yields the last
/// classified failure, not an error.
#[tokio::test(start_paused = true)]
async fn exhausted_server_errors_degrade() {
    let sampler = Arc::new(ScriptedSampler::new().then_status(503, 10));
    let config = fast_config().with_retry(
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_delays(Duration::from_millis(10), Duration::from_millis(100)),
    );
    let engine = engine_with(sampler.clone(), config);

    let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

    assert_eq!(result.status, PreviewStatus::NotAligned);
    assert_eq!(result.failure, Some(FailureKind::TransientServer));
    assert_eq!(sampler.calls(), 3);
}

/// Tenet: repeated timeouts are surfaced as stale.
#[tokio::test(start_paused = true)]
async fn timeouts_surface_as_stale() {
    let sampler = Arc::new(ScriptedSampler::new().with_delay(Duration::from_secs(5)));
    let retry = RetryPolicy {
        call_timeout_ms: 100,
        ..RetryPolicy::default()
            .with_max_attempts(2)
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
    };
    let engine = engine_with(sampler.clone(), fast_config().with_retry(retry));

    let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

    assert_eq!(result.status, PreviewStatus::Stale);
    assert!(result.stale);
    assert_eq!(result.failure, Some(FailureKind::Timeout));
    assert_eq!(sampler.calls(), 2);
}

/// Tenet: the stale flag tracks the fourth threshold exactly, whatever the
/// content.
#[tokio::test(start_paused = true)]
async fn stale_flag_follows_fourth_threshold() {
    for (delay_ms, expect_stale) in [(100, false), (1_000, false), (2_990, false), (3_010, true), (6_000, true)] {
        let sampler = Arc::new(ScriptedSampler::new().with_delay(Duration::from_millis(delay_ms)));
        let engine = engine_with(sampler, fast_config());

        let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

        assert_eq!(result.stale, expect_stale, "delay {delay_ms} ms");
        assert_eq!(result.status == PreviewStatus::Stale, expect_stale);
        assert_eq!(result.essence_offered, delay_ms >= 1_500);
    }
}

/// Tenet: per-attempt metrics record elapsed time, band and cache use.
#[tokio::test(start_paused = true)]
async fn attempt_metrics_are_recorded() {
    let sampler = Arc::new(ScriptedSampler::new().with_delay(Duration::from_millis(400)));
    let engine = engine_with(sampler, fast_config());
    let lineage = engine.lineage();

    lineage.preview(&aligned_draft()).await.unwrap();
    lineage.preview(&aligned_draft()).await.unwrap();

    let metrics = lineage.attempt_metrics();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].attempt, 1);
    assert_eq!(metrics[0].elapsed_ms, 400);
    assert_eq!(metrics[0].latency, LatencyBand::StillWorking);
    assert!(!metrics[0].from_cache);
    assert!(metrics[1].from_cache);
    assert_eq!(metrics[1].latency, LatencyBand::Fresh);
}

/// Tenet: transport errors are transient; the next call can succeed.
#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried() {
    let sampler = Arc::new(
        ScriptedSampler::new()
            .then_err(BackendError::Transport("connection reset".into()))
            .then_ok("recovered"),
    );
    let engine = engine_with(sampler.clone(), fast_config());

    let result = engine.lineage().preview(&aligned_draft()).await.unwrap();

    assert_eq!(result.sample, "recovered");
    assert_eq!(sampler.calls(), 2);
}
