//! Functional tests for loading engine configuration from disk.

use glimpse_core::{GlimpseConfig, GlimpseEngine, GlimpseError, PreviewStatus};
use glimpse_test_utils::{aligned_draft, EchoSampler};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

/// Tenet: a TOML file overrides only the settings it names.
#[test]
fn file_overrides_named_settings() {
    let file = write_config(
        r#"
        debounce_ms = 25
        essence_only = true

        [cache]
        capacity = 16
        ttl_secs = 60

        [retry]
        max_attempts = 3
        "#,
    );

    let config = GlimpseConfig::from_file(file.path()).unwrap();

    assert_eq!(config.debounce(), Duration::from_millis(25));
    assert!(config.essence_only);
    assert_eq!(config.cache.capacity, 16);
    assert_eq!(config.cache.ttl(), Duration::from_secs(60));
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.base_delay_ms, 1_000);
    assert_eq!(config.latency.t1_ms, 300);
}

/// Tenet: a missing file is an I/O error, not a silent default.
#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let result = GlimpseConfig::from_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(GlimpseError::ConfigIo(_))));
}

/// Tenet: out-of-range values are rejected at load time.
#[test]
fn invalid_values_are_rejected() {
    let file = write_config("[retry]\njitter_ceiling = 2.0\n");
    let result = GlimpseConfig::from_file(file.path());
    assert!(matches!(result, Err(GlimpseError::InvalidConfig(_))));
}

/// Tenet: a loaded configuration drives the engine it builds.
#[tokio::test(start_paused = true)]
async fn loaded_config_drives_engine() {
    let file = write_config("essence_only = true\nmax_attempts_per_lineage = 1\n");
    let config = GlimpseConfig::from_file(file.path()).unwrap();
    let engine = GlimpseEngine::new(Arc::new(EchoSampler), config).unwrap();
    let lineage = engine.lineage();

    let first = lineage.preview(&aligned_draft()).await.unwrap();
    assert_eq!(first.status, PreviewStatus::Aligned);
    assert!(first.sample.is_empty());

    let second = lineage.preview(&aligned_draft()).await.unwrap();
    assert_eq!(second.status, PreviewStatus::Redial);
    assert_eq!(second.attempt, 2);
}
