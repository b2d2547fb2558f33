//! Latency monitor
//!
//! Classifies the elapsed time of an attempt against four ascending
//! thresholds. Pure function of elapsed time; share freely.

use crate::error::{GlimpseError, GlimpseResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Four ascending thresholds `t1 < t2 < t3 < t4`, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyThresholds {
    /// Surface "still working"
    pub t1_ms: u64,
    /// Add "still matching intent"
    pub t2_ms: u64,
    /// Offer essence-only mode
    pub t3_ms: u64,
    /// Mark result stale
    pub t4_ms: u64,
}

impl LatencyThresholds {
    /// Create thresholds, checking order
    ///
    /// # Errors
    /// - `GlimpseError::InvalidConfig` unless `t1 < t2 < t3 < t4`
    pub fn new(t1_ms: u64, t2_ms: u64, t3_ms: u64, t4_ms: u64) -> GlimpseResult<Self> {
        let thresholds = Self {
            t1_ms,
            t2_ms,
            t3_ms,
            t4_ms,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Check ascending order
    ///
    /// # Errors
    /// - `GlimpseError::InvalidConfig` unless `t1 < t2 < t3 < t4`
    pub fn validate(&self) -> GlimpseResult<()> {
        if self.t1_ms < self.t2_ms && self.t2_ms < self.t3_ms && self.t3_ms < self.t4_ms {
            Ok(())
        } else {
            Err(GlimpseError::InvalidConfig(format!(
                "latency thresholds must ascend strictly, got {}/{}/{}/{} ms",
                self.t1_ms, self.t2_ms, self.t3_ms, self.t4_ms
            )))
        }
    }

    fn as_durations(&self) -> [Duration; 4] {
        [
            Duration::from_millis(self.t1_ms),
            Duration::from_millis(self.t2_ms),
            Duration::from_millis(self.t3_ms),
            Duration::from_millis(self.t4_ms),
        ]
    }
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self {
            t1_ms: 300,
            t2_ms: 800,
            t3_ms: 1_500,
            t4_ms: 3_000,
        }
    }
}

/// Where an elapsed duration falls among the thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyBand {
    /// `d < t1`
    Fresh,
    /// `t1 <= d < t2`
    StillWorking,
    /// `t2 <= d < t3`
    MatchingIntent,
    /// `t3 <= d < t4`
    EssenceOffered,
    /// `d >= t4`
    Stale,
}

impl LatencyBand {
    /// Indicators the caller should be showing in this band
    #[must_use]
    pub fn indicators(self) -> &'static [Indicator] {
        match self {
            Self::Fresh => &[],
            Self::StillWorking => &[Indicator::StillWorking],
            Self::MatchingIntent => &[Indicator::StillWorking, Indicator::StillMatchingIntent],
            Self::EssenceOffered | Self::Stale => &[
                Indicator::StillWorking,
                Indicator::StillMatchingIntent,
                Indicator::EssenceOnlyAvailable,
            ],
        }
    }

    /// Whether essence-only mode should be offered
    #[inline]
    #[must_use]
    pub fn offers_essence_only(self) -> bool {
        self >= Self::EssenceOffered
    }

    /// Whether the result must be flagged stale
    #[inline]
    #[must_use]
    pub fn is_stale(self) -> bool {
        self == Self::Stale
    }
}

/// Progress indicator surfaced while an attempt is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// "Still working"
    StillWorking,
    /// "Still matching intent"
    StillMatchingIntent,
    /// Essence-only mode can be switched on
    EssenceOnlyAvailable,
}

/// In-flight progress of a lineage's current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    /// Attempt number being worked on (0 before the first attempt)
    pub attempt: u32,
    /// Band reached so far
    pub band: Option<LatencyBand>,
    /// Whether an attempt is in flight
    pub in_flight: bool,
}

/// Threshold classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyMonitor {
    thresholds: LatencyThresholds,
}

impl LatencyMonitor {
    /// Create monitor over thresholds
    #[inline]
    #[must_use]
    pub fn new(thresholds: LatencyThresholds) -> Self {
        Self { thresholds }
    }

    /// Configured thresholds
    #[inline]
    #[must_use]
    pub fn thresholds(&self) -> &LatencyThresholds {
        &self.thresholds
    }

    /// Classify an elapsed duration
    #[must_use]
    pub fn classify(&self, elapsed: Duration) -> LatencyBand {
        let [t1, t2, t3, t4] = self.thresholds.as_durations();
        if elapsed < t1 {
            LatencyBand::Fresh
        } else if elapsed < t2 {
            LatencyBand::StillWorking
        } else if elapsed < t3 {
            LatencyBand::MatchingIntent
        } else if elapsed < t4 {
            LatencyBand::EssenceOffered
        } else {
            LatencyBand::Stale
        }
    }

    /// Next threshold strictly after `elapsed`, if any remain
    #[must_use]
    pub fn next_boundary(&self, elapsed: Duration) -> Option<Duration> {
        self.thresholds
            .as_durations()
            .into_iter()
            .find(|threshold| *threshold > elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> LatencyMonitor {
        LatencyMonitor::new(LatencyThresholds::new(100, 200, 300, 400).unwrap())
    }

    #[test]
    fn classifies_each_band_at_its_boundaries() {
        let m = monitor();
        assert_eq!(m.classify(Duration::from_millis(0)), LatencyBand::Fresh);
        assert_eq!(m.classify(Duration::from_millis(99)), LatencyBand::Fresh);
        assert_eq!(m.classify(Duration::from_millis(100)), LatencyBand::StillWorking);
        assert_eq!(m.classify(Duration::from_millis(200)), LatencyBand::MatchingIntent);
        assert_eq!(m.classify(Duration::from_millis(300)), LatencyBand::EssenceOffered);
        assert_eq!(m.classify(Duration::from_millis(399)), LatencyBand::EssenceOffered);
        assert_eq!(m.classify(Duration::from_millis(400)), LatencyBand::Stale);
        assert_eq!(m.classify(Duration::from_secs(60)), LatencyBand::Stale);
    }

    #[test]
    fn rejects_non_ascending_thresholds() {
        assert!(LatencyThresholds::new(100, 100, 300, 400).is_err());
        assert!(LatencyThresholds::new(400, 300, 200, 100).is_err());
    }

    #[test]
    fn indicators_accumulate() {
        assert!(LatencyBand::Fresh.indicators().is_empty());
        assert_eq!(LatencyBand::StillWorking.indicators(), &[Indicator::StillWorking]);
        assert!(LatencyBand::MatchingIntent
            .indicators()
            .contains(&Indicator::StillMatchingIntent));
        assert!(LatencyBand::EssenceOffered.offers_essence_only());
        assert!(!LatencyBand::MatchingIntent.offers_essence_only());
        assert!(LatencyBand::Stale.is_stale());
    }

    #[test]
    fn next_boundary_walks_thresholds() {
        let m = monitor();
        assert_eq!(m.next_boundary(Duration::ZERO), Some(Duration::from_millis(100)));
        assert_eq!(m.next_boundary(Duration::from_millis(100)), Some(Duration::from_millis(200)));
        assert_eq!(m.next_boundary(Duration::from_millis(350)), Some(Duration::from_millis(400)));
        assert_eq!(m.next_boundary(Duration::from_millis(400)), None);
    }
}
