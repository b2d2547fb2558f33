//! Core types for Glimpse
//!
//! Defines the data model shared by every component:
//! - Drafts and their constraints
//! - Normalized sampler requests and their fingerprints
//! - Preview results, statuses and per-attempt metrics

use crate::clarifier::Clarifier;
use crate::error::{FailureKind, GlimpseError, GlimpseResult};
use crate::latency::LatencyBand;
use chrono::{DateTime, Utc};
use glimpse_cache::{Fingerprint, FingerprintError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique lineage identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineageId(pub Ulid);

impl LineageId {
    /// Generate new lineage ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for LineageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key:value directives attached to a draft
///
/// Order-irrelevant, keys unique. Keys are trimmed and lower-cased; values
/// are trimmed. Deserialized maps are normalized the same way, and keys that
/// collide after normalization are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Constraints(BTreeMap<String, String>);

impl Constraints {
    /// Empty constraint set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a directive, returning the previous value
    pub fn set(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Option<String> {
        self.0
            .insert(normalize_key(key.as_ref()), value.as_ref().trim().to_string())
    }

    /// Remove a directive
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(&normalize_key(key))
    }

    /// Value for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&normalize_key(key)).map(String::as_str)
    }

    /// Whether a key is present
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&normalize_key(key))
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of directives
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no directives
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying ordered map
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl FromStr for Constraints {
    type Err = GlimpseError;

    /// Parse `"tone:professional, length:short"`
    ///
    /// Items are separated by commas, semicolons or newlines. Empty input is
    /// an empty set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut constraints = Self::new();
        for item in s.split([',', ';', '\n']).map(str::trim).filter(|i| !i.is_empty()) {
            let Some((key, value)) = item.split_once(':') else {
                return Err(GlimpseError::constraint_parse(item, "expected key:value"));
            };
            if key.trim().is_empty() || value.trim().is_empty() {
                return Err(GlimpseError::constraint_parse(item, "key and value must be non-empty"));
            }
            if constraints.contains_key(key) {
                return Err(GlimpseError::constraint_parse(item, "duplicate key"));
            }
            constraints.set(key, value);
        }
        Ok(constraints)
    }
}

impl TryFrom<BTreeMap<String, String>> for Constraints {
    type Error = GlimpseError;

    fn try_from(raw: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut constraints = Self::new();
        for (key, value) in raw {
            if key.trim().is_empty() {
                return Err(GlimpseError::constraint_parse(format!("{key}:{value}"), "key must be non-empty"));
            }
            if constraints.contains_key(&key) {
                return Err(GlimpseError::constraint_parse(format!("{key}:{value}"), "duplicate key"));
            }
            constraints.set(key, value);
        }
        Ok(constraints)
    }
}

impl From<Constraints> for BTreeMap<String, String> {
    fn from(constraints: Constraints) -> Self {
        constraints.0
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{key}:{value}")?;
            first = false;
        }
        Ok(())
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Constraints {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut constraints = Self::new();
        for (key, value) in iter {
            constraints.set(key, value);
        }
        constraints
    }
}

/// Caller-owned unit of intent before commit
///
/// The engine only ever reads drafts; it never mutates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Free-form instruction text
    pub input_text: String,
    /// Short statement of desired outcome
    pub goal: String,
    /// Key:value directives (tone, length, audience, ...)
    pub constraints: Constraints,
}

impl Draft {
    /// Create draft from instruction text
    #[inline]
    #[must_use]
    pub fn new(input_text: impl Into<String>) -> Self {
        Self {
            input_text: input_text.into(),
            ..Self::default()
        }
    }

    /// With goal
    #[inline]
    #[must_use]
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    /// With a single constraint
    #[inline]
    #[must_use]
    pub fn with_constraint(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.constraints.set(key, value);
        self
    }

    /// With a full constraint set
    #[inline]
    #[must_use]
    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Reject drafts that cannot be previewed
    ///
    /// # Errors
    /// - `GlimpseError::EmptyInput` if `input_text` is blank
    pub fn validate(&self) -> GlimpseResult<()> {
        if self.input_text.trim().is_empty() {
            return Err(GlimpseError::EmptyInput);
        }
        Ok(())
    }
}

/// Model-selection parameters that participate in the fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerParams {
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output token ceiling
    pub max_tokens: u32,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

/// Normalized request handed to the sampler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRequest {
    /// Instruction text, whitespace-collapsed
    pub input_text: String,
    /// Goal, whitespace-collapsed
    pub goal: String,
    /// Explicit constraints plus defaults for unresolved clarifiers
    pub constraints: BTreeMap<String, String>,
    /// Model selection
    pub params: SamplerParams,
}

impl SampleRequest {
    /// Build a normalized request from a draft
    ///
    /// `defaults` fill in dimensions the draft left open; explicit
    /// constraints always win.
    pub fn from_draft<I>(draft: &Draft, params: &SamplerParams, defaults: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut constraints = draft.constraints.as_map().clone();
        for (key, value) in defaults {
            constraints.entry(key).or_insert(value);
        }
        Self {
            input_text: collapse_whitespace(&draft.input_text),
            goal: collapse_whitespace(&draft.goal),
            constraints,
            params: params.clone(),
        }
    }

    /// Deterministic digest of the request's semantic content
    ///
    /// Constraints live in an ordered map, so the order in which the caller
    /// set them never changes the result.
    ///
    /// # Errors
    /// Returns error if the request cannot be serialized
    pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::of_serializable(self)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Status of one preview attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    /// Sample succeeded, no ambiguity, not stale
    Aligned,
    /// Sample failed, ambiguity remains, or the draft diverged
    NotAligned,
    /// Too slow to trust; re-preview
    Stale,
    /// Attempt cap reached; start a new lineage
    Redial,
}

impl PreviewStatus {
    /// Whether no further previews are accepted on the lineage
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Redial)
    }

    /// Stable label used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aligned => "aligned",
            Self::NotAligned => "not_aligned",
            Self::Stale => "stale",
            Self::Redial => "redial",
        }
    }
}

impl fmt::Display for PreviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot returned by one preview call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    /// Lineage this attempt belongs to
    pub lineage_id: LineageId,
    /// 1-based attempt counter within the lineage
    pub attempt: u32,
    /// Outcome of the attempt
    pub status: PreviewStatus,
    /// Generated text; empty in essence-only mode or on failure
    pub sample: String,
    /// Short digest, always present
    pub essence: String,
    /// What changed since the previous attempt, or a clarifying question
    pub delta: Option<String>,
    /// Set when elapsed time reached the staleness threshold
    pub stale: bool,
    /// Every status seen on this lineage, in initiation order
    pub status_history: Vec<PreviewStatus>,
    /// Open ambiguity questions for this draft
    pub clarifiers: Vec<Clarifier>,
    /// Latency band the attempt finished in
    pub latency: LatencyBand,
    /// Whether essence-only mode was offered as a degradation
    pub essence_offered: bool,
    /// Wall time spent on this attempt
    pub elapsed_ms: u64,
    /// Classified backend failure, if sampling failed
    pub failure: Option<FailureKind>,
    /// Whether the sample came from the prompt cache
    pub from_cache: bool,
    /// Fingerprint of the sampled request
    pub fingerprint: Option<Fingerprint>,
    /// When the result was produced
    pub generated_at: DateTime<Utc>,
}

impl PreviewResult {
    /// Whether this attempt may back a commit
    #[inline]
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.status == PreviewStatus::Aligned
    }

    /// Whether the caller should refresh credentials
    #[inline]
    #[must_use]
    pub fn needs_credentials(&self) -> bool {
        self.failure.is_some_and(FailureKind::needs_credentials)
    }
}

/// Elapsed-time record for one surfaced attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptMetrics {
    /// Attempt number
    pub attempt: u32,
    /// Status the attempt produced
    pub status: PreviewStatus,
    /// Wall time in milliseconds
    pub elapsed_ms: u64,
    /// Latency band
    pub latency: LatencyBand,
    /// Served from cache
    pub from_cache: bool,
}
