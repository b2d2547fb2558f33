//! Clarifier detector
//!
//! Scans a draft for underspecified dimensions and proposes structured
//! questions. Dimensions are checked in a fixed priority order, so an
//! unchanged draft always yields the same sequence.

use crate::types::Draft;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An ambiguity axis, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Who the output is for
    Audience,
    /// Voice of the output
    Tone,
    /// Shape of the output
    Format,
    /// Length or depth of the output
    Scope,
}

impl Dimension {
    /// All dimensions in detection priority
    pub const ALL: [Dimension; 4] = [Self::Audience, Self::Tone, Self::Format, Self::Scope];

    /// Canonical constraint key
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::Audience => "audience",
            Self::Tone => "tone",
            Self::Format => "format",
            Self::Scope => "length",
        }
    }

    /// Constraint keys that settle this dimension
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Audience => &["audience", "reader", "readers", "recipient", "recipients"],
            Self::Tone => &["tone", "voice", "style", "register"],
            Self::Format => &["format", "medium", "output"],
            Self::Scope => &["length", "scope", "size", "detail", "depth", "words"],
        }
    }

    fn question(self) -> &'static str {
        match self {
            Self::Audience => "Who is the audience?",
            Self::Tone => "What tone should it take?",
            Self::Format => "What format should the output use?",
            Self::Scope => "How long or detailed should it be?",
        }
    }

    fn options(self) -> &'static [&'static str] {
        match self {
            Self::Audience => &["general", "customers", "internal team", "executives", "technical"],
            Self::Tone => &["neutral", "professional", "friendly", "formal", "casual"],
            Self::Format => &["paragraph", "email", "bulleted list", "short post"],
            Self::Scope => &["short", "medium", "detailed"],
        }
    }

    fn pattern(self) -> Option<&'static Regex> {
        match self {
            Self::Audience => AUDIENCE.as_ref(),
            Self::Tone => TONE.as_ref(),
            Self::Format => FORMAT.as_ref(),
            Self::Scope => SCOPE.as_ref(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn keyword_regex(words: &[&str]) -> Option<Regex> {
    let alternation = words.join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).ok()
}

static AUDIENCE: Lazy<Option<Regex>> = Lazy::new(|| {
    keyword_regex(&[
        r"customers?", r"clients?", r"users?", r"team", r"colleagues", r"developers?",
        r"engineers?", r"executives?", r"leadership", r"managers?", r"students?",
        r"investors?", r"partners?", r"stakeholders", r"beginners?", r"experts?",
        r"kids", r"children", r"everyone", r"board", r"employees", r"subscribers",
    ])
});

static TONE: Lazy<Option<Regex>> = Lazy::new(|| {
    keyword_regex(&[
        r"formal", r"informal", r"casual", r"friendly", r"professional", r"playful",
        r"serious", r"enthusiastic", r"neutral", r"persuasive", r"warm", r"humorous",
        r"funny", r"apologetic", r"upbeat", r"urgent", r"polite",
    ])
});

static FORMAT: Lazy<Option<Regex>> = Lazy::new(|| {
    keyword_regex(&[
        r"e-?mails?", r"tweets?", r"posts?", r"blog", r"memo", r"letter", r"report",
        r"list", r"bullets?", r"bullet points", r"table", r"essay", r"announcement",
        r"slides?", r"headlines?", r"poem", r"script", r"json", r"markdown",
        r"newsletter", r"faq", r"outline", r"press release",
    ])
});

static SCOPE: Lazy<Option<Regex>> = Lazy::new(|| {
    keyword_regex(&[
        r"brief", r"briefly", r"short", r"concise", r"detailed", r"long", r"comprehensive",
        r"thorough", r"in-depth", r"one-liner", r"quick", r"summary", r"summarize",
        r"\d+\s*(?:words?|sentences?|paragraphs?|lines?|bullets?|characters?)",
        r"(?:one|two|three|a few)\s+(?:sentences?|paragraphs?|lines?)",
    ])
});

/// A structured ambiguity question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarifier {
    /// Ambiguous axis
    pub dimension: Dimension,
    /// Question to show the caller
    pub question: String,
    /// Ordered, non-empty candidate values
    pub options: Vec<String>,
    /// Member of `options` used when the caller ignores the question
    pub default: String,
}

impl Clarifier {
    /// Create clarifier; `None` if options are empty or miss the default
    #[must_use]
    pub fn new(
        dimension: Dimension,
        question: impl Into<String>,
        options: Vec<String>,
        default: impl Into<String>,
    ) -> Option<Self> {
        let default = default.into();
        if options.is_empty() || !options.contains(&default) {
            return None;
        }
        Some(Self {
            dimension,
            question: question.into(),
            options,
            default,
        })
    }

    /// Question with options and default, for a result's `delta`
    #[must_use]
    pub fn prompt(&self) -> String {
        format!(
            "{} ({}; default: {})",
            self.question,
            self.options.join(" / "),
            self.default
        )
    }

    /// `(constraint key, default)` pair applied when the caller ignores it
    #[must_use]
    pub fn default_constraint(&self) -> (String, String) {
        (self.dimension.key().to_string(), self.default.clone())
    }
}

/// Keyword-driven ambiguity detector
#[derive(Debug, Clone)]
pub struct ClarifierDetector {
    defaults: [&'static str; 4],
}

impl ClarifierDetector {
    /// Detector with the built-in default table
    #[must_use]
    pub fn new() -> Self {
        Self {
            defaults: ["general", "neutral", "paragraph", "short"],
        }
    }

    /// Override the default for one dimension
    ///
    /// Ignored unless `value` is one of the dimension's options.
    #[must_use]
    pub fn with_default(mut self, dimension: Dimension, value: &str) -> Self {
        if let Some(option) = dimension.options().iter().find(|o| **o == value) {
            self.defaults[Self::slot(dimension)] = *option;
        }
        self
    }

    fn slot(dimension: Dimension) -> usize {
        match dimension {
            Dimension::Audience => 0,
            Dimension::Tone => 1,
            Dimension::Format => 2,
            Dimension::Scope => 3,
        }
    }

    /// Whether the draft settles a dimension, by constraint or by wording
    #[must_use]
    pub fn is_resolved(&self, draft: &Draft, dimension: Dimension) -> bool {
        if dimension
            .aliases()
            .iter()
            .any(|alias| draft.constraints.contains_key(alias))
        {
            return true;
        }
        dimension.pattern().is_some_and(|pattern| {
            pattern.is_match(&draft.input_text) || pattern.is_match(&draft.goal)
        })
    }

    /// Clarifiers for every unresolved dimension, in priority order
    pub fn detect_ambiguity<'a>(&'a self, draft: &'a Draft) -> impl Iterator<Item = Clarifier> + 'a {
        Dimension::ALL
            .into_iter()
            .filter(move |dimension| !self.is_resolved(draft, *dimension))
            .map(move |dimension| self.clarifier_for(dimension))
    }

    fn clarifier_for(&self, dimension: Dimension) -> Clarifier {
        Clarifier {
            dimension,
            question: dimension.question().to_string(),
            options: dimension.options().iter().map(ToString::to_string).collect(),
            default: self.defaults[Self::slot(dimension)].to_string(),
        }
    }
}

impl Default for ClarifierDetector {
    fn default() -> Self {
        Self::new()
    }
}
