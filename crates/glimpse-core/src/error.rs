//! Error types for Glimpse
//!
//! Two families live here:
//! - Backend failures reported by a [`Sampler`](crate::sampler::Sampler),
//!   mapped into a closed [`FailureKind`] by the single [`classify`] function.
//!   These never escape `preview`; they become degraded results.
//! - Caller misuse ([`GlimpseError`]): malformed drafts, commit gate
//!   violations, invalid configuration. These propagate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure reported by a sampler backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with an error status
    #[error("backend returned status {code}: {message}")]
    Status {
        /// HTTP-style status code
        code: u16,
        /// Backend-supplied message
        message: String,
    },

    /// The call did not complete in time
    #[error("backend call timed out")]
    Timeout,

    /// Connection-level failure before a status was received
    #[error("transport failure: {0}")]
    Transport(String),
}

impl BackendError {
    /// Create a status error
    #[inline]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }
}

/// Closed taxonomy of classified sampler failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend asked us to slow down
    RateLimited,
    /// 5xx or connection-level failure
    TransientServer,
    /// Call exceeded its deadline
    Timeout,
    /// Request rejected as malformed
    BadRequest,
    /// Credentials missing or expired
    Authentication,
    /// Model or resource not found
    NotFound,
    /// Request understood but not processable
    Unprocessable,
    /// Credentials valid but not allowed
    PermissionDenied,
}

impl FailureKind {
    /// Whether the retry coordinator may try again
    #[inline]
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::TransientServer | Self::Timeout)
    }

    /// Whether the caller should prompt for a credential refresh
    #[inline]
    #[must_use]
    pub fn needs_credentials(self) -> bool {
        matches!(self, Self::Authentication)
    }

    /// Short human-readable label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate limited",
            Self::TransientServer => "backend unavailable",
            Self::Timeout => "timed out",
            Self::BadRequest => "bad request",
            Self::Authentication => "authentication required",
            Self::NotFound => "not found",
            Self::Unprocessable => "unprocessable request",
            Self::PermissionDenied => "permission denied",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a backend failure to its kind
///
/// The only place backend failures are interpreted.
#[must_use]
pub fn classify(error: &BackendError) -> FailureKind {
    match error {
        BackendError::Timeout => FailureKind::Timeout,
        BackendError::Transport(_) => FailureKind::TransientServer,
        BackendError::Status { code, .. } => match *code {
            408 => FailureKind::Timeout,
            429 => FailureKind::RateLimited,
            401 => FailureKind::Authentication,
            403 => FailureKind::PermissionDenied,
            404 => FailureKind::NotFound,
            422 => FailureKind::Unprocessable,
            500..=599 => FailureKind::TransientServer,
            _ => FailureKind::BadRequest,
        },
    }
}

/// Outcome of an exhausted or abandoned retry loop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The last classified failure
    #[error("{kind} after {attempts} attempt(s): {message}")]
    Failed {
        /// Classified kind of the final failure
        kind: FailureKind,
        /// Number of calls made
        attempts: u32,
        /// Backend message of the final failure
        message: String,
    },

    /// Cancellation was signalled before a result was accepted
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Number of calls started
        attempts: u32,
    },
}

impl RetryError {
    /// The classified kind, if this was a backend failure
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            Self::Cancelled { .. } => None,
        }
    }
}

/// Errors that propagate to the caller of the engine
#[derive(Debug, thiserror::Error)]
pub enum GlimpseError {
    /// Draft has no input text
    #[error("draft input_text must not be empty")]
    EmptyInput,

    /// Constraint text could not be parsed
    #[error("invalid constraint '{item}': {reason}")]
    ConstraintParse {
        /// Offending fragment
        item: String,
        /// Why it was rejected
        reason: String,
    },

    /// Commit attempted without an aligned preview or override
    #[error("no prior aligned preview for lineage {lineage}")]
    NoPriorAlignedPreview {
        /// Lineage id
        lineage: String,
    },

    /// Commit attempted twice on one lineage
    #[error("lineage {lineage} has already been committed")]
    AlreadyCommitted {
        /// Lineage id
        lineage: String,
    },

    /// Preview attempted after commit
    #[error("lineage {lineage} is committed; start a new lineage to preview again")]
    LineageCommitted {
        /// Lineage id
        lineage: String,
    },

    /// A newer preview on the same lineage replaced this one
    #[error("preview superseded by a newer preview on lineage {lineage}")]
    Superseded {
        /// Lineage id
        lineage: String,
    },

    /// The lineage was cancelled while this preview was in flight
    #[error("preview cancelled on lineage {lineage}")]
    Cancelled {
        /// Lineage id
        lineage: String,
    },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A request could not be fingerprinted
    #[error("failed to fingerprint request: {0}")]
    Fingerprint(#[from] glimpse_cache::FingerprintError),

    /// The commit effect itself failed (the lineage is still consumed)
    #[error("commit effect failed: {0}")]
    CommitFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl GlimpseError {
    /// Whether the error came from a preview being abandoned by the caller
    #[inline]
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Superseded { .. } | Self::Cancelled { .. })
    }

    /// Create a constraint parse error
    #[inline]
    pub fn constraint_parse(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConstraintParse {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations
pub type GlimpseResult<T> = Result<T, GlimpseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_transient_statuses() {
        assert_eq!(classify(&BackendError::status(429, "slow down")), FailureKind::RateLimited);
        assert_eq!(classify(&BackendError::status(503, "overloaded")), FailureKind::TransientServer);
        assert_eq!(classify(&BackendError::Transport("reset".into())), FailureKind::TransientServer);
        assert_eq!(classify(&BackendError::Timeout), FailureKind::Timeout);
    }

    #[test]
    fn classify_permanent_statuses() {
        assert_eq!(classify(&BackendError::status(400, "bad")), FailureKind::BadRequest);
        assert_eq!(classify(&BackendError::status(401, "who")), FailureKind::Authentication);
        assert_eq!(classify(&BackendError::status(403, "no")), FailureKind::PermissionDenied);
        assert_eq!(classify(&BackendError::status(404, "gone")), FailureKind::NotFound);
        assert_eq!(classify(&BackendError::status(422, "huh")), FailureKind::Unprocessable);
        assert_eq!(classify(&BackendError::status(418, "teapot")), FailureKind::BadRequest);
    }

    #[test]
    fn transient_kinds_are_exactly_the_retryable_ones() {
        assert!(FailureKind::RateLimited.is_transient());
        assert!(FailureKind::TransientServer.is_transient());
        assert!(FailureKind::Timeout.is_transient());
        assert!(!FailureKind::BadRequest.is_transient());
        assert!(!FailureKind::Authentication.is_transient());
        assert!(!FailureKind::PermissionDenied.is_transient());
    }

    #[test]
    fn authentication_is_flagged_distinctly() {
        assert!(FailureKind::Authentication.needs_credentials());
        assert!(!FailureKind::PermissionDenied.needs_credentials());
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::TransientServer).unwrap();
        assert_eq!(json, "\"transient_server\"");
    }

    #[test]
    fn glimpse_error_display() {
        let err = GlimpseError::AlreadyCommitted {
            lineage: "L1".to_string(),
        };
        assert!(err.to_string().contains("already been committed"));
        assert!(!err.is_abandoned());
        assert!(GlimpseError::Cancelled { lineage: "L1".into() }.is_abandoned());
    }
}
