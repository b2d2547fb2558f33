//! Draft divergence strategies
//!
//! Decides whether a caller's adjusted draft has drifted far enough from the
//! previous attempt that the new preview cannot be called aligned.

use crate::types::Draft;
use std::fmt::Debug;

/// Pluggable comparison between consecutive drafts of one lineage
pub trait DivergenceStrategy: Send + Sync + Debug {
    /// `Some(explanation)` if `current` diverges meaningfully from `previous`
    fn diverges(&self, previous: &Draft, current: &Draft) -> Option<String>;

    /// Strategy name (for logs)
    fn name(&self) -> &'static str;
}

/// Diverges when an existing constraint changed value or was removed
///
/// Adding a constraint (for example answering a clarifier) refines intent
/// rather than changing it, so it does not count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintChange;

impl DivergenceStrategy for ConstraintChange {
    fn diverges(&self, previous: &Draft, current: &Draft) -> Option<String> {
        let mut changes = Vec::new();
        for (key, old) in previous.constraints.iter() {
            match current.constraints.get(key) {
                Some(new) if new == old => {}
                Some(new) => changes.push(format!("{key} changed from '{old}' to '{new}'")),
                None => changes.push(format!("{key} removed")),
            }
        }
        if changes.is_empty() {
            None
        } else {
            Some(format!("intent changed: {}", changes.join("; ")))
        }
    }

    fn name(&self) -> &'static str {
        "constraint-change"
    }
}

/// Never reports divergence
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverDiverge;

impl DivergenceStrategy for NeverDiverge {
    fn diverges(&self, _previous: &Draft, _current: &Draft) -> Option<String> {
        None
    }

    fn name(&self) -> &'static str {
        "never"
    }
}

/// Any edit at all counts as divergence
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyChange;

impl DivergenceStrategy for AnyChange {
    fn diverges(&self, previous: &Draft, current: &Draft) -> Option<String> {
        describe_changes(previous, current).map(|summary| format!("intent changed: {summary}"))
    }

    fn name(&self) -> &'static str {
        "any-change"
    }
}

/// Human-readable summary of what the caller edited between attempts
#[must_use]
pub fn describe_changes(previous: &Draft, current: &Draft) -> Option<String> {
    let mut changes = Vec::new();
    if previous.input_text.trim() != current.input_text.trim() {
        changes.push("input text edited".to_string());
    }
    if previous.goal.trim() != current.goal.trim() {
        changes.push(format!("goal set to '{}'", current.goal.trim()));
    }
    for (key, value) in current.constraints.iter() {
        match previous.constraints.get(key) {
            None => changes.push(format!("added {key}:{value}")),
            Some(old) if old != value => changes.push(format!("{key}: {old} -> {value}")),
            Some(_) => {}
        }
    }
    for (key, _) in previous.constraints.iter() {
        if !current.constraints.contains_key(key) {
            changes.push(format!("removed {key}"));
        }
    }
    if changes.is_empty() {
        None
    } else {
        Some(changes.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Draft {
        Draft::new("Tell customers about the new feature")
            .with_goal("announce")
            .with_constraint("tone", "professional")
    }

    #[test]
    fn adding_constraints_is_not_divergence() {
        let next = base().with_constraint("length", "short");
        assert!(ConstraintChange.diverges(&base(), &next).is_none());
    }

    #[test]
    fn changing_a_constraint_is_divergence() {
        let next = base().with_constraint("tone", "playful");
        let explanation = ConstraintChange.diverges(&base(), &next).unwrap();
        assert!(explanation.contains("tone changed from 'professional' to 'playful'"));
    }

    #[test]
    fn removing_a_constraint_is_divergence() {
        let mut next = base();
        next.constraints.remove("tone");
        assert!(ConstraintChange.diverges(&base(), &next).is_some());
    }

    #[test]
    fn alternative_strategies() {
        let next = base().with_constraint("length", "short");
        assert!(NeverDiverge.diverges(&base(), &next).is_none());
        assert!(AnyChange.diverges(&base(), &next).is_some());
        assert!(AnyChange.diverges(&base(), &base()).is_none());
    }

    #[test]
    fn change_summary_lists_edits() {
        let next = base().with_goal("launch").with_constraint("length", "short");
        let summary = describe_changes(&base(), &next).unwrap();
        assert!(summary.contains("goal set to 'launch'"));
        assert!(summary.contains("added length:short"));
        assert!(describe_changes(&base(), &base()).is_none());
    }
}
