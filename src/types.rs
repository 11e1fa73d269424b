//! Core types for the trellis workflow engine.
//!
//! This module defines the small vocabulary shared by every other module:
//! per-step lifecycle states, the engine-level drive outcome, and the
//! boolean operator attached to NEXT edges.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The distinguished step id every workflow starts from.
pub const ROOT_STEP: &str = "root";

/// Lifecycle state of a single step within a session.
///
/// A step may cycle through these states many times over the life of a
/// session: loops re-activate completed steps, and a new edge traversal may
/// re-activate an errored one.
///
/// # Examples
///
/// ```rust
/// use trellis::types::StepStatus;
///
/// let status: StepStatus = serde_json::from_str("\"awaiting_input\"").unwrap();
/// assert_eq!(status, StepStatus::AwaitingInput);
/// assert!(status.is_suspended());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Ready to run on the next drive iteration.
    Active,
    /// Inputs were not resolvable; retried after another step completes.
    Pending,
    /// Executed successfully; has a fresh entry in its output window.
    Complete,
    /// Failed for this activation; a new edge traversal may re-activate it.
    Error,
    /// Suspended on the user-input request; pauses the whole session.
    AwaitingInput,
}

impl StepStatus {
    /// Returns `true` if the step is schedulable work (`active` or `pending`).
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::Pending)
    }

    /// Returns `true` if the step holds the whole session suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::AwaitingInput)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::AwaitingInput => "awaiting_input",
        };
        write!(f, "{s}")
    }
}

/// Outcome of driving a session (`Engine::process` / `Engine::submit_input`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    /// No step is active or pending and no edge can activate one.
    Completed,
    /// A step reached the user-input request; the caller must submit input.
    AwaitingInput,
    /// The iteration safety bound was reached; the session can be re-driven.
    Active,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::AwaitingInput => "awaiting_input",
            Self::Active => "active",
        };
        write!(f, "{s}")
    }
}

/// Boolean operator combining the clauses of an edge condition.
///
/// Persisted as the edge's `operator` attribute; anything other than `"OR"`
/// (case-insensitive) decodes as the default `And`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoolOperator {
    #[default]
    And,
    Or,
}

impl BoolOperator {
    /// Decode the persisted string form, defaulting to `And`.
    #[must_use]
    pub fn decode(s: &str) -> Self {
        if s.eq_ignore_ascii_case("OR") {
            Self::Or
        } else {
            Self::And
        }
    }

    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    /// Fold an iterator of clause results with this operator.
    ///
    /// An empty iterator is satisfied under `And` (vacuous truth) and
    /// unsatisfied under `Or`, matching the usual all/any semantics.
    pub fn combine(&self, results: impl IntoIterator<Item = bool>) -> bool {
        match self {
            Self::And => results.into_iter().all(|r| r),
            Self::Or => results.into_iter().any(|r| r),
        }
    }
}

/// Current wall clock as integer epoch milliseconds.
///
/// All timestamps inside the state document (`last_executed`,
/// `last_evaluated`, message timestamps) use this representation.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_status_serde_round_trip() {
        for status in [
            StepStatus::Active,
            StepStatus::Pending,
            StepStatus::Complete,
            StepStatus::Error,
            StepStatus::AwaitingInput,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let back: StepStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(status, back);
        }
        assert_eq!(
            serde_json::to_string(&StepStatus::AwaitingInput).unwrap(),
            "\"awaiting_input\""
        );
    }

    #[test]
    fn operator_decode_defaults_to_and() {
        assert_eq!(BoolOperator::decode("OR"), BoolOperator::Or);
        assert_eq!(BoolOperator::decode("or"), BoolOperator::Or);
        assert_eq!(BoolOperator::decode("AND"), BoolOperator::And);
        assert_eq!(BoolOperator::decode("anything"), BoolOperator::And);
    }

    #[test]
    fn operator_combine_semantics() {
        assert!(BoolOperator::And.combine([true, true]));
        assert!(!BoolOperator::And.combine([true, false]));
        assert!(BoolOperator::Or.combine([false, true]));
        assert!(!BoolOperator::Or.combine([false, false]));
        let none: [bool; 0] = [];
        assert!(BoolOperator::And.combine(none));
        assert!(!BoolOperator::Or.combine(none));
    }

    #[test]
    fn engine_status_display_matches_wire_form() {
        assert_eq!(EngineStatus::Completed.to_string(), "completed");
        assert_eq!(EngineStatus::AwaitingInput.to_string(), "awaiting_input");
        assert_eq!(EngineStatus::Active.to_string(), "active");
    }
}
