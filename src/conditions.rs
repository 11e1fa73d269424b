//! Evaluation of NEXT-edge condition expressions.
//!
//! An edge's `condition` attribute is a JSON document describing a list of
//! clauses, combined with the edge's `operator` attribute (`AND` default):
//!
//! ```text
//! condition := '[' clause (',' clause)* ']'
//! clause    := string_ref
//!            | { "true": ref }
//!            | { "false": ref }
//!            | { "operator": "AND"|"OR", "true"?: ref_or_refs, "false"?: ref_or_refs }
//! ```
//!
//! References resolve against the session's outputs; an absent reference is
//! falsy. Clause strings containing `==` compare the two sides (each side
//! resolved when it is itself a reference), which is also how the manual
//! override sentinels `"1==1"` and `"1==0"` evaluate to constant
//! true/false. A missing, empty, or unparseable condition is satisfied.

use serde_json::Value;
use tracing::warn;

use crate::resolver::resolve_scalar;
use crate::state::SessionState;
use crate::store::EdgeDefinition;
use crate::types::BoolOperator;

/// One clause of a condition list.
#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
    /// Bare reference (legacy): holds iff the resolved value is truthy.
    Ref(String),
    /// Structured checks combined with an operator: `truthy` references
    /// must resolve truthy, `falsy` references must resolve falsy.
    Checks {
        operator: BoolOperator,
        truthy: Vec<String>,
        falsy: Vec<String>,
    },
}

/// Parses a condition document into clauses.
///
/// Accepts the canonical array form plus the legacy tolerances of a single
/// object clause or a bare string.
#[must_use]
pub fn parse_condition(raw: &Value) -> Vec<Clause> {
    match raw {
        Value::Array(items) => items.iter().filter_map(parse_clause).collect(),
        other => parse_clause(other).into_iter().collect(),
    }
}

fn parse_clause(value: &Value) -> Option<Clause> {
    match value {
        Value::String(s) => Some(Clause::Ref(s.clone())),
        Value::Object(map) => {
            let truthy = map.get("true").map(ref_list).unwrap_or_default();
            let falsy = map.get("false").map(ref_list).unwrap_or_default();
            if truthy.is_empty() && falsy.is_empty() {
                return None;
            }
            let operator = map
                .get("operator")
                .and_then(Value::as_str)
                .map(BoolOperator::decode)
                .unwrap_or_default();
            Some(Clause::Checks {
                operator,
                truthy,
                falsy,
            })
        }
        _ => None,
    }
}

/// A `ref_or_refs` value: a single reference string or an array of them.
fn ref_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Evaluates whether an edge may be traversed in the given state.
#[must_use]
pub fn edge_satisfied(edge: &EdgeDefinition, state: &SessionState) -> bool {
    let Some(raw) = edge.condition.as_deref().filter(|c| !c.trim().is_empty()) else {
        return true;
    };
    let parsed: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(target = %edge.target, %error, "unparseable edge condition, taking edge");
            return true;
        }
    };
    let clauses = parse_condition(&parsed);
    // An empty clause list behaves like no condition at all, regardless of
    // the edge operator.
    if clauses.is_empty() {
        return true;
    }
    edge.operator
        .combine(clauses.iter().map(|clause| clause_holds(clause, state)))
}

fn clause_holds(clause: &Clause, state: &SessionState) -> bool {
    match clause {
        Clause::Ref(expr) => evaluate_expr(expr, state),
        Clause::Checks {
            operator,
            truthy,
            falsy,
        } => {
            let checks = truthy
                .iter()
                .map(|expr| evaluate_expr(expr, state))
                .chain(falsy.iter().map(|expr| !evaluate_expr(expr, state)));
            operator.combine(checks)
        }
    }
}

/// Evaluates a reference expression to a boolean.
///
/// `a==b` compares the two trimmed sides case-insensitively after
/// resolving each side; anything else resolves and takes truthiness, with
/// absence counting as false.
fn evaluate_expr(expr: &str, state: &SessionState) -> bool {
    if let Some((left, right)) = expr.split_once("==") {
        let left = side_text(left.trim(), state);
        let right = side_text(right.trim(), state);
        return left.eq_ignore_ascii_case(&right);
    }
    resolve_scalar(expr, state).is_some_and(|v| is_truthy(&v))
}

fn side_text(side: &str, state: &SessionState) -> String {
    match resolve_scalar(side, state) {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Truthiness of a resolved value: null, `false`, zero, and empty
/// strings/arrays/objects are falsy.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
