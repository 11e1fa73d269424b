//! Property tests for the resolver and the rolling output window.

use proptest::prelude::*;
use serde_json::{json, Value};

use trellis::resolver::resolve_template;
use trellis::state::{SessionState, OUTPUT_WINDOW};
use trellis::types::StepStatus;

/// JSON leaves guaranteed to contain no reference marker.
fn literal_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 .,_-]{0,24}".prop_map(Value::from),
    ]
}

/// Arbitrary reference-free JSON documents.
fn literal_json() -> impl Strategy<Value = Value> {
    literal_leaf().prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn step_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{0,12}".prop_map(|s| s.to_string())
}

proptest! {
    /// Resolving a template with no references is the identity, and
    /// therefore a fixed point.
    #[test]
    fn literal_resolution_is_a_fixed_point(template in literal_json()) {
        let state = SessionState::new("s1", "default");
        let once = resolve_template(&template, &state).unwrap();
        prop_assert_eq!(&once, &template);
        let twice = resolve_template(&once, &state).unwrap();
        prop_assert_eq!(twice, once);
    }

    /// The output window never exceeds its bound and always keeps the
    /// newest entries, whatever the append sequence.
    #[test]
    fn output_window_is_bounded(appends in prop::collection::vec(0u32..1000, 1..20)) {
        let mut state = SessionState::new("s1", "default");
        for value in &appends {
            state.push_output("step", json!(value));
        }
        let window = &state.data.outputs["step"];
        prop_assert!(window.len() <= OUTPUT_WINDOW);
        prop_assert_eq!(window.len(), appends.len().min(OUTPUT_WINDOW));
        let expected_tail: Vec<Value> = appends
            .iter()
            .rev()
            .take(OUTPUT_WINDOW)
            .rev()
            .map(|v| json!(v))
            .collect();
        prop_assert_eq!(window, &expected_tail);
    }

    /// The state document round-trips through its serialized form.
    #[test]
    fn state_serialization_round_trips(
        steps in prop::collection::vec((step_name(), literal_json()), 0..5),
        last_evaluated in 0i64..1_000_000,
    ) {
        let mut state = SessionState::new("s1", "wf");
        for (step, output) in &steps {
            state.push_output(step, output.clone());
            state.set_status(step, StepStatus::Complete);
        }
        state.last_evaluated = last_evaluated;

        let raw = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&raw).unwrap();
        prop_assert_eq!(back, state);
    }

    /// A whole-string reference into a single-entry window returns the
    /// stored value unchanged, whatever its type.
    #[test]
    fn single_reference_preserves_native_type(output in literal_json()) {
        let mut state = SessionState::new("s1", "default");
        state.push_output("gen", output.clone());
        let resolved = resolve_template(&json!("@{SESSION_ID}.gen"), &state).unwrap();
        prop_assert_eq!(resolved, output);
    }
}
