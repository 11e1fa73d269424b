#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use trellis::engine::Engine;
use trellis::registry::{default_registry, Args, FnUtility, UtilityError, UtilityRegistry};
use trellis::store::{EdgeDefinition, InMemoryGraphStore, StepDefinition};

/// Conventional utility names used across the integration tests.
pub const REPLY: &str = "utils.reply.reply";
pub const REQUEST: &str = "utils.request.request";

/// The default registry plus a handful of deterministic test utilities.
pub fn test_registry() -> UtilityRegistry {
    let mut registry = default_registry();
    registry.register(
        "noop",
        Arc::new(FnUtility(|_: Args| -> Result<Value, UtilityError> {
            Ok(json!({}))
        })),
    );
    registry.register(
        "emit_ok",
        Arc::new(FnUtility(|_: Args| -> Result<Value, UtilityError> {
            Ok(json!({"ok": true}))
        })),
    );
    registry.register(
        "echo",
        Arc::new(FnUtility(|args: Args| -> Result<Value, UtilityError> {
            Ok(Value::Object(args))
        })),
    );
    registry.register(
        "fail",
        Arc::new(FnUtility(|_: Args| -> Result<Value, UtilityError> {
            Err(UtilityError::msg("forced failure"))
        })),
    );
    registry
}

/// Engine over the given store with the standard test registry.
pub fn engine_over(store: Arc<InMemoryGraphStore>) -> Engine {
    Engine::new(store, Arc::new(test_registry()))
}

/// Engine with a caller-tailored registry.
pub fn engine_with(store: Arc<InMemoryGraphStore>, registry: UtilityRegistry) -> Engine {
    Engine::new(store, Arc::new(registry))
}

/// A functionless pass-through step.
pub fn passthrough(id: &str) -> StepDefinition {
    StepDefinition::new(id)
}

/// A step bound to a utility with a parameter template.
pub fn step(id: &str, function: &str, input: Value) -> StepDefinition {
    StepDefinition::new(id).with_function(function).with_input(&input)
}

/// An unconditional NEXT edge.
pub fn edge(target: &str) -> EdgeDefinition {
    EdgeDefinition::to(target)
}
