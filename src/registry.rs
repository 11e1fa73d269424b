//! Utility registry: dotted names mapped to invocable utilities.
//!
//! A step's `function` attribute names an entry here. Entries carry
//! capability flags instead of the engine matching magic names:
//!
//! - `suspends`: the user-input request; the engine never invokes it; the
//!   step transitions to `awaiting_input` and the session pauses.
//! - `replies`: a reply utility; on completion the engine appends an
//!   assistant message taken from the result.
//!
//! An entry may also be registered with no handler at all (`permit`), in
//! which case execution is a trivial success producing an empty mapping.
//! Lookup tolerates the original naming convention: `module.function` is
//! retried as `utils.module.function`.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Keyword arguments handed to a utility: the step's resolved parameter
/// template.
pub type Args = Map<String, Value>;

/// Failure raised by a utility invocation; the engine records the message
/// on the step and continues with sibling branches.
#[derive(Debug, Error, Diagnostic)]
pub enum UtilityError {
    #[error("invalid argument: {0}")]
    #[diagnostic(code(trellis::utility::invalid_argument))]
    InvalidArgument(String),

    #[error("{0}")]
    #[diagnostic(code(trellis::utility::failed))]
    Failed(String),
}

impl UtilityError {
    /// Shorthand for a plain failure message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// An invocable workflow utility.
///
/// Implementations should be stateless; they receive the resolved keyword
/// arguments and return a JSON-serializable result that lands in the
/// step's rolling output window. Utilities may block on I/O; the engine
/// treats the call as opaque.
#[async_trait]
pub trait Utility: Send + Sync {
    async fn call(&self, args: Args) -> Result<Value, UtilityError>;
}

/// Wraps a plain closure as a [`Utility`]; handy in tests and for simple
/// built-ins.
pub struct FnUtility<F>(pub F);

#[async_trait]
impl<F> Utility for FnUtility<F>
where
    F: Fn(Args) -> Result<Value, UtilityError> + Send + Sync,
{
    async fn call(&self, args: Args) -> Result<Value, UtilityError> {
        (self.0)(args)
    }
}

/// A registered utility with its capability flags.
#[derive(Clone)]
pub struct UtilityEntry {
    handler: Option<Arc<dyn Utility>>,
    suspends: bool,
    replies: bool,
}

impl UtilityEntry {
    /// The invocable handler, if the entry has one.
    #[must_use]
    pub fn handler(&self) -> Option<&Arc<dyn Utility>> {
        self.handler.as_ref()
    }

    /// Whether encountering this entry suspends the session for user input.
    #[must_use]
    pub fn suspends(&self) -> bool {
        self.suspends
    }

    /// Whether a completed result should append an assistant message.
    #[must_use]
    pub fn replies(&self) -> bool {
        self.replies
    }
}

/// Name → entry mapping consulted by the engine.
#[derive(Clone, Default)]
pub struct UtilityRegistry {
    entries: FxHashMap<String, UtilityEntry>,
}

impl UtilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an ordinary utility.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Utility>) {
        self.insert(name, Some(handler), false, false);
    }

    /// Registers a reply utility: its completed result is surfaced to the
    /// conversation as an assistant message.
    pub fn register_reply(&mut self, name: impl Into<String>, handler: Arc<dyn Utility>) {
        self.insert(name, Some(handler), false, true);
    }

    /// Registers the user-input request under the given name. The engine
    /// never invokes it; reaching a step with this function suspends the
    /// session.
    pub fn register_input_request(&mut self, name: impl Into<String>) {
        self.insert(name, None, true, false);
    }

    /// Marks a name as permitted without a handler: execution is a trivial
    /// success producing an empty mapping.
    pub fn permit(&mut self, name: impl Into<String>) {
        self.insert(name, None, false, false);
    }

    fn insert(
        &mut self,
        name: impl Into<String>,
        handler: Option<Arc<dyn Utility>>,
        suspends: bool,
        replies: bool,
    ) {
        let name = name.into();
        debug!(utility = %name, suspends, replies, "registered utility");
        self.entries.insert(
            name,
            UtilityEntry {
                handler,
                suspends,
                replies,
            },
        );
    }

    /// Looks up an entry, retrying `module.function` as
    /// `utils.module.function` for definitions written in the short form.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&UtilityEntry> {
        if let Some(entry) = self.entries.get(name) {
            return Some(entry);
        }
        if name.contains('.') && !name.starts_with("utils.") {
            return self.entries.get(&format!("utils.{name}"));
        }
        None
    }
}

/// Built-in reply utility: echoes its arguments so the message content is
/// available both in the output window and to the conversation history.
pub struct Reply;

#[async_trait]
impl Utility for Reply {
    async fn call(&self, args: Args) -> Result<Value, UtilityError> {
        Ok(Value::Object(args))
    }
}

/// Extracts the user-facing text of a reply result: the first non-empty of
/// `message`, `content`, `response`.
#[must_use]
pub fn reply_content(result: &Value) -> Option<&str> {
    let map = result.as_object()?;
    ["message", "content", "response"]
        .iter()
        .filter_map(|field| map.get(*field))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

/// The registry the binary starts with: the conventional reply and
/// input-request names.
#[must_use]
pub fn default_registry() -> UtilityRegistry {
    let mut registry = UtilityRegistry::new();
    registry.register_reply("utils.reply.reply", Arc::new(Reply));
    registry.register_input_request("utils.request.request");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn reply_echoes_args() {
        let mut args = Args::new();
        args.insert("message".to_string(), json!("hi"));
        let result = Reply.call(args).await.unwrap();
        assert_eq!(result, json!({"message": "hi"}));
        assert_eq!(reply_content(&result), Some("hi"));
    }

    #[test]
    fn reply_content_field_precedence() {
        assert_eq!(
            reply_content(&json!({"content": "b", "message": "a"})),
            Some("a")
        );
        assert_eq!(reply_content(&json!({"response": "c"})), Some("c"));
        assert_eq!(reply_content(&json!({"message": ""})), None);
        assert_eq!(reply_content(&json!("bare")), None);
    }

    #[test]
    fn lookup_retries_with_utils_prefix() {
        let registry = default_registry();
        assert!(registry.get("utils.reply.reply").is_some());
        assert!(registry.get("reply.reply").is_some());
        assert!(registry.get("nope.nope").is_none());
    }

    #[test]
    fn capability_flags() {
        let registry = default_registry();
        assert!(registry.get("utils.request.request").unwrap().suspends());
        assert!(registry.get("utils.reply.reply").unwrap().replies());
        assert!(!registry.get("utils.reply.reply").unwrap().suspends());

        let mut registry = UtilityRegistry::new();
        registry.permit("utils.noop.noop");
        let entry = registry.get("utils.noop.noop").unwrap();
        assert!(entry.handler().is_none());
        assert!(!entry.suspends());
    }

    #[tokio::test]
    async fn fn_utility_wraps_closures() {
        let double = FnUtility(|args: Args| {
            let n = args
                .get("n")
                .and_then(Value::as_i64)
                .ok_or_else(|| UtilityError::InvalidArgument("n".into()))?;
            Ok(json!({"n": n * 2}))
        });
        let mut args = Args::new();
        args.insert("n".to_string(), json!(4));
        assert_eq!(double.call(args).await.unwrap(), json!({"n": 8}));
        assert!(double.call(Args::new()).await.is_err());
    }
}
