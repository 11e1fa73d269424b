//! Graph store adapter: typed CRUD over steps, NEXT edges, and sessions.
//!
//! Workflow definitions live as step nodes and NEXT edges in a graph-shaped
//! store; sessions are nodes carrying their state document as a JSON
//! string. This module defines the adapter contract plus the serde-friendly
//! row types; the backends live in [`memory`] and [`sqlite`].
//!
//! Templates and edge conditions are stored as raw strings: the adapter
//! hands them back unparsed and the engine interprets them.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

use crate::types::BoolOperator;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

/// Errors surfaced by graph store backends.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// The addressed session node does not exist.
    #[error("session not found: {id}")]
    #[diagnostic(code(trellis::store::session_not_found))]
    SessionNotFound { id: String },

    /// A session node with this id already exists.
    #[error("session already exists: {id}")]
    #[diagnostic(code(trellis::store::session_exists))]
    SessionExists { id: String },

    /// Backend I/O or transaction failure; the transaction was rolled back.
    #[error("store backend error: {message}")]
    #[diagnostic(
        code(trellis::store::backend),
        help("Check the store URL and that the schema is reachable.")
    )]
    Backend { message: String },

    /// The stored state document could not be (de)serialized.
    #[error("state serialization failed: {source}")]
    #[diagnostic(code(trellis::store::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// A step node: one unit of work in a workflow definition.
///
/// The adapter exposes the legacy `function` attribute and the `utility`
/// variant as the single [`function`](Self::function) field (`function`
/// wins when both are present).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepDefinition {
    pub id: String,
    /// Dotted utility name; `None`/empty means a no-op pass-through step.
    pub function: Option<String>,
    /// Raw JSON parameter template, possibly containing references.
    pub input: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl StepDefinition {
    /// Starts a definition for the given step id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets the utility name this step dispatches to.
    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Sets the parameter template from a JSON value.
    #[must_use]
    pub fn with_input(mut self, input: &serde_json::Value) -> Self {
        self.input = Some(input.to_string());
        self
    }

    /// Sets the human description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// A NEXT edge from one step to another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeDefinition {
    pub target: String,
    /// Raw JSON condition document; `None` means unconditionally taken.
    pub condition: Option<String>,
    pub operator: BoolOperator,
    /// Activation order among siblings, lower first.
    pub priority: Option<i64>,
}

impl EdgeDefinition {
    /// An unconditional edge to the given target.
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            condition: None,
            operator: BoolOperator::And,
            priority: None,
        }
    }

    /// Sets the condition document from a JSON value.
    #[must_use]
    pub fn with_condition(mut self, condition: &serde_json::Value) -> Self {
        self.condition = Some(condition.to_string());
        self
    }

    /// Sets the clause-combining operator.
    #[must_use]
    pub fn with_operator(mut self, operator: BoolOperator) -> Self {
        self.operator = operator;
        self
    }

    /// Sets the activation priority (lower first).
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// The read-modify-write body passed to [`GraphStore::update_session_state`].
///
/// Receives the current raw state string and returns the replacement; an
/// `Err` rolls the transaction back and propagates.
pub type SessionStateUpdate<'a> =
    Box<dyn FnOnce(String) -> Result<String, StoreError> + Send + 'a>;

/// Contract every graph store backend implements.
///
/// All session-state mutation funnels through
/// [`update_session_state`](Self::update_session_state): the backend opens
/// a transaction, reads the current state, applies the caller's closure,
/// writes the result, and commits: rolling back on any failure. Backends
/// never cache: every read hits the store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Fetches a step definition, `None` when the id is unknown.
    async fn get_step(&self, id: &str) -> Result<Option<StepDefinition>, StoreError>;

    /// Outgoing NEXT edges of a step, in discovery order.
    async fn outgoing_edges(&self, id: &str) -> Result<Vec<EdgeDefinition>, StoreError>;

    /// Creates a session node with its initial state document.
    async fn create_session(
        &self,
        id: &str,
        state: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Reads a consistent snapshot of a session's raw state document.
    async fn read_session_state(&self, id: &str) -> Result<Option<String>, StoreError>;

    /// Transactional read-modify-write of a session's state document.
    async fn update_session_state(
        &self,
        id: &str,
        apply: SessionStateUpdate<'_>,
    ) -> Result<(), StoreError>;
}

/// Merges the legacy `function` attribute with the `utility` variant:
/// `function` wins, `utility` fills in when `function` is absent or empty.
#[must_use]
pub(crate) fn merge_function_attrs(
    function: Option<String>,
    utility: Option<String>,
) -> Option<String> {
    function.filter(|f| !f.is_empty()).or(utility)
}
