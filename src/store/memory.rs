//! Volatile graph store for tests and development.
//!
//! Workflows are seeded programmatically with [`InMemoryGraphStore::insert_step`]
//! and [`InMemoryGraphStore::insert_edge`]; sessions live in a mutex-guarded
//! map. The transactional contract is honoured by holding the lock across
//! the read-modify-write and discarding the result on closure failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{EdgeDefinition, GraphStore, SessionStateUpdate, StepDefinition, StoreError};

#[derive(Default)]
struct Inner {
    steps: FxHashMap<String, StepDefinition>,
    edges: FxHashMap<String, Vec<EdgeDefinition>>,
    sessions: FxHashMap<String, SessionRow>,
}

struct SessionRow {
    state: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// In-memory [`GraphStore`] backend.
///
/// # Examples
///
/// ```rust
/// use trellis::store::{EdgeDefinition, InMemoryGraphStore, StepDefinition};
/// use serde_json::json;
///
/// let store = InMemoryGraphStore::new();
/// store.insert_step(StepDefinition::new("root"));
/// store.insert_step(
///     StepDefinition::new("greet")
///         .with_function("utils.reply.reply")
///         .with_input(&json!({"message": "hi"})),
/// );
/// store.insert_edge("root", EdgeDefinition::to("greet"));
/// ```
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: Mutex<Inner>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a step definition.
    pub fn insert_step(&self, step: StepDefinition) {
        self.inner.lock().steps.insert(step.id.clone(), step);
    }

    /// Appends an outgoing NEXT edge; edges keep insertion order.
    pub fn insert_edge(&self, source: impl Into<String>, edge: EdgeDefinition) {
        self.inner
            .lock()
            .edges
            .entry(source.into())
            .or_default()
            .push(edge);
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn get_step(&self, id: &str) -> Result<Option<StepDefinition>, StoreError> {
        Ok(self.inner.lock().steps.get(id).cloned())
    }

    async fn outgoing_edges(&self, id: &str) -> Result<Vec<EdgeDefinition>, StoreError> {
        Ok(self.inner.lock().edges.get(id).cloned().unwrap_or_default())
    }

    async fn create_session(
        &self,
        id: &str,
        state: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(id) {
            return Err(StoreError::SessionExists { id: id.to_string() });
        }
        inner.sessions.insert(
            id.to_string(),
            SessionRow {
                state: state.to_string(),
                created_at,
            },
        );
        Ok(())
    }

    async fn read_session_state(&self, id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().sessions.get(id).map(|r| r.state.clone()))
    }

    async fn update_session_state(
        &self,
        id: &str,
        apply: SessionStateUpdate<'_>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let row = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound { id: id.to_string() })?;
        let updated = apply(row.state.clone())?;
        row.state = updated;
        Ok(())
    }
}
