//! Session store: typed access to session state with optimistic
//! read-modify-write semantics.
//!
//! Wraps the raw string contract of [`GraphStore`] with parse/serialize at
//! the boundary so callers mutate the typed [`SessionState`] document.
//! There is no caching: every `get` reads the store, every `update` runs
//! inside a store transaction, and direct state sharing between callers is
//! impossible by construction.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::state::SessionState;
use crate::store::{GraphStore, StoreError};

/// The reserved pseudo-step id under which the whole seed object is stored.
pub const INITIAL_STEP: &str = "initial";

/// Bound on transparent retries of a contended update transaction.
const UPDATE_ATTEMPTS: usize = 3;

/// Typed session access over a [`GraphStore`].
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn GraphStore>,
}

impl SessionStore {
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Creates a session with a fresh id and the initial state document.
    ///
    /// When `seed` is present, each top-level entry is stored as a
    /// single-element output sequence under its own key (making it
    /// addressable as `@{SESSION_ID}.key…`), and the whole object is stored
    /// the same way under the reserved id [`INITIAL_STEP`].
    #[instrument(skip(self, seed), err)]
    pub async fn create(
        &self,
        workflow_id: &str,
        seed: Option<Map<String, Value>>,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut state = SessionState::new(&id, workflow_id);
        if let Some(seed) = seed {
            if !seed.is_empty() {
                for (key, value) in &seed {
                    state.push_output(key, value.clone());
                }
                state.push_output(INITIAL_STEP, Value::Object(seed));
            }
        }
        let raw = serde_json::to_string(&state)?;
        self.store.create_session(&id, &raw, Utc::now()).await?;
        Ok(id)
    }

    /// Reads and parses a session's state document.
    pub async fn get(&self, id: &str) -> Result<Option<SessionState>, StoreError> {
        let raw = self.store.read_session_state(id).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    /// Applies a mutation to the state document inside a store transaction.
    ///
    /// The mutator runs against the freshly-read document; its result is
    /// written back before the transaction commits. Serialization failures
    /// roll the transaction back. Transient backend failures (write
    /// contention between sessions) are retried a small number of times,
    /// re-reading the document each attempt, before surfacing.
    pub async fn update<F>(&self, id: &str, mut mutate: F) -> Result<(), StoreError>
    where
        F: FnMut(&mut SessionState) + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .store
                .update_session_state(
                    id,
                    Box::new(|raw| {
                        let mut state: SessionState = serde_json::from_str(&raw)?;
                        mutate(&mut state);
                        Ok(serde_json::to_string(&state)?)
                    }),
                )
                .await;
            match result {
                Err(StoreError::Backend { ref message }) if attempt < UPDATE_ATTEMPTS => {
                    debug!(session = id, attempt, %message, "retrying session update");
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OUTPUT_WINDOW;
    use crate::store::InMemoryGraphStore;
    use crate::types::{StepStatus, ROOT_STEP};
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(InMemoryGraphStore::new()))
    }

    #[tokio::test]
    async fn create_produces_root_active_state() {
        let sessions = store();
        let id = sessions.create("default", None).await.unwrap();
        let state = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(state.id, id);
        assert_eq!(state.workflow_id, "default");
        assert_eq!(state.workflow[ROOT_STEP].status, StepStatus::Active);
        assert!(state.data.outputs.is_empty());
    }

    #[tokio::test]
    async fn seed_data_lands_under_keys_and_initial() {
        let sessions = store();
        let seed = json!({"customer": {"name": "Ada"}, "plan": "pro"});
        let Value::Object(seed) = seed else { unreachable!() };
        let id = sessions.create("default", Some(seed)).await.unwrap();
        let state = sessions.get(&id).await.unwrap().unwrap();

        assert_eq!(
            state.data.outputs["customer"],
            vec![json!({"name": "Ada"})]
        );
        assert_eq!(state.data.outputs["plan"], vec![json!("pro")]);
        assert_eq!(
            state.data.outputs[INITIAL_STEP],
            vec![json!({"customer": {"name": "Ada"}, "plan": "pro"})]
        );
        // Seeded pseudo-steps are outputs only, not scheduled steps.
        assert!(!state.workflow.contains_key("customer"));
    }

    #[tokio::test]
    async fn update_round_trips_through_the_store() {
        let sessions = store();
        let id = sessions.create("default", None).await.unwrap();
        for i in 0..(OUTPUT_WINDOW + 2) {
            sessions
                .update(&id, |state| state.push_output("tick", json!(i)))
                .await
                .unwrap();
        }
        let state = sessions.get(&id).await.unwrap().unwrap();
        assert_eq!(state.data.outputs["tick"].len(), OUTPUT_WINDOW);
    }

    #[tokio::test]
    async fn get_unknown_session_is_none() {
        let sessions = store();
        assert!(sessions.get("nope").await.unwrap().is_none());
    }
}
