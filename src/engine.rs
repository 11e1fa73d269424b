//! The workflow engine: the activate / execute / advance loop.
//!
//! One driver per session advances the workflow until nothing is left to
//! run, a step suspends on user input, or the iteration safety bound is
//! reached. Per iteration the driver:
//!
//! 1. reads the state document,
//! 2. executes every `active` step, resolving its parameter template,
//!    dispatching to the registered utility, and recording the result in
//!    the step's rolling output window,
//! 3. advances NEXT edges out of freshly-completed steps, activating
//!    targets whose conditions hold (ordered by edge priority).
//!
//! Every mutation flows through one [`SessionStore::update`] transaction
//! per logical event; a per-session `tokio::sync::Mutex` serialises
//! [`Engine::process`] and [`Engine::submit_input`] so no two drivers ever
//! advance the same session concurrently. The engine itself is stateless
//! beyond its injected collaborators.

use std::sync::Arc;

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex as SessionLock;
use tracing::{debug, instrument, warn};

use crate::conditions::edge_satisfied;
use crate::message::ChatMessage;
use crate::registry::{reply_content, Args, UtilityRegistry};
use crate::resolver::resolve_template;
use crate::sessions::SessionStore;
use crate::state::SessionState;
use crate::store::{GraphStore, StoreError};
use crate::types::{EngineStatus, StepStatus, ROOT_STEP};

/// Default iteration safety bound for one drive.
pub const DEFAULT_ITERATION_MAX: usize = 1000;

/// Edges without an explicit priority sort after prioritised ones.
const DEFAULT_EDGE_PRIORITY: i64 = 100;

/// Fields probed, in order, for the user-facing prompt of a suspended step.
const PROMPT_FIELDS: [&str; 5] = ["prompt", "query", "message", "content", "text"];

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("session not found: {id}")]
    #[diagnostic(code(trellis::engine::session_not_found))]
    SessionNotFound { id: String },

    /// `submit_input` was called while no step awaits input.
    #[error("no step is awaiting input in session {id}")]
    #[diagnostic(
        code(trellis::engine::no_awaiting_step),
        help("Drive the session with process() and check the returned status.")
    )]
    NoAwaitingStep { id: String },

    #[error(transparent)]
    #[diagnostic(code(trellis::engine::store))]
    Store(#[from] StoreError),
}

/// Payload describing a suspended session: what is being asked, and with
/// which options.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AwaitingInput {
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Outcome of executing one step.
enum StepOutcome {
    Completed,
    Pending,
    Errored,
    Awaiting,
}

/// The per-session workflow driver.
///
/// Holds its collaborators by injection and may be shared behind an `Arc`;
/// all per-session state lives in the store.
pub struct Engine {
    graph: Arc<dyn GraphStore>,
    sessions: SessionStore,
    registry: Arc<UtilityRegistry>,
    iteration_max: usize,
    locks: Mutex<FxHashMap<String, Arc<SessionLock<()>>>>,
}

impl Engine {
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>, registry: Arc<UtilityRegistry>) -> Self {
        let sessions = SessionStore::new(Arc::clone(&graph));
        Self {
            graph,
            sessions,
            registry,
            iteration_max: DEFAULT_ITERATION_MAX,
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Overrides the iteration safety bound.
    #[must_use]
    pub fn with_iteration_max(mut self, iteration_max: usize) -> Self {
        self.iteration_max = iteration_max;
        self
    }

    /// The typed session store this engine drives.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Creates a session, optionally seeded with initial data.
    pub async fn create_session(
        &self,
        workflow_id: &str,
        seed: Option<Map<String, Value>>,
    ) -> Result<String, EngineError> {
        Ok(self.sessions.create(workflow_id, seed).await?)
    }

    /// Reads a session's current state document.
    pub async fn get_session(&self, id: &str) -> Result<Option<SessionState>, EngineError> {
        Ok(self.sessions.get(id).await?)
    }

    /// Drives the session until completion, suspension, or the iteration
    /// bound.
    #[instrument(skip(self), err)]
    pub async fn process(&self, session_id: &str) -> Result<EngineStatus, EngineError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;
        self.drive(session_id).await
    }

    /// Delivers user input to the suspended step and resumes the session.
    ///
    /// Appends the input to the awaiting step's output window, records a
    /// `user` message, marks the step complete, and re-enters the drive
    /// loop.
    #[instrument(skip(self, input), err)]
    pub async fn submit_input(
        &self,
        session_id: &str,
        input: Value,
    ) -> Result<EngineStatus, EngineError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let state = self.load(session_id).await?;
        let Some(step_id) = state.awaiting_step().map(str::to_string) else {
            return Err(EngineError::NoAwaitingStep {
                id: session_id.to_string(),
            });
        };

        let content = match &input {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.sessions
            .update(session_id, |state| {
                let stamp = state.next_stamp();
                state.push_output(&step_id, input.clone());
                let record = state.record_mut(&step_id, StepStatus::Complete);
                record.status = StepStatus::Complete;
                record.error.clear();
                record.last_executed = stamp;
                state.push_message(ChatMessage::user(content.clone()));
            })
            .await?;

        self.drive(session_id).await
    }

    /// Derives the session-level status from a state document without
    /// driving the engine.
    #[must_use]
    pub fn session_status(&self, state: &SessionState) -> EngineStatus {
        if state.awaiting_step().is_some() {
            EngineStatus::AwaitingInput
        } else if state.workflow.values().any(|r| r.status.is_open()) {
            EngineStatus::Active
        } else {
            EngineStatus::Completed
        }
    }

    /// Describes what a suspended session is waiting for, re-deriving the
    /// prompt from the awaiting step's template against current state.
    pub async fn awaiting_input(
        &self,
        state: &SessionState,
    ) -> Result<Option<AwaitingInput>, EngineError> {
        let Some(step_id) = state.awaiting_step() else {
            return Ok(None);
        };
        let mut payload = AwaitingInput {
            step_id: step_id.to_string(),
            prompt: None,
            options: None,
        };
        if let Some(step) = self.graph.get_step(step_id).await? {
            if let Some(args) = parse_template(step.input.as_deref())
                .ok()
                .map(|template| resolve_template(&template, state).unwrap_or(template))
                .and_then(|resolved| resolved.as_object().cloned())
            {
                payload.prompt = prompt_content(&args).map(str::to_string);
                payload.options = args.get("options").cloned();
            }
        }
        Ok(Some(payload))
    }

    /// The activate/execute/advance loop.
    async fn drive(&self, session_id: &str) -> Result<EngineStatus, EngineError> {
        // Set when a step completes; pending steps are only promoted after
        // fresh completions could have changed what resolves.
        let mut progressed = false;

        for iteration in 0..self.iteration_max {
            let state = self.load(session_id).await?;
            if state.awaiting_step().is_some() {
                return Ok(EngineStatus::AwaitingInput);
            }

            let active = state.active_steps();
            if active.is_empty() {
                let activated = self.advance_edges(session_id).await?;
                if !activated.is_empty() {
                    continue;
                }
                if !state.workflow.contains_key(ROOT_STEP) {
                    self.sessions
                        .update(session_id, |state| {
                            state.set_status(ROOT_STEP, StepStatus::Active);
                        })
                        .await?;
                    continue;
                }
                if progressed && state.has_pending() {
                    self.sessions
                        .update(session_id, SessionState::promote_pending)
                        .await?;
                    progressed = false;
                    continue;
                }
                debug!(session = session_id, iteration, "workflow completed");
                return Ok(EngineStatus::Completed);
            }

            for step_id in &active {
                match self.run_step(session_id, step_id).await? {
                    StepOutcome::Awaiting => return Ok(EngineStatus::AwaitingInput),
                    StepOutcome::Completed => progressed = true,
                    StepOutcome::Pending | StepOutcome::Errored => {}
                }
            }

            self.advance_edges(session_id).await?;
        }

        warn!(
            session = session_id,
            iteration_max = self.iteration_max,
            "iteration bound reached, returning control with workflow still active"
        );
        Ok(EngineStatus::Active)
    }

    /// Executes one active step.
    async fn run_step(
        &self,
        session_id: &str,
        step_id: &str,
    ) -> Result<StepOutcome, EngineError> {
        let Some(step) = self.graph.get_step(step_id).await? else {
            warn!(session = session_id, step = step_id, "step not found");
            self.mark_error(session_id, step_id, "Step not found").await?;
            return Ok(StepOutcome::Errored);
        };

        let template = match parse_template(step.input.as_deref()) {
            Ok(template) => template,
            Err(error) => {
                self.mark_error(session_id, step_id, format!("invalid input template: {error}"))
                    .await?;
                return Ok(StepOutcome::Errored);
            }
        };

        let state = self.load(session_id).await?;
        let resolved = match resolve_template(&template, &state) {
            Ok(resolved) => resolved,
            Err(unresolved) => {
                debug!(
                    session = session_id,
                    step = step_id,
                    missing = %unresolved,
                    "inputs not yet resolvable, parking step"
                );
                self.sessions
                    .update(session_id, |state| {
                        state.set_status(step_id, StepStatus::Pending);
                    })
                    .await?;
                return Ok(StepOutcome::Pending);
            }
        };
        let args: Args = match resolved {
            Value::Object(map) => map,
            _ => {
                self.mark_error(session_id, step_id, "input template must be a JSON object")
                    .await?;
                return Ok(StepOutcome::Errored);
            }
        };

        let Some(function) = step.function.as_deref().filter(|f| !f.is_empty()) else {
            // Pass-through step: trivial success with an empty result.
            self.record_success(session_id, step_id, Value::Object(Map::new()), false)
                .await?;
            return Ok(StepOutcome::Completed);
        };

        let Some(entry) = self.registry.get(function) else {
            self.mark_error(session_id, step_id, format!("Utility not found: {function}"))
                .await?;
            return Ok(StepOutcome::Errored);
        };

        if entry.suspends() {
            let prompt = prompt_content(&args).map(str::to_string);
            self.sessions
                .update(session_id, |state| {
                    state.set_status(step_id, StepStatus::AwaitingInput);
                    if let Some(prompt) = prompt.as_deref() {
                        if !state.has_assistant_message(prompt) {
                            state.push_message(ChatMessage::assistant(prompt));
                        }
                    }
                })
                .await?;
            debug!(session = session_id, step = step_id, "suspended for user input");
            return Ok(StepOutcome::Awaiting);
        }

        let replies = entry.replies();
        let result = match entry.handler() {
            // Permitted-but-unregistered names execute as a trivial success.
            None => Ok(Value::Object(Map::new())),
            Some(handler) => handler.call(args).await,
        };
        match result {
            Ok(value) => {
                if let Some(message) = result_error(&value) {
                    self.mark_error(session_id, step_id, message).await?;
                    return Ok(StepOutcome::Errored);
                }
                self.record_success(session_id, step_id, value, replies).await?;
                Ok(StepOutcome::Completed)
            }
            Err(error) => {
                warn!(
                    session = session_id,
                    step = step_id,
                    utility = function,
                    %error,
                    "utility failed"
                );
                self.mark_error(session_id, step_id, error.to_string()).await?;
                Ok(StepOutcome::Errored)
            }
        }
    }

    /// Records a successful execution: output appended (window-trimmed),
    /// status complete, execution stamped, and for reply utilities an
    /// assistant message.
    async fn record_success(
        &self,
        session_id: &str,
        step_id: &str,
        value: Value,
        replies: bool,
    ) -> Result<(), EngineError> {
        let reply = replies
            .then(|| reply_content(&value).map(str::to_string))
            .flatten();
        self.sessions
            .update(session_id, |state| {
                let stamp = state.next_stamp();
                state.push_output(step_id, value.clone());
                let record = state.record_mut(step_id, StepStatus::Complete);
                record.status = StepStatus::Complete;
                record.error.clear();
                record.last_executed = stamp;
                if let Some(content) = reply.as_deref() {
                    state.push_message(ChatMessage::assistant(content));
                }
            })
            .await?;
        Ok(())
    }

    async fn mark_error(
        &self,
        session_id: &str,
        step_id: &str,
        message: impl Into<String>,
    ) -> Result<(), EngineError> {
        let message = message.into();
        self.sessions
            .update(session_id, |state| state.mark_error(step_id, message.clone()))
            .await?;
        Ok(())
    }

    /// Evaluates outgoing edges of every step completed at or after
    /// `last_evaluated`, activating satisfied targets in priority order.
    ///
    /// Targets currently in `error` are re-activated with their error
    /// cleared, so loops through a failing branch can recover; targets
    /// already active or awaiting input are left alone.
    async fn advance_edges(&self, session_id: &str) -> Result<Vec<String>, EngineError> {
        let state = self.load(session_id).await?;
        let completed: Vec<String> = state
            .workflow
            .iter()
            .filter(|(_, r)| {
                r.status == StepStatus::Complete && r.last_executed >= state.last_evaluated
            })
            .map(|(id, _)| id.clone())
            .collect();
        if completed.is_empty() {
            return Ok(Vec::new());
        }

        // (priority, discovery order, target)
        let mut candidates: Vec<(i64, usize, String)> = Vec::new();
        let mut discovery = 0usize;
        for source in &completed {
            for edge in self.graph.outgoing_edges(source).await? {
                let order = discovery;
                discovery += 1;
                if !edge_satisfied(&edge, &state) {
                    continue;
                }
                candidates.push((
                    edge.priority.unwrap_or(DEFAULT_EDGE_PRIORITY),
                    order,
                    edge.target,
                ));
            }
        }
        candidates.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut activated: Vec<String> = Vec::new();
        for (_, _, target) in candidates {
            if activated.contains(&target) {
                continue;
            }
            match state.workflow.get(&target).map(|r| r.status) {
                Some(StepStatus::Active) | Some(StepStatus::AwaitingInput) => {}
                _ => activated.push(target),
            }
        }

        let to_activate = activated.clone();
        self.sessions
            .update(session_id, |state| {
                for target in &to_activate {
                    let record = state.record_mut(target, StepStatus::Active);
                    record.status = StepStatus::Active;
                    record.error.clear();
                }
                state.last_evaluated = state.next_stamp();
            })
            .await?;
        if !activated.is_empty() {
            debug!(session = session_id, ?activated, "edge advance activated steps");
        }
        Ok(activated)
    }

    async fn load(&self, session_id: &str) -> Result<SessionState, EngineError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound {
                id: session_id.to_string(),
            })
    }

    fn session_lock(&self, session_id: &str) -> Arc<SessionLock<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(SessionLock::new(()))),
        )
    }
}

/// Parses a step's raw input template; absent or blank templates are an
/// empty object.
fn parse_template(raw: Option<&str>) -> Result<Value, serde_json::Error> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
        _ => Ok(Value::Object(Map::new())),
    }
}

/// The first prompt-ish field of a suspended step's resolved arguments.
fn prompt_content(args: &Args) -> Option<&str> {
    PROMPT_FIELDS
        .iter()
        .filter_map(|field| args.get(*field))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

/// A utility result carrying an `"error"` key marks the step errored.
fn result_error(value: &Value) -> Option<String> {
    let error = value.as_object()?.get("error")?;
    match error {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
