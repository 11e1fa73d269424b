//! The per-session state document.
//!
//! Each execution of a workflow owns exactly one [`SessionState`]: a
//! JSON-shaped document recording which steps have been scheduled and in
//! what state they are, the rolling window of recent outputs per step, and
//! the conversation history. The document is persisted as a JSON string in
//! the graph store and every mutation flows through a store transaction
//! (see [`crate::sessions::SessionStore`]).
//!
//! # Shape
//!
//! ```json
//! {
//!   "id": "2f0c…",
//!   "workflow_id": "default",
//!   "workflow": { "root": { "status": "active", "error": "", "last_executed": 0 } },
//!   "last_evaluated": 0,
//!   "data": { "outputs": {}, "messages": [] }
//! }
//! ```
//!
//! `workflow` and `data.outputs` are insertion-ordered maps: the engine
//! enumerates active steps in the order they were scheduled.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;
use crate::types::{StepStatus, ROOT_STEP};

/// Maximum retained outputs per step; the oldest entry is evicted when a
/// further append would exceed it.
pub const OUTPUT_WINDOW: usize = 5;

/// Bookkeeping for one scheduled step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: StepStatus,
    /// Last error message; empty when the step is not in `error`.
    #[serde(default)]
    pub error: String,
    /// Epoch milliseconds of the most recent successful execution, 0 if never.
    #[serde(default)]
    pub last_executed: i64,
}

impl StepRecord {
    /// A fresh record in the given status with no error and no execution.
    #[must_use]
    pub fn with_status(status: StepStatus) -> Self {
        Self {
            status,
            error: String::new(),
            last_executed: 0,
        }
    }
}

/// The `data` section: rolling outputs and conversation history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// Per-step output sequences, newest last, each at most [`OUTPUT_WINDOW`]
    /// entries long. Seeded pseudo-steps (initial data) also live here.
    #[serde(default)]
    pub outputs: IndexMap<String, Vec<Value>>,
    /// Conversation messages in append order.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// The complete state document for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: String,
    #[serde(default)]
    pub workflow_id: String,
    /// Every step that has ever been scheduled, in scheduling order.
    #[serde(default)]
    pub workflow: IndexMap<String, StepRecord>,
    /// High-water mark (epoch ms) of the last edge-advance pass.
    #[serde(default)]
    pub last_evaluated: i64,
    #[serde(default)]
    pub data: SessionData,
}

impl SessionState {
    /// Initial document for a fresh session: root is active, everything
    /// else is empty.
    #[must_use]
    pub fn new(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        let mut workflow = IndexMap::new();
        workflow.insert(
            ROOT_STEP.to_string(),
            StepRecord::with_status(StepStatus::Active),
        );
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            workflow,
            last_evaluated: 0,
            data: SessionData::default(),
        }
    }

    /// The record for a step, inserting a fresh one in the given status if
    /// the step has never been scheduled.
    pub fn record_mut(&mut self, step_id: &str, default_status: StepStatus) -> &mut StepRecord {
        self.workflow
            .entry(step_id.to_string())
            .or_insert_with(|| StepRecord::with_status(default_status))
    }

    /// Sets a step's status, scheduling the step if necessary.
    pub fn set_status(&mut self, step_id: &str, status: StepStatus) {
        let record = self.record_mut(step_id, status);
        record.status = status;
    }

    /// Marks a step errored with the given message.
    pub fn mark_error(&mut self, step_id: &str, message: impl Into<String>) {
        let record = self.record_mut(step_id, StepStatus::Error);
        record.status = StepStatus::Error;
        record.error = message.into();
    }

    /// Step ids currently in `active`, in scheduling order.
    #[must_use]
    pub fn active_steps(&self) -> Vec<String> {
        self.workflow
            .iter()
            .filter(|(_, r)| r.status == StepStatus::Active)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns true if any step is `pending`.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.workflow
            .values()
            .any(|r| r.status == StepStatus::Pending)
    }

    /// Promotes every `pending` step back to `active`.
    pub fn promote_pending(&mut self) {
        for record in self.workflow.values_mut() {
            if record.status == StepStatus::Pending {
                record.status = StepStatus::Active;
            }
        }
    }

    /// The step currently suspended on user input, if any.
    #[must_use]
    pub fn awaiting_step(&self) -> Option<&str> {
        self.workflow
            .iter()
            .find(|(_, r)| r.status == StepStatus::AwaitingInput)
            .map(|(id, _)| id.as_str())
    }

    /// Appends an output for a step, evicting the oldest entry when the
    /// window would exceed [`OUTPUT_WINDOW`].
    pub fn push_output(&mut self, step_id: &str, value: Value) {
        let window = self.data.outputs.entry(step_id.to_string()).or_default();
        window.push(value);
        while window.len() > OUTPUT_WINDOW {
            window.remove(0);
        }
    }

    /// The newest output of a step.
    #[must_use]
    pub fn latest_output(&self, step_id: &str) -> Option<&Value> {
        self.data.outputs.get(step_id).and_then(|w| w.last())
    }

    /// Indexes into a step's retained output window.
    ///
    /// Non-negative indices count from the oldest retained entry; negative
    /// indices count back from the newest (`-1` is the newest).
    #[must_use]
    pub fn output_at(&self, step_id: &str, index: i64) -> Option<&Value> {
        index_slice(self.data.outputs.get(step_id)?, index)
    }

    /// Appends a message to the conversation history.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.data.messages.push(message);
    }

    /// The next event stamp: wall-clock epoch milliseconds, forced strictly
    /// past every stamp already stored in the document.
    ///
    /// Completion and edge-advance events must be totally ordered even when
    /// several land within the same millisecond, otherwise a completed step
    /// could be re-evaluated against an advance pass it already took part
    /// in.
    #[must_use]
    pub fn next_stamp(&self) -> i64 {
        let max_seen = self
            .workflow
            .values()
            .map(|r| r.last_executed)
            .chain([self.last_evaluated])
            .max()
            .unwrap_or(0);
        crate::types::now_millis().max(max_seen + 1)
    }

    /// Returns true if an assistant message with exactly this content is
    /// already present. Suspension prompts use this to avoid re-asking the
    /// same question twice in the transcript.
    #[must_use]
    pub fn has_assistant_message(&self, content: &str) -> bool {
        self.data
            .messages
            .iter()
            .any(|m| m.has_role(ChatMessage::ASSISTANT) && m.content == content)
    }
}

/// Shared negative-index lookup used for both output windows and array
/// fields inside resolved values.
#[must_use]
pub(crate) fn index_slice(items: &[Value], index: i64) -> Option<&Value> {
    let len = items.len() as i64;
    let effective = if index < 0 { len + index } else { index };
    if (0..len).contains(&effective) {
        items.get(effective as usize)
    } else {
        None
    }
}
