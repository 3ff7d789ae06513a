//! A single notebook cell.
//!
//! Cells are created and mutated only through their owning
//! [`Worksheet`](crate::Worksheet), which keeps its busy/modified bookkeeping
//! in step with every change made here. Views may subscribe to a cell's own
//! [`ChangeBus`] through [`Cell::changes`].

use crate::change_bus::ChangeBus;
use crate::result::CellResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Stable handle to a cell. Survives reordering; never reused within a worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn new() -> Self {
        CellId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        CellId(s.to_string())
    }
}

impl From<String> for CellId {
    fn from(s: String) -> Self {
        CellId(s)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Code,
    Markdown,
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellKind::Code => write!(f, "code"),
            CellKind::Markdown => write!(f, "markdown"),
        }
    }
}

/// Evaluation lifecycle. Transitions are driven from outside the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    #[default]
    Idle,
    /// Evaluation requested, executor has not picked it up yet
    Queued,
    /// Executor acknowledged the request
    Busy,
    HasResult,
}

/// Events published on a cell's own bus.
#[derive(Debug, Clone, PartialEq)]
pub enum CellEvent {
    TextChanged { modified: bool },
    ResultChanged,
    ResultRemoved,
    EvaluationRequested,
    EvaluationStopRequested,
    StateChanged(CellState),
    ModifiedChanged(bool),
}

pub struct Cell {
    id: CellId,
    kind: CellKind,
    text: String,
    saved_text: String,
    modified: bool,
    result: Option<CellResult>,
    state: CellState,
    metadata: Map<String, Value>,
    changes: ChangeBus<CellEvent>,
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("text", &self.text)
            .field("modified", &self.modified)
            .field("state", &self.state)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

impl Cell {
    /// New cell whose initial text is also its last-saved snapshot.
    pub(crate) fn new(id: CellId, kind: CellKind, text: &str) -> Self {
        Cell {
            id,
            kind,
            text: text.to_string(),
            saved_text: text.to_string(),
            modified: false,
            result: None,
            state: CellState::Idle,
            metadata: Map::new(),
            changes: ChangeBus::new(),
        }
    }

    pub fn id(&self) -> &CellId {
        &self.id
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn is_code(&self) -> bool {
        matches!(self.kind, CellKind::Code)
    }

    pub fn is_markdown(&self) -> bool {
        matches!(self.kind, CellKind::Markdown)
    }

    pub fn get_all_text(&self) -> &str {
        &self.text
    }

    pub fn result(&self) -> Option<&CellResult> {
        self.result.as_ref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    /// Markdown cell without a rendered result. Always false for code cells.
    pub fn is_in_edit_mode(&self) -> bool {
        match self.kind {
            CellKind::Code => false,
            CellKind::Markdown => self.result.is_none(),
        }
    }

    /// Cell-level metadata carried through load/save.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn changes(&self) -> &ChangeBus<CellEvent> {
        &self.changes
    }

    pub(crate) fn set_metadata(&mut self, metadata: Map<String, Value>) {
        self.metadata = metadata;
    }

    /// Replace the text. Returns the new modified flag if it flipped.
    pub(crate) fn set_text(&mut self, text: &str) -> Option<bool> {
        if self.text == text {
            return None;
        }
        self.text = text.to_string();
        let modified = self.text != self.saved_text;
        let flipped = modified != self.modified;
        self.modified = modified;
        self.changes.publish(CellEvent::TextChanged { modified });
        flipped.then_some(modified)
    }

    pub(crate) fn set_result(&mut self, result: CellResult) {
        self.result = Some(result);
        self.changes.publish(CellEvent::ResultChanged);
        self.set_state(CellState::HasResult);
    }

    pub(crate) fn remove_result(&mut self) -> Option<CellResult> {
        let previous = self.result.take()?;
        self.changes.publish(CellEvent::ResultRemoved);
        if self.state == CellState::HasResult {
            self.set_state(CellState::Idle);
        }
        Some(previous)
    }

    /// idle/has-result -> queued. Returns false if already queued or busy.
    pub(crate) fn request_evaluation(&mut self) -> bool {
        match self.state {
            CellState::Queued | CellState::Busy => false,
            CellState::Idle | CellState::HasResult => {
                self.changes.publish(CellEvent::EvaluationRequested);
                self.set_state(CellState::Queued);
                true
            }
        }
    }

    /// Any state -> idle.
    pub(crate) fn request_stop_evaluation(&mut self) {
        self.changes.publish(CellEvent::EvaluationStopRequested);
        self.set_state(CellState::Idle);
    }

    /// Executor acknowledged the evaluation.
    pub(crate) fn mark_busy(&mut self) {
        self.set_state(CellState::Busy);
    }

    /// Executor finished. A cell that never received a result goes back to idle.
    pub(crate) fn mark_not_busy(&mut self) {
        if self.state == CellState::Busy {
            let next = if self.result.is_some() {
                CellState::HasResult
            } else {
                CellState::Idle
            };
            self.set_state(next);
        }
    }

    /// Take the current text as the saved snapshot. Returns true if the flag cleared.
    pub(crate) fn mark_saved(&mut self) -> bool {
        self.saved_text.clone_from(&self.text);
        if self.modified {
            self.modified = false;
            self.changes.publish(CellEvent::ModifiedChanged(false));
            true
        } else {
            false
        }
    }

    fn set_state(&mut self, state: CellState) {
        if self.state != state {
            self.state = state;
            self.changes.publish(CellEvent::StateChanged(state));
        }
    }
}
