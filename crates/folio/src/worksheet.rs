//! In-memory notebook document.
//!
//! A `Worksheet` owns its cells in document order and keeps the derived
//! bookkeeping (active cell, busy/modified sets, save state) consistent with
//! every mutation. Each mutation publishes on [`Worksheet::changes`]; views
//! treat those events as the only source of truth.
//!
//! ## Save state
//!
//! `save_state` has two inputs: the set of cells whose text differs from
//! the last save, and a structural flag raised by inserting, moving or
//! deleting cells or by changing the kernel name. The worksheet only drops
//! back to `Saved` on its own when both are clear; an explicit save clears
//! both.

use crate::cell::{Cell, CellId, CellKind, CellState};
use crate::change_bus::ChangeBus;
use crate::codec;
use crate::error::NotebookError;
use crate::executor::{Intent, IntentQueue, IntentReceiver};
use crate::result::CellResult;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Kernel name used when neither the caller nor the document names one.
pub const DEFAULT_KERNELNAME: &str = "python3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveState {
    Saved,
    Modified,
}

impl std::fmt::Display for SaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveState::Saved => write!(f, "saved"),
            SaveState::Modified => write!(f, "modified"),
        }
    }
}

/// Documentation worksheets are bundled, read-only documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorksheetKind {
    #[default]
    Normal,
    Documentation,
}

/// Change notifications published by a worksheet.
#[derive(Debug, Clone, PartialEq)]
pub enum WorksheetEvent {
    NewCell {
        cell_id: CellId,
        kind: CellKind,
        position: usize,
    },
    CellMoved {
        position: usize,
        new_position: usize,
    },
    DeletedCell {
        cell_id: CellId,
        position: usize,
    },
    NewActiveCell(CellId),
    NewInactiveCell(CellId),
    CellTextChanged(CellId),
    CellResultChanged(CellId),
    CellResultRemoved(CellId),
    SaveStateChange(SaveState),
    BusyCellCountChanged(usize),
    ModifiedCellCountChanged(usize),
    KernelStateChanged(String),
    PathnameChanged {
        old: Option<PathBuf>,
    },
    EvaluationRequested(CellId),
    EvaluationStopRequested(CellId),
    WorksheetEvaluationStopRequested,
    KernelRestartRequested,
    KernelShutdownRequested,
}

impl WorksheetEvent {
    /// Stable event name for logs and views.
    pub fn name(&self) -> &'static str {
        match self {
            WorksheetEvent::NewCell { .. } => "new_cell",
            WorksheetEvent::CellMoved { .. } => "cell_moved",
            WorksheetEvent::DeletedCell { .. } => "deleted_cell",
            WorksheetEvent::NewActiveCell(_) => "new_active_cell",
            WorksheetEvent::NewInactiveCell(_) => "new_inactive_cell",
            WorksheetEvent::CellTextChanged(_) => "cell_text_changed",
            WorksheetEvent::CellResultChanged(_) => "cell_result_changed",
            WorksheetEvent::CellResultRemoved(_) => "cell_result_removed",
            WorksheetEvent::SaveStateChange(_) => "save_state_change",
            WorksheetEvent::BusyCellCountChanged(_) => "busy_cell_count_changed",
            WorksheetEvent::ModifiedCellCountChanged(_) => "modified_cell_count_changed",
            WorksheetEvent::KernelStateChanged(_) => "kernel_state_changed",
            WorksheetEvent::PathnameChanged { .. } => "pathname_changed",
            WorksheetEvent::EvaluationRequested(_) => "evaluation_requested",
            WorksheetEvent::EvaluationStopRequested(_) => "evaluation_stop_requested",
            WorksheetEvent::WorksheetEvaluationStopRequested => {
                "worksheet_evaluation_stop_requested"
            }
            WorksheetEvent::KernelRestartRequested => "kernel_restart_requested",
            WorksheetEvent::KernelShutdownRequested => "kernel_shutdown_requested",
        }
    }
}

pub struct Worksheet {
    kind: WorksheetKind,
    pathname: Option<PathBuf>,
    kernelname: String,
    kernel_state: Option<String>,
    cells: Vec<Cell>,
    active_cell: Option<CellId>,
    busy_cells: HashSet<CellId>,
    modified_cells: HashSet<CellId>,
    save_state: SaveState,
    structural_edit: bool,
    last_saved: DateTime<Utc>,
    /// Document-level metadata other than `kernelspec`, kept for round-trips
    metadata: Map<String, Value>,
    changes: ChangeBus<WorksheetEvent>,
    intents: IntentQueue,
}

impl std::fmt::Debug for Worksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worksheet")
            .field("kind", &self.kind)
            .field("pathname", &self.pathname)
            .field("kernelname", &self.kernelname)
            .field("cells", &self.cells.len())
            .field("active_cell", &self.active_cell)
            .field("save_state", &self.save_state)
            .finish()
    }
}

impl Worksheet {
    /// A normal, editable worksheet. `pathname` is `None` for documents not yet on disk.
    pub fn new(pathname: Option<PathBuf>) -> Self {
        Self::with_kind(WorksheetKind::Normal, pathname)
    }

    pub fn documentation(pathname: PathBuf) -> Self {
        Self::with_kind(WorksheetKind::Documentation, Some(pathname))
    }

    pub fn with_kind(kind: WorksheetKind, pathname: Option<PathBuf>) -> Self {
        let last_saved = modification_time(pathname.as_deref());
        Worksheet {
            kind,
            pathname,
            kernelname: DEFAULT_KERNELNAME.to_string(),
            kernel_state: None,
            cells: Vec::new(),
            active_cell: None,
            busy_cells: HashSet::new(),
            modified_cells: HashSet::new(),
            save_state: SaveState::Saved,
            structural_edit: false,
            last_saved,
            metadata: Map::new(),
            changes: ChangeBus::new(),
            intents: IntentQueue::default(),
        }
    }

    pub fn changes(&self) -> &ChangeBus<WorksheetEvent> {
        &self.changes
    }

    /// Route intents to a new executor. Replaces any previous one.
    pub fn connect_executor(&mut self) -> IntentReceiver {
        self.intents.connect()
    }

    pub fn disconnect_executor(&mut self) {
        self.intents.disconnect();
    }

    pub fn kind(&self) -> WorksheetKind {
        self.kind
    }

    pub fn is_read_only(&self) -> bool {
        self.kind == WorksheetKind::Documentation
    }

    // ── Cells ───────────────────────────────────────────────────────

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, cell_id: &CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id() == cell_id)
    }

    pub fn cell_at(&self, position: usize) -> Option<&Cell> {
        self.cells.get(position)
    }

    pub fn position(&self, cell_id: &CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id() == cell_id)
    }

    pub fn get_cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Insert a code cell. `None` appends; positions past the end are clamped.
    pub fn create_cell(&mut self, position: Option<usize>, text: &str) -> CellId {
        self.insert_cell(CellKind::Code, position, text, CellId::new())
    }

    pub fn create_markdown_cell(&mut self, position: Option<usize>, text: &str) -> CellId {
        self.insert_cell(CellKind::Markdown, position, text, CellId::new())
    }

    pub(crate) fn insert_cell(
        &mut self,
        kind: CellKind,
        position: Option<usize>,
        text: &str,
        cell_id: CellId,
    ) -> CellId {
        let position = position.map_or(self.cells.len(), |p| p.min(self.cells.len()));
        self.cells
            .insert(position, Cell::new(cell_id.clone(), kind, text));
        self.changes.publish(WorksheetEvent::NewCell {
            cell_id: cell_id.clone(),
            kind,
            position,
        });
        self.mark_structural_edit();
        cell_id
    }

    pub(crate) fn set_cell_metadata(&mut self, cell_id: &CellId, metadata: Map<String, Value>) {
        if let Some(cell) = self.cell_mut(cell_id) {
            cell.set_metadata(metadata);
        }
    }

    /// Swap the cells at `position` and `new_position`. No-op if either is out of range.
    pub fn move_cell(&mut self, position: usize, new_position: usize) -> bool {
        if position.max(new_position) >= self.cells.len() {
            return false;
        }
        self.cells.swap(position, new_position);
        self.changes.publish(WorksheetEvent::CellMoved {
            position,
            new_position,
        });
        self.mark_structural_edit();
        true
    }

    /// Remove a cell, cancelling its evaluation first. No-op if absent.
    pub fn remove_cell(&mut self, cell_id: &CellId) -> bool {
        let Some(position) = self.position(cell_id) else {
            return false;
        };

        if matches!(
            self.cells[position].state(),
            CellState::Queued | CellState::Busy
        ) {
            self.request_stop_evaluation(cell_id);
        }

        self.cells.remove(position);
        if self.active_cell.as_ref() == Some(cell_id) || self.cells.is_empty() {
            self.active_cell = None;
        }
        let was_busy = self.busy_cells.remove(cell_id);
        let was_modified = self.modified_cells.remove(cell_id);

        self.changes.publish(WorksheetEvent::DeletedCell {
            cell_id: cell_id.clone(),
            position,
        });
        if was_busy {
            self.publish_busy_count();
        }
        if was_modified {
            self.publish_modified_count();
        }
        self.mark_structural_edit();
        true
    }

    pub fn remove_all_cells(&mut self) {
        while let Some(cell_id) = self.cells.first().map(|c| c.id().clone()) {
            self.remove_cell(&cell_id);
        }
    }

    // ── Active cell ─────────────────────────────────────────────────

    /// Make `cell_id` active. Publishes `new_inactive_cell` for the previous
    /// active cell, then `new_active_cell`. No-op if the cell is absent.
    pub fn set_active_cell(&mut self, cell_id: &CellId) -> bool {
        if self.position(cell_id).is_none() {
            return false;
        }
        if let Some(previous) = self.active_cell.take() {
            self.changes.publish(WorksheetEvent::NewInactiveCell(previous));
        }
        self.active_cell = Some(cell_id.clone());
        self.changes
            .publish(WorksheetEvent::NewActiveCell(cell_id.clone()));
        true
    }

    pub fn get_active_cell(&self) -> Option<&Cell> {
        self.active_cell.as_ref().and_then(|id| self.cell(id))
    }

    pub fn active_cell_id(&self) -> Option<&CellId> {
        self.active_cell.as_ref()
    }

    // ── Navigation ──────────────────────────────────────────────────

    pub fn get_next_cell(&self, cell_id: &CellId) -> Option<&Cell> {
        let position = self.position(cell_id)?;
        self.cells.get(position + 1)
    }

    pub fn get_prev_cell(&self, cell_id: &CellId) -> Option<&Cell> {
        let position = self.position(cell_id)?;
        position.checked_sub(1).and_then(|p| self.cells.get(p))
    }

    /// Next cell that is not a markdown cell in edit mode.
    pub fn get_next_visible_cell(&self, cell_id: &CellId) -> Option<&Cell> {
        let position = self.position(cell_id)?;
        self.cells[position + 1..]
            .iter()
            .find(|c| !c.is_in_edit_mode())
    }

    /// Previous cell that is not a markdown cell in edit mode.
    pub fn get_prev_visible_cell(&self, cell_id: &CellId) -> Option<&Cell> {
        let position = self.position(cell_id)?;
        self.cells[..position]
            .iter()
            .rev()
            .find(|c| !c.is_in_edit_mode())
    }

    // ── Cell content ────────────────────────────────────────────────

    /// Replace a cell's text, updating the modified set and save state.
    pub fn set_text(&mut self, cell_id: &CellId, text: &str) -> bool {
        let Some(cell) = self.cell_mut(cell_id) else {
            return false;
        };
        if cell.get_all_text() == text {
            return true;
        }
        let flipped = cell.set_text(text);
        self.changes
            .publish(WorksheetEvent::CellTextChanged(cell_id.clone()));
        if let Some(modified) = flipped {
            self.on_modified_changed(cell_id, modified);
        }
        true
    }

    pub fn set_result(&mut self, cell_id: &CellId, result: CellResult) -> bool {
        let Some(cell) = self.cell_mut(cell_id) else {
            return false;
        };
        cell.set_result(result);
        self.changes
            .publish(WorksheetEvent::CellResultChanged(cell_id.clone()));
        true
    }

    pub fn remove_result(&mut self, cell_id: &CellId) -> Option<CellResult> {
        let removed = self.cell_mut(cell_id)?.remove_result()?;
        self.changes
            .publish(WorksheetEvent::CellResultRemoved(cell_id.clone()));
        Some(removed)
    }

    /// Ask the executor to evaluate a code cell. Markdown cells are rendered
    /// in place instead. Returns false if the cell is absent or already queued.
    pub fn request_evaluation(&mut self, cell_id: &CellId) -> bool {
        let Some(cell) = self.cell(cell_id) else {
            return false;
        };
        match cell.kind() {
            CellKind::Markdown => self.render_markdown(cell_id),
            CellKind::Code => {
                let source = cell.get_all_text().to_string();
                let Some(cell) = self.cell_mut(cell_id) else {
                    return false;
                };
                if !cell.request_evaluation() {
                    return false;
                }
                self.changes
                    .publish(WorksheetEvent::EvaluationRequested(cell_id.clone()));
                self.intents.send(Intent::Evaluate {
                    cell_id: cell_id.clone(),
                    source,
                });
                true
            }
        }
    }

    pub fn request_stop_evaluation(&mut self, cell_id: &CellId) -> bool {
        let Some(cell) = self.cell_mut(cell_id) else {
            return false;
        };
        cell.request_stop_evaluation();
        self.changes
            .publish(WorksheetEvent::EvaluationStopRequested(cell_id.clone()));
        self.intents.send(Intent::StopEvaluation {
            cell_id: cell_id.clone(),
        });
        true
    }

    /// Attach the rendered form to a markdown cell. No-op for code cells.
    pub fn render_markdown(&mut self, cell_id: &CellId) -> bool {
        let Some(cell) = self.cell(cell_id) else {
            return false;
        };
        if !cell.is_markdown() {
            return false;
        }
        let result = CellResult::markdown(cell.get_all_text());
        self.set_result(cell_id, result)
    }

    /// Put a rendered markdown cell back into edit mode and make it active.
    pub fn edit_markdown(&mut self, cell_id: &CellId) -> bool {
        match self.cell(cell_id) {
            Some(cell) if cell.is_markdown() && cell.result().is_some() => {}
            _ => return false,
        }
        self.remove_result(cell_id);
        self.set_active_cell(cell_id)
    }

    // ── Busy / modified bookkeeping ─────────────────────────────────

    /// Executor acknowledged a cell's evaluation.
    pub fn add_busy_cell(&mut self, cell_id: &CellId) -> bool {
        let Some(cell) = self.cell_mut(cell_id) else {
            return false;
        };
        cell.mark_busy();
        if self.busy_cells.insert(cell_id.clone()) {
            self.publish_busy_count();
        }
        true
    }

    pub fn remove_busy_cell(&mut self, cell_id: &CellId) -> bool {
        if let Some(cell) = self.cell_mut(cell_id) {
            cell.mark_not_busy();
        }
        if self.busy_cells.remove(cell_id) {
            self.publish_busy_count();
            true
        } else {
            false
        }
    }

    pub fn get_busy_cell_count(&self) -> usize {
        self.busy_cells.len()
    }

    pub fn get_modified_cell_count(&self) -> usize {
        self.modified_cells.len()
    }

    fn on_modified_changed(&mut self, cell_id: &CellId, modified: bool) {
        let changed = if modified {
            self.modified_cells.insert(cell_id.clone())
        } else {
            self.modified_cells.remove(cell_id)
        };
        if changed {
            self.publish_modified_count();
        }

        if !self.modified_cells.is_empty() {
            self.set_save_state(SaveState::Modified);
        } else if !self.structural_edit {
            self.set_save_state(SaveState::Saved);
        }
    }

    // ── Save state ──────────────────────────────────────────────────

    pub fn get_save_state(&self) -> SaveState {
        self.save_state
    }

    /// Force the save state. Entering `Saved` snapshots every cell's text and
    /// clears all modified flags before `save_state_change` is published.
    pub fn set_save_state(&mut self, state: SaveState) {
        if self.save_state == state {
            return;
        }
        if state == SaveState::Saved {
            self.structural_edit = false;
            for cell in &mut self.cells {
                cell.mark_saved();
            }
            if !self.modified_cells.is_empty() {
                self.modified_cells.clear();
                self.publish_modified_count();
            }
        }
        self.save_state = state;
        debug!("[worksheet] Save state -> {}", state);
        self.changes.publish(WorksheetEvent::SaveStateChange(state));
    }

    fn mark_structural_edit(&mut self) {
        self.structural_edit = true;
        self.set_save_state(SaveState::Modified);
    }

    // ── Kernel ──────────────────────────────────────────────────────

    pub fn get_kernelname(&self) -> &str {
        &self.kernelname
    }

    pub fn set_kernelname(&mut self, kernelname: &str) {
        if self.kernelname != kernelname {
            self.kernelname = kernelname.to_string();
            self.mark_structural_edit();
        }
    }

    pub fn get_kernel_state(&self) -> Option<&str> {
        self.kernel_state.as_deref()
    }

    /// Record the state last reported by the executor.
    pub fn set_kernel_state(&mut self, state: &str) {
        if self.kernel_state.as_deref() != Some(state) {
            self.kernel_state = Some(state.to_string());
            self.changes
                .publish(WorksheetEvent::KernelStateChanged(state.to_string()));
        }
    }

    pub fn restart_kernel(&mut self) {
        self.changes.publish(WorksheetEvent::KernelRestartRequested);
        self.intents.send(Intent::RestartKernel);
    }

    pub fn shutdown_kernel(&mut self) {
        self.changes.publish(WorksheetEvent::KernelShutdownRequested);
        self.intents.send(Intent::ShutdownKernel);
    }

    /// Ask the executor to interrupt everything this worksheet is running.
    pub fn stop_evaluation(&mut self) {
        self.changes
            .publish(WorksheetEvent::WorksheetEvaluationStopRequested);
        self.intents.send(Intent::StopAll);
    }

    // ── Document metadata ───────────────────────────────────────────

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub(crate) fn set_metadata(&mut self, metadata: Map<String, Value>) {
        self.metadata = metadata;
    }

    // ── Path ────────────────────────────────────────────────────────

    pub fn get_pathname(&self) -> Option<&Path> {
        self.pathname.as_deref()
    }

    pub fn set_pathname(&mut self, pathname: PathBuf) {
        let old = self.pathname.replace(pathname);
        self.changes.publish(WorksheetEvent::PathnameChanged { old });
    }

    /// File name without the `.ipynb` extension.
    pub fn get_name(&self) -> Option<String> {
        let file_name = self.pathname.as_ref()?.file_name()?.to_string_lossy();
        Some(
            file_name
                .strip_suffix(".ipynb")
                .unwrap_or(&file_name)
                .to_string(),
        )
    }

    pub fn get_folder(&self) -> Option<&Path> {
        self.pathname.as_deref().and_then(Path::parent)
    }

    pub fn get_last_saved(&self) -> DateTime<Utc> {
        self.last_saved
    }

    // ── Disk ────────────────────────────────────────────────────────

    /// Populate an empty worksheet from its file.
    pub fn load_from_disk(&mut self) -> Result<(), NotebookError> {
        let path = self.pathname.clone().ok_or(NotebookError::NoPathname)?;
        let document = codec::read_notebook(&path)?;
        codec::load(self, document);
        Ok(())
    }

    /// Write the worksheet to its pathname and transition to `Saved`.
    ///
    /// On failure nothing in memory changes.
    pub fn save_to_disk(&mut self) -> Result<(), NotebookError> {
        if self.is_read_only() {
            return Err(NotebookError::ReadOnly);
        }
        let path = self.pathname.clone().ok_or(NotebookError::NoPathname)?;
        self.write_to(&path)?;
        self.set_save_state(SaveState::Saved);
        Ok(())
    }

    /// Write to `pathname`, then adopt it as this worksheet's path.
    pub fn save_as(&mut self, pathname: PathBuf) -> Result<(), NotebookError> {
        if self.is_read_only() {
            return Err(NotebookError::ReadOnly);
        }
        self.write_to(&pathname)?;
        self.set_pathname(pathname);
        self.set_save_state(SaveState::Saved);
        Ok(())
    }

    pub fn remove_from_disk(&self) -> Result<(), NotebookError> {
        let path = self.pathname.as_ref().ok_or(NotebookError::NoPathname)?;
        std::fs::remove_file(path).map_err(|source| NotebookError::Remove {
            path: path.clone(),
            source,
        })?;
        info!("[worksheet] Removed {}", path.display());
        Ok(())
    }

    fn write_to(&mut self, path: &Path) -> Result<(), NotebookError> {
        let document = codec::save(self);
        codec::write_notebook(path, &document)?;
        self.last_saved = Utc::now();
        info!(
            "[worksheet] Saved {} cells to {}",
            self.cells.len(),
            path.display()
        );
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn cell_mut(&mut self, cell_id: &CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id() == cell_id)
    }

    fn publish_busy_count(&self) {
        self.changes
            .publish(WorksheetEvent::BusyCellCountChanged(self.busy_cells.len()));
    }

    fn publish_modified_count(&self) {
        self.changes.publish(WorksheetEvent::ModifiedCellCountChanged(
            self.modified_cells.len(),
        ));
    }
}

fn modification_time(path: Option<&Path>) -> DateTime<Utc> {
    path.and_then(|p| std::fs::metadata(p).ok())
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}
