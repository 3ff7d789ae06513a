//! folio - Document model for Jupyter-style notebooks.
//!
//! A [`Worksheet`] is an ordered list of code and markdown [`Cell`]s with a
//! save-state machine, an active cell, and busy/modified bookkeeping. Every
//! mutation is announced on a [`ChangeBus`] so views never poll. Evaluation is
//! delegated: the worksheet queues [`Intent`]s for an external executor, which
//! reports results back through ordinary worksheet calls.
//!
//! [`codec`] reads and writes the `.ipynb` interchange format and
//! [`recent::RecentDocuments`] keeps the recently opened list.

use std::path::PathBuf;

pub mod cell;
pub mod change_bus;
pub mod codec;
pub mod error;
pub mod executor;
pub mod recent;
pub mod result;
pub mod settings;
pub mod worksheet;

pub use cell::{Cell, CellEvent, CellId, CellKind, CellState};
pub use change_bus::{ChangeBus, SubscriptionId};
pub use codec::NotebookDocument;
pub use error::NotebookError;
pub use executor::{Intent, IntentReceiver};
pub use recent::{RecentDocuments, RecentEvent, RecentItem};
pub use result::{CellResult, Rendered};
pub use worksheet::{SaveState, Worksheet, WorksheetEvent, WorksheetKind, DEFAULT_KERNELNAME};

/// Get the per-user configuration directory for folio.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
}

/// Get the path to the JSON settings file.
pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

/// Get the default path of the recently opened documents store.
pub fn recent_documents_path() -> PathBuf {
    config_dir().join("recently_opened.json")
}
