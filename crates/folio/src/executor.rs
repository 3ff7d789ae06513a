//! Intent queue between the document model and an external kernel executor.
//!
//! The model never runs code. It records what it wants done as an [`Intent`]
//! and pushes it onto an unbounded channel; the executor drains the channel
//! (usually from an async task) and reports back by calling `set_result`,
//! `add_busy_cell`, `remove_busy_cell` and `set_kernel_state` on the
//! worksheet.

use crate::cell::CellId;
use log::debug;
use tokio::sync::mpsc;

/// Work requested from the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Run a code cell. Markdown is rendered in place and never queued.
    Evaluate {
        cell_id: CellId,
        source: String,
    },
    StopEvaluation {
        cell_id: CellId,
    },
    /// Interrupt whatever the worksheet is running
    StopAll,
    RestartKernel,
    ShutdownKernel,
}

pub type IntentReceiver = mpsc::UnboundedReceiver<Intent>;

/// Sending half held by a worksheet. Sending never blocks.
#[derive(Debug, Default)]
pub struct IntentQueue {
    tx: Option<mpsc::UnboundedSender<Intent>>,
}

impl IntentQueue {
    /// Replace any previous executor with a fresh channel.
    pub fn connect(&mut self) -> IntentReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    pub fn is_connected(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn send(&mut self, intent: Intent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(intent) {
            debug!("[executor] Receiver dropped, discarding {:?}", e.0);
            self.tx = None;
        }
    }
}
