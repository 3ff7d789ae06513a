//! Recently opened documents.
//!
//! Persistence is best-effort: a store that cannot be read counts as empty
//! and a failed write is logged and skipped.

use crate::change_bus::ChangeBus;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentItem {
    pub pathname: Option<PathBuf>,
    /// Free-form data attached by the front end (window geometry and so on)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RecentItem {
    pub fn new(pathname: impl Into<PathBuf>) -> Self {
        Self {
            pathname: Some(pathname.into()),
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecentEvent {
    AddRecentlyOpened(RecentItem),
    RemoveRecentlyOpened(RecentItem),
}

impl RecentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RecentEvent::AddRecentlyOpened(_) => "add_recently_opened",
            RecentEvent::RemoveRecentlyOpened(_) => "remove_recently_opened",
        }
    }
}

/// Ordered, pathname-unique list of recently opened documents.
#[derive(Debug)]
pub struct RecentDocuments {
    store_path: PathBuf,
    items: Vec<RecentItem>,
    changes: ChangeBus<RecentEvent>,
}

impl RecentDocuments {
    /// Empty registry backed by `store_path`. Nothing is read until [`load`](Self::load).
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            store_path,
            items: Vec::new(),
            changes: ChangeBus::new(),
        }
    }

    /// Registry populated from `store_path`.
    pub fn open(store_path: PathBuf) -> Self {
        let mut recent = Self::new(store_path);
        recent.load();
        recent
    }

    pub fn changes(&self) -> &ChangeBus<RecentEvent> {
        &self.changes
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn items(&self) -> &[RecentItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, pathname: &Path) -> bool {
        self.items
            .iter()
            .any(|item| item.pathname.as_deref() == Some(pathname))
    }

    /// Append `item` and persist. An existing entry for the same path is kept as is.
    pub fn add(&mut self, item: RecentItem) -> bool {
        if !self.insert(item) {
            return false;
        }
        self.save();
        true
    }

    pub fn remove(&mut self, pathname: &Path) -> bool {
        let Some(index) = self
            .items
            .iter()
            .position(|item| item.pathname.as_deref() == Some(pathname))
        else {
            return false;
        };
        let item = self.items.remove(index);
        self.changes.publish(RecentEvent::RemoveRecentlyOpened(item));
        self.save();
        true
    }

    /// Read the store, keeping only entries whose file still exists.
    pub fn load(&mut self) {
        let content = match std::fs::read_to_string(&self.store_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[recent] No store at {}", self.store_path.display());
                return;
            }
            Err(e) => {
                warn!("[recent] Failed to read {}: {}", self.store_path.display(), e);
                return;
            }
        };
        let stored: Vec<RecentItem> = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("[recent] Ignoring malformed {}: {}", self.store_path.display(), e);
                return;
            }
        };

        let total = stored.len();
        for item in stored {
            if item.pathname.as_deref().is_some_and(Path::exists) {
                self.insert(item);
            }
        }
        info!(
            "[recent] Loaded {} of {} recent documents",
            self.items.len(),
            total
        );
    }

    /// Write the list to the store. Failures are logged, never returned.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!("[recent] Failed to save {}: {}", self.store_path.display(), e);
        }
    }

    fn try_save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.store_path, serde_json::to_string_pretty(&self.items)?)?;
        Ok(())
    }

    fn insert(&mut self, item: RecentItem) -> bool {
        let Some(pathname) = item.pathname.as_deref() else {
            return false;
        };
        if self.contains(pathname) {
            return false;
        }
        self.items.push(item.clone());
        self.changes.publish(RecentEvent::AddRecentlyOpened(item));
        true
    }
}
