//! User preferences persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/folio/settings.json
//! - Linux: ~/.config/folio/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\folio\settings.json

use crate::worksheet::DEFAULT_KERNELNAME;
use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Kernel name given to newly created notebooks
    #[serde(default = "default_kernelname")]
    pub default_kernelname: String,

    /// Where the recently opened list lives, if not the default location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_documents_path: Option<PathBuf>,
}

fn default_kernelname() -> String {
    DEFAULT_KERNELNAME.to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_kernelname: default_kernelname(),
            recent_documents_path: None,
        }
    }
}

impl AppSettings {
    /// The recent-documents store to use, honoring the override.
    pub fn recent_store_path(&self) -> PathBuf {
        self.recent_documents_path
            .clone()
            .unwrap_or_else(crate::recent_documents_path)
    }
}

/// Load settings from the default location
pub fn load_settings() -> AppSettings {
    load_settings_from(&crate::settings_path())
}

/// Load settings from `path`, returning defaults if it is missing or unreadable
pub fn load_settings_from(path: &Path) -> AppSettings {
    if !path.exists() {
        return AppSettings::default();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from));
    match parsed {
        Ok(settings) => settings,
        Err(e) => {
            warn!("[settings] Ignoring {}: {}", path.display(), e);
            AppSettings::default()
        }
    }
}

/// Save settings to the default location
pub fn save_settings(settings: &AppSettings) -> Result<()> {
    save_settings_to(&crate::settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &AppSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
