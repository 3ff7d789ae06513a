use std::path::PathBuf;

/// Failures reported by load/save boundaries.
///
/// Lookups of missing cells or paths are not errors; those operations are
/// silent no-ops.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed notebook document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Worksheet has no pathname")]
    NoPathname,

    #[error("Worksheet is read-only")]
    ReadOnly,
}
