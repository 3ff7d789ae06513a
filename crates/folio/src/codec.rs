//! Conversion between a [`Worksheet`] and the `.ipynb` interchange format.
//!
//! Only the parts of nbformat v4 the model understands are typed; everything
//! else in document and cell metadata is carried through untouched.
//!
//! Known round-trip limits: only the first output of a code cell is restored,
//! and error outputs (which carry no `data` bundle) are not restored at all.

use crate::cell::{Cell, CellId, CellKind};
use crate::error::NotebookError;
use crate::result::CellResult;
use crate::worksheet::{SaveState, Worksheet, DEFAULT_KERNELNAME};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const NBFORMAT: u32 = 4;
pub const NBFORMAT_MINOR: u32 = 5;

/// A notebook document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookDocument {
    pub cells: Vec<CellRecord>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    NBFORMAT
}

fn default_nbformat_minor() -> u32 {
    NBFORMAT_MINOR
}

/// One entry of the document's `cells` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum CellRecord {
    Code {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(default)]
        execution_count: Option<i32>,
        #[serde(serialize_with = "serialize_source", deserialize_with = "deserialize_source")]
        source: String,
        #[serde(default)]
        outputs: Vec<Value>,
    },
    Markdown {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default)]
        metadata: Map<String, Value>,
        #[serde(serialize_with = "serialize_source", deserialize_with = "deserialize_source")]
        source: String,
    },
    /// Raw and any other cell types; skipped on load, never written.
    #[serde(other)]
    Unsupported,
}

/// Split source into lines the way Jupyter writes it, keeping newlines.
fn source_to_lines(source: &str) -> Vec<&str> {
    source.split_inclusive('\n').collect()
}

fn serialize_source<S: Serializer>(source: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(source_to_lines(source))
}

/// Accept both a single string and a list of line strings.
fn deserialize_source<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct SourceVisitor;

    impl<'de> de::Visitor<'de> for SourceVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<String, A::Error> {
            let mut source = String::new();
            while let Some(line) = seq.next_element::<String>()? {
                source.push_str(&line);
            }
            Ok(source)
        }
    }

    deserializer.deserialize_any(SourceVisitor)
}

// ── Load ────────────────────────────────────────────────────────────

/// Populate an empty worksheet from `document`, ending in the `Saved` state.
///
/// Returns false without touching the worksheet if it already has cells.
pub fn load(worksheet: &mut Worksheet, document: NotebookDocument) -> bool {
    if worksheet.get_cell_count() > 0 {
        warn!(
            "[codec] Refusing to load into a worksheet with {} cells",
            worksheet.get_cell_count()
        );
        return false;
    }

    let NotebookDocument {
        cells,
        mut metadata,
        ..
    } = document;

    let kernelname = metadata
        .remove("kernelspec")
        .and_then(|ks| ks.get("name").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| DEFAULT_KERNELNAME.to_string());
    worksheet.set_kernelname(&kernelname);
    worksheet.set_metadata(metadata);

    let mut seen_ids = HashSet::new();
    let mut first_code_cell = true;
    for record in cells {
        match record {
            CellRecord::Markdown {
                id,
                mut metadata,
                source,
            } => {
                let in_edit_mode = metadata
                    .remove("in_edit_mode")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let cell_id = worksheet.insert_cell(
                    CellKind::Markdown,
                    None,
                    &source,
                    unique_cell_id(id, &mut seen_ids),
                );
                worksheet.set_cell_metadata(&cell_id, metadata);
                if !source.is_empty() && !in_edit_mode {
                    worksheet.render_markdown(&cell_id);
                }
            }
            CellRecord::Code {
                id,
                metadata,
                source,
                outputs,
                ..
            } => {
                let cell_id = worksheet.insert_cell(
                    CellKind::Code,
                    None,
                    &source,
                    unique_cell_id(id, &mut seen_ids),
                );
                worksheet.set_cell_metadata(&cell_id, metadata);
                if first_code_cell {
                    first_code_cell = false;
                    worksheet.set_active_cell(&cell_id);
                }
                if let Some(result) = outputs.first().and_then(result_from_output) {
                    worksheet.set_result(&cell_id, result);
                }
            }
            CellRecord::Unsupported => {
                debug!("[codec] Skipping unsupported cell type");
            }
        }
    }

    worksheet.set_save_state(SaveState::Saved);
    info!(
        "[codec] Loaded {} cells (kernel {})",
        worksheet.get_cell_count(),
        kernelname
    );
    true
}

/// Longest cell id nbformat 4.5 accepts.
const MAX_CELL_ID_LEN: usize = 64;

/// nbformat 4.5 ids: 1-64 characters from `[a-zA-Z0-9-_]`.
fn is_valid_cell_id(id: &str) -> bool {
    (1..=MAX_CELL_ID_LEN).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Keep the document's id when valid and unused, otherwise mint a fresh one.
fn unique_cell_id(id: Option<String>, seen: &mut HashSet<String>) -> CellId {
    let id = match id {
        Some(id) if is_valid_cell_id(&id) && !seen.contains(&id) => CellId::from(id),
        Some(id) => {
            debug!("[codec] Replacing unusable cell id {:?}", id);
            CellId::new()
        }
        None => CellId::new(),
    };
    seen.insert(id.as_str().to_string());
    id
}

fn result_from_output(output: &Value) -> Option<CellResult> {
    let data = output.get("data")?.as_object()?;
    let execution_count = output
        .get("execution_count")
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok());
    Some(CellResult::from_data(data.clone()).with_execution_count(execution_count))
}

// ── Save ────────────────────────────────────────────────────────────

/// Build the interchange document for `worksheet`, cells in document order.
pub fn save(worksheet: &Worksheet) -> NotebookDocument {
    let cells = worksheet.cells().iter().map(cell_record).collect();

    let kernelname = worksheet.get_kernelname();
    let mut metadata = worksheet.metadata().clone();
    metadata.insert(
        "kernelspec".to_string(),
        json!({
            "name": kernelname,
            "display_name": kernelname,
            "language": kernelname,
        }),
    );

    NotebookDocument {
        cells,
        metadata,
        nbformat: NBFORMAT,
        nbformat_minor: NBFORMAT_MINOR,
    }
}

fn cell_record(cell: &Cell) -> CellRecord {
    let id = Some(cell.id().to_string());
    let source = cell.get_all_text().to_string();
    match cell.kind() {
        CellKind::Code => CellRecord::Code {
            id,
            metadata: cell.metadata().clone(),
            execution_count: cell.result().and_then(CellResult::execution_count),
            source,
            outputs: cell.result().map(output_record).into_iter().collect(),
        },
        CellKind::Markdown => {
            let mut metadata = cell.metadata().clone();
            metadata.insert(
                "in_edit_mode".to_string(),
                Value::Bool(cell.result().is_none()),
            );
            CellRecord::Markdown {
                id,
                metadata,
                source,
            }
        }
    }
}

fn output_record(result: &CellResult) -> Value {
    json!({
        "output_type": "execute_result",
        "data": result.data(),
        "metadata": {},
        "execution_count": result.execution_count(),
    })
}

// ── Files ───────────────────────────────────────────────────────────

pub fn parse_document(content: &str) -> Result<NotebookDocument, NotebookError> {
    Ok(serde_json::from_str(content)?)
}

pub fn to_json_string(document: &NotebookDocument) -> Result<String, NotebookError> {
    let json = serde_json::to_string_pretty(document)?;
    Ok(format!("{json}\n"))
}

pub fn read_notebook(path: &Path) -> Result<NotebookDocument, NotebookError> {
    let content = std::fs::read_to_string(path).map_err(|source| NotebookError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&content)
}

/// Write `document` to `path` through a sibling temp file and a rename, so
/// a failed write never leaves a truncated notebook behind.
pub fn write_notebook(path: &Path, document: &NotebookDocument) -> Result<(), NotebookError> {
    let content = to_json_string(document)?;
    let tmp_path = temp_path_for(path);
    let write_err = |source| NotebookError::Write {
        path: path.to_path_buf(),
        source,
    };

    let written =
        std::fs::write(&tmp_path, content).and_then(|()| std::fs::rename(&tmp_path, path));
    if let Err(e) = written {
        discard_temp(&tmp_path);
        return Err(write_err(e));
    }
    Ok(())
}

/// Remove a leftover temp file after a failed write or rename.
fn discard_temp(tmp_path: &Path) {
    match std::fs::remove_file(tmp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "[codec] Failed to remove temp file {}: {}",
            tmp_path.display(),
            e
        ),
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "notebook".into());
    name.push(".folio-tmp");
    path.with_file_name(name)
}
