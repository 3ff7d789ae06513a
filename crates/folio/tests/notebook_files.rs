//! Integration tests for reading and writing notebook files.
//!
//! Saved files are parsed back with the `nbformat` crate so the output stays
//! readable by other Jupyter tooling.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use folio::{
    codec, CellKind, CellResult, Intent, NotebookError, SaveState, Worksheet, WorksheetEvent,
};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

/// Parse a saved file with nbformat, upgrading legacy documents.
fn parse_with_nbformat(path: &Path) -> nbformat::v4::Notebook {
    let content = std::fs::read_to_string(path).unwrap();
    match nbformat::parse_notebook(&content).unwrap() {
        nbformat::Notebook::V4(nb) => nb,
        nbformat::Notebook::Legacy(legacy) => nbformat::upgrade_legacy_notebook(legacy).unwrap(),
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn record(ws: &Worksheet) -> Rc<RefCell<Vec<&'static str>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    ws.changes()
        .subscribe(move |e: &WorksheetEvent| sink.borrow_mut().push(e.name()));
    events
}

#[test]
fn test_create_and_save_single_cell() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("scratch.ipynb");
    let mut ws = Worksheet::new(Some(path.clone()));

    ws.create_cell(None, "1+1");
    assert_eq!(ws.get_cell_count(), 1);
    assert_eq!(ws.get_save_state(), SaveState::Modified);

    ws.save_to_disk().unwrap();
    assert_eq!(ws.get_save_state(), SaveState::Saved);

    let json = read_json(&path);
    let cells = json["cells"].as_array().unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0]["cell_type"], "code");
    assert_eq!(cells[0]["source"], json!(["1+1"]));
    assert_eq!(cells[0]["outputs"], json!([]));

    let nb = parse_with_nbformat(&path);
    assert_eq!(nb.cells.len(), 1);
    match &nb.cells[0] {
        nbformat::v4::Cell::Code {
            source, outputs, ..
        } => {
            assert_eq!(source.join(""), "1+1");
            assert!(outputs.is_empty());
        }
        other => panic!("expected a code cell, got {other:?}"),
    }
}

#[test]
fn test_saved_file_is_valid_nbformat() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("mixed.ipynb");
    let mut ws = Worksheet::new(Some(path.clone()));
    ws.set_kernelname("python3");

    let heading = ws.create_markdown_cell(None, "# Results\n\nSome *text*.");
    ws.render_markdown(&heading);
    ws.create_markdown_cell(None, "still editing");
    let code = ws.create_cell(None, "import math\nmath.pi");
    ws.set_result(
        &code,
        CellResult::plain("3.141592653589793").with_execution_count(Some(1)),
    );

    ws.save_to_disk().unwrap();

    let nb = parse_with_nbformat(&path);
    assert_eq!(nb.nbformat, 4);
    assert_eq!(nb.cells.len(), 3);
    let kernelspec = nb.metadata.kernelspec.as_ref().unwrap();
    assert_eq!(kernelspec.name, "python3");
    assert_eq!(kernelspec.display_name, "python3");
    match &nb.cells[2] {
        nbformat::v4::Cell::Code { outputs, .. } => assert_eq!(outputs.len(), 1),
        other => panic!("expected a code cell, got {other:?}"),
    }
}

#[test]
fn test_round_trip_through_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("roundtrip.ipynb");
    let mut ws = Worksheet::new(Some(path.clone()));

    ws.create_markdown_cell(None, "# Title");
    let first = ws.create_cell(None, "x = [1, 2, 3]\n");
    let second = ws.create_cell(None, "sum(x)");
    ws.create_cell(None, "");
    let mut html = Map::new();
    html.insert("text/plain".into(), json!("6"));
    html.insert("text/html".into(), json!(["<b>", "6", "</b>"]));
    ws.set_result(&second, CellResult::from_data(html).with_execution_count(Some(2)));
    ws.save_to_disk().unwrap();

    let mut reopened = Worksheet::new(Some(path.clone()));
    reopened.load_from_disk().unwrap();

    let pairs = |ws: &Worksheet| -> Vec<(CellKind, String)> {
        ws.cells()
            .iter()
            .map(|c| (c.kind(), c.get_all_text().to_string()))
            .collect()
    };
    assert_eq!(pairs(&reopened), pairs(&ws));
    assert_eq!(
        reopened.cell(&second).unwrap().result(),
        ws.cell(&second).unwrap().result()
    );
    assert!(reopened.cell(&first).unwrap().result().is_none());
    assert_eq!(reopened.active_cell_id(), Some(&first));
    assert_eq!(reopened.get_save_state(), SaveState::Saved);
    assert_eq!(reopened.get_modified_cell_count(), 0);
}

#[test]
fn test_load_jupyter_written_notebook() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("from_jupyter.ipynb");
    let content = json!({
        "cells": [
            {
                "cell_type": "markdown",
                "id": "intro",
                "metadata": {},
                "source": ["# Analysis\n", "\n", "Loading data."]
            },
            {
                "cell_type": "code",
                "execution_count": 7,
                "id": "load",
                "metadata": {"tags": ["parameters"]},
                "outputs": [
                    {"name": "stdout", "output_type": "stream", "text": ["loaded\n"]},
                    {"data": {"text/plain": ["42"]}, "execution_count": 7,
                     "metadata": {}, "output_type": "execute_result"}
                ],
                "source": ["print('loaded')\n", "42"]
            },
            {
                "cell_type": "raw",
                "id": "raw",
                "metadata": {},
                "source": "ignored"
            }
        ],
        "metadata": {
            "kernelspec": {"display_name": "Python 3 (ipykernel)", "language": "python", "name": "python3"},
            "language_info": {"name": "python", "version": "3.12.1"}
        },
        "nbformat": 4,
        "nbformat_minor": 5
    });
    std::fs::write(&path, serde_json::to_string_pretty(&content).unwrap()).unwrap();

    let mut ws = Worksheet::new(Some(path.clone()));
    ws.load_from_disk().unwrap();

    assert_eq!(ws.get_cell_count(), 2);
    assert_eq!(ws.get_kernelname(), "python3");
    let markdown = ws.cell_at(0).unwrap();
    assert_eq!(markdown.get_all_text(), "# Analysis\n\nLoading data.");
    assert!(!markdown.is_in_edit_mode());
    // The first output is a stream with no data bundle, so nothing is restored
    let code = ws.cell_at(1).unwrap();
    assert_eq!(code.id().as_str(), "load");
    assert!(code.result().is_none());
    assert_eq!(code.metadata()["tags"], json!(["parameters"]));

    ws.save_to_disk().unwrap();
    let saved = read_json(&path);
    assert_eq!(saved["metadata"]["language_info"]["version"], "3.12.1");
    assert_eq!(saved["cells"][1]["metadata"]["tags"], json!(["parameters"]));
    assert_eq!(saved["cells"].as_array().unwrap().len(), 2);
}

#[test]
fn test_nonconforming_cell_ids_are_rewritten() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("odd_ids.ipynb");
    let long_id = "x".repeat(80);
    let content = json!({
        "cells": [
            {"cell_type": "code", "id": "bad id!", "metadata": {}, "outputs": [], "source": "1"},
            {"cell_type": "markdown", "id": long_id, "metadata": {}, "source": "two"}
        ],
        "metadata": {},
        "nbformat": 4,
        "nbformat_minor": 5
    });
    std::fs::write(&source, content.to_string()).unwrap();

    let mut ws = Worksheet::new(Some(source));
    ws.load_from_disk().unwrap();
    let copy = temp_dir.path().join("copy.ipynb");
    ws.save_as(copy.clone()).unwrap();

    let nb = parse_with_nbformat(&copy);
    assert_eq!(nb.cells.len(), 2);
    let saved = read_json(&copy);
    assert_ne!(saved["cells"][0]["id"], "bad id!");
    assert_ne!(saved["cells"][1]["id"], long_id.as_str());
}

#[test]
fn test_missing_cells_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.ipynb");
    std::fs::write(&path, r#"{"metadata": {}, "nbformat": 4, "nbformat_minor": 5}"#).unwrap();

    let mut ws = Worksheet::new(Some(path));
    let err = ws.load_from_disk().unwrap_err();

    assert!(matches!(err, NotebookError::Malformed(_)));
    assert_eq!(ws.get_cell_count(), 0);
    assert_eq!(ws.get_save_state(), SaveState::Saved);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let temp_dir = TempDir::new().unwrap();
    let mut ws = Worksheet::new(Some(temp_dir.path().join("absent.ipynb")));
    let err = ws.load_from_disk().unwrap_err();
    assert!(matches!(err, NotebookError::Read { .. }));
}

#[test]
fn test_failed_save_leaves_state_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("no-such-dir").join("nb.ipynb");
    let mut ws = Worksheet::new(Some(path.clone()));
    let id = ws.create_cell(None, "x");
    let last_saved = ws.get_last_saved();
    let events = record(&ws);

    let err = ws.save_to_disk().unwrap_err();

    assert!(matches!(err, NotebookError::Write { .. }));
    assert_eq!(ws.get_save_state(), SaveState::Modified);
    assert_eq!(ws.get_last_saved(), last_saved);
    assert!(events.borrow().is_empty());
    assert!(!path.exists());
    assert_eq!(ws.cell(&id).unwrap().get_all_text(), "x");
}

#[test]
fn test_save_as_adopts_new_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("copy.ipynb");
    let mut ws = Worksheet::new(None);
    ws.create_cell(None, "a = 1");
    let events = record(&ws);

    assert!(matches!(ws.save_to_disk(), Err(NotebookError::NoPathname)));
    ws.save_as(path.clone()).unwrap();

    assert_eq!(ws.get_pathname(), Some(path.as_path()));
    assert_eq!(ws.get_name().as_deref(), Some("copy"));
    assert_eq!(ws.get_save_state(), SaveState::Saved);
    assert_eq!(*events.borrow(), vec!["pathname_changed", "save_state_change"]);
    assert!(path.exists());
    assert!(ws.get_last_saved() > chrono::DateTime::<chrono::Utc>::from(std::time::UNIX_EPOCH));
}

#[test]
fn test_documentation_worksheet_is_read_only() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tutorial.ipynb");
    std::fs::write(&path, r#"{"cells": [{"cell_type": "code", "source": "help()"}]}"#).unwrap();

    let mut ws = Worksheet::documentation(path.clone());
    ws.load_from_disk().unwrap();
    ws.create_cell(None, "scratch");

    assert!(matches!(ws.save_to_disk(), Err(NotebookError::ReadOnly)));
    let on_disk = codec::read_notebook(&path).unwrap();
    assert_eq!(on_disk.cells.len(), 1);
}

#[test]
fn test_remove_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gone.ipynb");
    let mut ws = Worksheet::new(Some(path.clone()));
    ws.create_cell(None, "");
    ws.save_to_disk().unwrap();

    ws.remove_from_disk().unwrap();
    assert!(!path.exists());
    assert!(matches!(
        ws.remove_from_disk(),
        Err(NotebookError::Remove { .. })
    ));
}

#[tokio::test]
async fn test_executor_round_trip() {
    let mut ws = Worksheet::new(None);
    let mut intents = ws.connect_executor();
    let cell_id = ws.create_cell(None, "1+1");

    assert!(ws.request_evaluation(&cell_id));
    let Some(Intent::Evaluate {
        cell_id: requested,
        source,
    }) = intents.recv().await
    else {
        panic!("expected an evaluation intent");
    };
    assert_eq!(requested, cell_id);
    assert_eq!(source, "1+1");

    // Executor side: acknowledge, deliver, finish
    ws.add_busy_cell(&requested);
    assert_eq!(ws.get_busy_cell_count(), 1);
    ws.set_result(&requested, CellResult::plain("2").with_execution_count(Some(1)));
    ws.set_kernel_state("idle");
    ws.remove_busy_cell(&requested);

    assert_eq!(ws.get_busy_cell_count(), 0);
    assert_eq!(ws.get_kernel_state(), Some("idle"));
    assert_eq!(
        ws.cell(&cell_id).unwrap().result().unwrap().data()["text/plain"],
        "2"
    );

    ws.restart_kernel();
    assert_eq!(intents.recv().await, Some(Intent::RestartKernel));
}
