//! Evaluation results attached to cells.
//!
//! A `CellResult` keeps the exported MIME bundle exactly as it was received
//! (or read from disk) so saving writes it back untouched. The renderable
//! form is derived from that bundle on demand.

use base64::Engine;
use serde_json::{Map, Value};

/// MIME types in the order a view should prefer them.
pub const MIME_PRIORITY: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/svg+xml",
    "text/html",
    "text/latex",
    "text/markdown",
    "application/json",
    "text/plain",
];

/// Immutable snapshot of one evaluation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct CellResult {
    data: Map<String, Value>,
    execution_count: Option<i32>,
}

/// Parsed, view-ready form of a [`CellResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Image { mime: String, bytes: Vec<u8> },
    Svg(String),
    Html(String),
    Latex(String),
    Markdown(String),
    Json(Value),
    Text(String),
    Empty,
}

impl CellResult {
    /// Wrap a MIME bundle as delivered by the executor or found in `outputs[0].data`.
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data,
            execution_count: None,
        }
    }

    pub fn with_execution_count(mut self, count: Option<i32>) -> Self {
        self.execution_count = count;
        self
    }

    /// Result for a rendered markdown cell.
    pub fn markdown(text: &str) -> Self {
        let mut data = Map::new();
        data.insert("text/markdown".to_string(), Value::String(text.to_string()));
        Self::from_data(data)
    }

    /// Plain-text result, mostly useful for executors and tests.
    pub fn plain(text: &str) -> Self {
        let mut data = Map::new();
        data.insert("text/plain".to_string(), Value::String(text.to_string()));
        Self::from_data(data)
    }

    /// The exported payload, written as `outputs[0].data` on save.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn execution_count(&self) -> Option<i32> {
        self.execution_count
    }

    pub fn mime_types(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Build the renderable form from the richest usable MIME type.
    pub fn rendered(&self) -> Rendered {
        for mime in MIME_PRIORITY {
            let Some(value) = self.data.get(*mime) else {
                continue;
            };
            if let Some(rendered) = render_one(mime, value) {
                return rendered;
            }
        }
        Rendered::Empty
    }
}

fn render_one(mime: &str, value: &Value) -> Option<Rendered> {
    match mime {
        "image/png" | "image/jpeg" => {
            let encoded: String = join_multiline(value)?
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .ok()?;
            Some(Rendered::Image {
                mime: mime.to_string(),
                bytes,
            })
        }
        "image/svg+xml" => join_multiline(value).map(Rendered::Svg),
        "text/html" => join_multiline(value).map(Rendered::Html),
        "text/latex" => join_multiline(value).map(Rendered::Latex),
        "text/markdown" => join_multiline(value).map(Rendered::Markdown),
        "application/json" => Some(Rendered::Json(value.clone())),
        "text/plain" => join_multiline(value).map(Rendered::Text),
        _ => None,
    }
}

/// Notebook files store long strings either whole or as an array of lines.
pub(crate) fn join_multiline(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => parts
            .iter()
            .map(|p| p.as_str())
            .collect::<Option<Vec<_>>>()
            .map(|lines| lines.concat()),
        _ => None,
    }
}
