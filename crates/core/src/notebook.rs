//! Typed notebook document model.
//!
//! Blobs read from git are untrusted: [`Notebook::parse`] first checks the
//! JSON syntax, then the overall shape, and only then deserializes into the
//! typed model. Serialization goes through [`Notebook::to_json_string`], which
//! writes sorted keys with a one-space indent and a trailing newline, the same
//! layout Jupyter itself writes.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::ParseError;

/// Top-level metadata keys that describe the execution environment.
pub const KERNEL_METADATA_KEYS: [&str; 2] = ["kernelspec", "language_info"];

/// The only nbformat major version handled.
pub const SUPPORTED_NBFORMAT: u64 = 4;

// ---------------------------------------------------------------------------
// Notebook
// ---------------------------------------------------------------------------

/// A parsed notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default = "default_nbformat")]
    pub nbformat: u64,

    #[serde(default)]
    pub nbformat_minor: u64,

    /// Unknown top-level keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_nbformat() -> u64 {
    SUPPORTED_NBFORMAT
}

impl Notebook {
    /// Create an empty nbformat 4 notebook holding `cells`.
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            cells,
            metadata: Map::new(),
            nbformat: SUPPORTED_NBFORMAT,
            nbformat_minor: 5,
            extra: Map::new(),
        }
    }

    /// Parse and validate a serialized notebook.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text)?;

        let object = value
            .as_object()
            .ok_or_else(|| ParseError::Shape("top-level value is not an object".into()))?;

        if let Some(version) = object.get("nbformat") {
            match version.as_u64() {
                Some(SUPPORTED_NBFORMAT) => {}
                Some(other) => return Err(ParseError::UnsupportedFormat(other)),
                None => return Err(ParseError::Shape("'nbformat' is not an integer".into())),
            }
        }

        match object.get("cells") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(ParseError::Shape("'cells' is not an array".into())),
            None => return Err(ParseError::Shape("missing 'cells' array".into())),
        }

        serde_json::from_value(value).map_err(|e| ParseError::Shape(e.to_string()))
    }

    /// Serialize with sorted keys, a one-space indent and a trailing newline.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let value = sort_keys(serde_json::to_value(self)?);
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        buf.push(b'\n');
        // serde_json only ever emits UTF-8.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// The kernel-describing subset of the notebook metadata.
    pub fn kernel_metadata(&self) -> Map<String, Value> {
        self.metadata
            .iter()
            .filter(|(k, _)| KERNEL_METADATA_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Cell variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Markdown => write!(f, "markdown"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Text stored either as one string or as a list of line fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineText {
    Text(String),
    Lines(Vec<String>),
}

impl Default for MultilineText {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MultilineText {
    /// The normalised single-string form.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }

    /// Replace the content, keeping the storage form.
    pub fn with_text(&self, text: &str) -> Self {
        match self {
            Self::Text(_) => Self::Text(text.to_string()),
            Self::Lines(_) => Self::Lines(split_lines(text)),
        }
    }
}

/// Split text into line fragments that keep their `\n` terminators.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

/// One notebook cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Cell {
    pub cell_type: CellType,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default)]
    pub source: MultilineText,

    /// Execution counter; only meaningful for code cells.
    #[serde(default)]
    pub execution_count: Option<i64>,

    /// Outputs; only meaningful for code cells.
    #[serde(default)]
    pub outputs: Option<Vec<Output>>,

    /// Unknown keys (e.g. `attachments`), preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("cell_type", &self.cell_type)?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        map.serialize_entry("metadata", &self.metadata)?;
        map.serialize_entry("source", &self.source)?;
        // nbformat requires both keys on code cells and forbids them elsewhere.
        if self.cell_type == CellType::Code {
            map.serialize_entry("execution_count", &self.execution_count)?;
            map.serialize_entry("outputs", self.outputs.as_deref().unwrap_or(&[]))?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Cell {
    /// A cell of the given type with `source` stored as one string.
    pub fn new(cell_type: CellType, source: &str) -> Self {
        let is_code = cell_type == CellType::Code;
        Self {
            cell_type,
            id: None,
            metadata: Map::new(),
            source: MultilineText::Text(source.to_string()),
            execution_count: None,
            outputs: is_code.then(Vec::new),
            extra: Map::new(),
        }
    }

    pub fn code(source: &str) -> Self {
        Self::new(CellType::Code, source)
    }

    pub fn markdown(source: &str) -> Self {
        Self::new(CellType::Markdown, source)
    }

    /// The cell source normalised to one string.
    pub fn source_text(&self) -> String {
        self.source.text()
    }

    /// Whether the cell carries an execution counter at all.
    pub fn has_execution_count(&self) -> bool {
        self.cell_type == CellType::Code
    }

    /// Outputs as a slice (empty when absent).
    pub fn outputs(&self) -> &[Output] {
        self.outputs.as_deref().unwrap_or(&[])
    }

    /// Same type and same normalised source.
    pub fn same_content(&self, other: &Cell) -> bool {
        self.cell_type == other.cell_type && self.source_text() == other.source_text()
    }

    /// Canonical string of the whole output list.
    pub fn outputs_canonical(&self) -> String {
        canonical_json(&self.outputs())
    }

    /// Canonical string of the cell metadata.
    pub fn metadata_canonical(&self) -> String {
        canonical_json(&self.metadata)
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A code cell output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum Output {
    Stream {
        name: String,
        text: MultilineText,
    },
    ExecuteResult {
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        execution_count: Option<i64>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    DisplayData {
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl Output {
    /// A stdout stream output.
    pub fn stdout(text: &str) -> Self {
        Self::Stream {
            name: "stdout".into(),
            text: MultilineText::Text(text.to_string()),
        }
    }

    /// Every textual payload of the output: stream text, `text/*` mime
    /// bundles and the traceback.
    pub fn text_payloads(&self) -> Vec<String> {
        match self {
            Self::Stream { text, .. } => vec![text.text()],
            Self::ExecuteResult { data, .. } | Self::DisplayData { data, .. } => data
                .iter()
                .filter(|(mime, _)| mime.starts_with("text/"))
                .filter_map(|(_, value)| mime_text(value))
                .collect(),
            Self::Error { traceback, .. } => vec![traceback.join("\n")],
        }
    }

    /// Canonical string form used for equality across versions.
    pub fn canonical(&self) -> String {
        canonical_json(self)
    }
}

fn mime_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(parts.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Serialize to a compact JSON string with object keys sorted recursively.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(v) => sort_keys(v).to_string(),
        Err(_) => String::new(),
    }
}

/// Rebuild every object in `value` with its keys in sorted order.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
