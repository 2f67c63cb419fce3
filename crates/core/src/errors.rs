//! Error types for the nbmerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Notebook parse errors
// ---------------------------------------------------------------------------

/// Reasons a serialized notebook could not be turned into a typed document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The text is not valid JSON (typically because raw conflict markers
    /// were written into it).
    #[error("notebook JSON syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// The JSON is valid but does not have the shape of a notebook.
    #[error("invalid notebook structure: {0}")]
    Shape(String),

    /// The notebook declares a format major version we do not handle.
    #[error("unsupported nbformat version {0}")]
    UnsupportedFormat(u64),
}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_eof() {
            ParseError::Syntax {
                line: err.line(),
                column: err.column(),
                message: err.to_string(),
            }
        } else {
            ParseError::Shape(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Marker errors
// ---------------------------------------------------------------------------

/// Errors from the conflict marker scanner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkerError {
    /// A start marker appeared before the previous region was closed.
    /// `line` is 0-indexed (a line number for text, a cell index for cells).
    #[error("nested conflict marker region at line {line} is not supported")]
    NestedRegion { line: usize },
}

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Errors from applying resolution choices to a conflicted file.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The caller supplied fewer choices than there are conflicts.
    #[error("no resolution choice for conflict {index} ({available} choices supplied)")]
    MissingChoice { index: usize, available: usize },

    /// The marker scanner rejected the input.
    #[error("resolve marker error: {0}")]
    Marker(#[from] MarkerError),

    /// The resolved notebook could not be serialized.
    #[error("failed to serialize resolved notebook: {0}")]
    Serialize(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
