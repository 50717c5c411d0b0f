//! Error types for excelint core.

use thiserror::Error;

/// Operational failures. Detection findings are data, not errors; see
/// [`excelint_engine::model::Finding`].
#[derive(Error, Debug)]
pub enum ExcelintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("Invalid cell reference: {0}")]
    InvalidReference(String),

    #[error("Detector '{name}' failed: {message}")]
    Detector { name: String, message: String },

    #[error("Fix for '{error_id}' failed: {message}")]
    Fix { error_id: String, message: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("CSV file is empty")]
    EmptyCsv,

    #[error("Batch cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ExcelintError>;
