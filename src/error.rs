/*!
 * Error handling for the medrep analytics library
 *
 * Provides detailed error types with context, suggestions, and recovery guidance.
 * Only an invalid plan is an error inside the query core; everything else here
 * belongs to the loading, configuration and export collaborators.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

/// Library result type
pub type Result<T> = std::result::Result<T, MedrepError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum MedrepError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        column: Option<String>,
        context: ErrorContext,
    },

    /// JSON parsing errors while loading a dataset or a plan specification
    #[error("JSON error: {message}")]
    JsonParse {
        message: String,
        context: ErrorContext,
    },

    /// Data validation errors with detailed information
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        field: Option<String>,
        value: Option<String>,
        context: ErrorContext,
    },

    /// File not found with suggestions
    #[error("File not found: {path}")]
    FileNotFound {
        path: PathBuf,
        suggestion: String,
    },

    /// A query plan that cannot be executed
    #[error("Invalid query plan: {message}")]
    InvalidPlan {
        message: String,
        suggestion: Option<String>,
    },

    /// Schema mismatch with details
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        message: String,
        expected_columns: Option<usize>,
        found_columns: Option<usize>,
        mismatched_column: Option<(usize, String, String)>,
    },

    /// Date parsing errors with format hints
    #[error("Date parsing error: {message}")]
    DateParse {
        message: String,
        value: String,
        expected_format: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        format: ExportFormat,
        suggestion: Option<String>,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub record_id: Option<String>,
}

/// Export format for results and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    JsonLines,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "JSON"),
            ExportFormat::JsonLines => write!(f, "JSON Lines"),
            ExportFormat::Csv => write!(f, "CSV"),
        }
    }
}

impl MedrepError {
    /// Create a file not found error with helpful suggestion
    pub fn file_not_found_with_suggestion(path: PathBuf) -> Self {
        let suggestion = match path.extension().and_then(|e| e.to_str()) {
            Some("json") | Some("jsonl") | Some("csv") => format!(
                "Check if the file exists at '{}'. A sample dataset can be produced with `mrcli generate --out {}`.",
                path.display(),
                path.display()
            ),
            Some("toml") => format!(
                "Check if the configuration file exists at '{}'. Defaults are used when no file is present.",
                path.display()
            ),
            _ => format!(
                "Check if the file exists at '{}'. Supported dataset formats are .json, .jsonl and .csv.",
                path.display()
            ),
        };

        Self::FileNotFound { path, suggestion }
    }

    /// Plan rejected because it would produce no values
    pub fn empty_metrics() -> Self {
        Self::InvalidPlan {
            message: "plan has no metrics".to_string(),
            suggestion: Some(
                "Provide at least one metric, e.g. {\"name\": \"count\", \"aggregation\": \"count\"}".to_string(),
            ),
        }
    }

    /// Create a schema mismatch error with detailed information
    pub fn schema_mismatch_detailed(
        expected_columns: usize,
        found_columns: usize,
        mismatched_column: Option<(usize, String, String)>,
    ) -> Self {
        let message = if let Some((index, expected, found)) = &mismatched_column {
            format!(
                "Column {} mismatch: expected '{}', found '{}'",
                index, expected, found
            )
        } else {
            format!(
                "Expected {} columns, found {}",
                expected_columns, found_columns
            )
        };

        Self::SchemaMismatch {
            message,
            expected_columns: Some(expected_columns),
            found_columns: Some(found_columns),
            mismatched_column,
        }
    }

    /// Create a date parsing error with format information
    pub fn date_parse_with_format(value: &str, expected_format: &str) -> Self {
        Self::DateParse {
            message: format!("Cannot parse '{}' as date", value),
            value: value.to_string(),
            expected_format: expected_format.to_string(),
        }
    }

    /// Create a record validation error
    pub fn invalid_record(record_id: &str, field: &str, value: impl fmt::Display, reason: &str) -> Self {
        Self::DataValidation {
            message: format!("record '{}': {} {}", record_id, field, reason),
            field: Some(field.to_string()),
            value: Some(value.to_string()),
            context: ErrorContext {
                record_id: Some(record_id.to_string()),
                ..Default::default()
            },
        }
    }

    /// Whether this error is a rejected plan rather than an I/O or data problem
    pub fn is_invalid_plan(&self) -> bool {
        matches!(self, Self::InvalidPlan { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::FileNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::InvalidPlan { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::DateParse { expected_format, .. } => {
                format!("{}\n\nExpected format: {}", self, expected_format)
            }
            Self::Configuration { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for MedrepError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for MedrepError {
    fn from(err: csv::Error) -> Self {
        let (line, message) = match err.position() {
            Some(pos) => (Some(pos.line() as usize), err.to_string()),
            None => (None, err.to_string()),
        };

        Self::CsvParse {
            message,
            line,
            column: None,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for MedrepError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            context: ErrorContext {
                line_number: Some(err.line()),
                ..Default::default()
            },
        }
    }
}

impl From<config::ConfigError> for MedrepError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration {
            message: err.to_string(),
            suggestion: Some("Check the config file and MEDREP_* environment variables".to_string()),
        }
    }
}
