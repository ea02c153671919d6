use std::fmt;

use thiserror::Error;

/// Main error type for DriftTune
#[derive(Error, Debug)]
pub enum DtError {
    #[error("Drift error: {0}")]
    Drift(#[from] DriftError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<arrow::error::ArrowError> for DtError {
    fn from(err: arrow::error::ArrowError) -> Self {
        DtError::Arrow(err.to_string())
    }
}

/// Which side of a sample pair an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSide {
    Initial,
    New,
}

impl fmt::Display for SampleSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::New => write!(f, "new"),
        }
    }
}

/// Drift evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriftError {
    #[error("Schema mismatch: initial columns {initial:?}, new columns {new:?}")]
    SchemaMismatch { initial: Vec<String>, new: Vec<String> },

    #[error("Empty sample: column {column} of the {side} sample has no values")]
    EmptySample { column: String, side: SampleSide },

    #[error("Invalid column type: column {column} has non-numeric type {data_type}")]
    InvalidColumnType { column: String, data_type: String },

    #[error("Non-finite value in column {column} of the {side} sample at row {row}")]
    NonFiniteValue {
        column: String,
        side: SampleSide,
        row: usize,
    },

    #[error("Invalid drift configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl DriftError {
    /// Attach a column name to errors raised on unnamed value slices.
    pub fn in_column(self, name: &str) -> Self {
        match self {
            Self::EmptySample { side, .. } => Self::EmptySample {
                column: name.to_string(),
                side,
            },
            Self::NonFiniteValue { side, row, .. } => Self::NonFiniteValue {
                column: name.to_string(),
                side,
                row,
            },
            other => other,
        }
    }
}

/// Hyperparameter search errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Invalid search configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Parameter not found in trial: {name}")]
    MissingParameter { name: String },

    #[error("Parameter {name} is not a {expected}")]
    ParameterType { name: String, expected: String },

    #[error("Objective returned NaN for trial {trial_number}")]
    NanObjective { trial_number: usize },

    #[error("Search {study} finished without a completed trial")]
    NoCompletedTrials { study: String },
}

/// Result type alias for DriftTune operations
pub type DtResult<T> = Result<T, DtError>;
