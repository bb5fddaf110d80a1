use std::fmt;

use thiserror::Error;

/// Field rewritten by a label normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelField {
    Term,
    School,
    Lang,
}

impl fmt::Display for LabelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LabelField::Term => "term",
            LabelField::School => "school",
            LabelField::Lang => "lang",
        })
    }
}

/// Why a filter stage dropped a record. Expected outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Duplicate { title: String, instructor: String },
    YearBelowThreshold { year: i32, title: String, instructor: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Duplicate { title, instructor } => {
                write!(f, "Duplicate course, title: {}, instructor: {}", title, instructor)
            }
            Rejection::YearBelowThreshold { year, title, instructor } => write!(
                f,
                "Year below lower bound course, year: {}, title: {}, instructor: {}",
                year, title, instructor
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("document encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid collection or database name '{0}'")]
    InvalidName(String),
    #[error("unsupported store uri '{0}' (expected sqlite://<dir>, sqlite://:memory: or memory://)")]
    UnsupportedUri(String),
    #[error("store connection is closed")]
    Closed,
    #[error("document {id} not found in collection {collection}")]
    NotFound { collection: String, id: i64 },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no canonical {field} label for '{raw}'")]
    UnmappedLabel { field: LabelField, raw: String },
    #[error("year '{raw}' is not a number (course '{title}')")]
    InvalidYear { raw: String, title: String },
    #[error("malformed course record at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },
    #[error("course '{title}' has no occurrences")]
    NoOccurrence { title: String },
    #[error("reading input after line {line}: {source}")]
    Input {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Errors that spoil a single record but leave the run healthy.
    pub fn is_record_local(&self) -> bool {
        !matches!(self, PipelineError::Store(_) | PipelineError::Input { .. })
    }
}
