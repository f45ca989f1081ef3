use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocrestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Query(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl DocrestError {
    /// Response status for this error at the transport boundary.
    pub fn status(&self) -> u16 {
        match self {
            DocrestError::Validation(_)
            | DocrestError::BadRequest(_)
            | DocrestError::Query(_)
            | DocrestError::Json(_) => 400,
            DocrestError::NotFound(_) => 404,
            DocrestError::Conflict(_) => 409,
            DocrestError::Search(_) => 503,
            DocrestError::Config(_)
            | DocrestError::Storage(_)
            | DocrestError::Io(_)
            | DocrestError::Yaml(_)
            | DocrestError::Sqlite(_) => 500,
        }
    }

    /// Message safe to hand back to a caller. Backend details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            DocrestError::Storage(_) | DocrestError::Sqlite(_) | DocrestError::Io(_) => {
                "db access fail".to_string()
            }
            DocrestError::Json(_) => "invalid body".to_string(),
            other => other.to_string(),
        }
    }
}

/// Why a document entry was rejected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reason {
    Unknown,
    ReadOnly,
    CreateOnly,
    DotNotAllowed,
    DotInvalid,
    TypeMismatch,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Unknown => "unknown",
            Reason::ReadOnly => "read-only",
            Reason::CreateOnly => "create-only",
            Reason::DotNotAllowed => "dot-not-allowed",
            Reason::DotInvalid => "dot-invalid",
            Reason::TypeMismatch => "type-mismatch",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate of every violation found in one document, sorted by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<(String, Reason)>,
}

impl ValidationError {
    pub fn reason_for(&self, path: &str) -> Option<Reason> {
        self.violations
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, r)| *r)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid fields: ")?;
        for (i, (path, reason)) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{path} ({reason})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

pub type Result<T> = std::result::Result<T, DocrestError>;
