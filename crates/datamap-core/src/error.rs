//! Error types for datamap operations.

use std::fmt;

/// The primary error type for all datamap operations.
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied input was rejected (bad identifier, unknown property)
    InvalidArgument(String),
    /// A lookup by primary key matched no row
    NotFound(NotFoundError),
    /// Operation is not legal for the current entity or query state
    InvalidState(String),
    /// A query builder was mutated after its SQL was fixed
    BuilderMisuse(String),
    /// The execution backend reported a failure
    Execution(ExecutionError),
    /// Value conversion errors
    Type(TypeError),
    /// Mapping metadata failed validation or could not be loaded
    Metadata(MetadataError),
    /// Serialization/deserialization errors
    Serde(String),
}

#[derive(Debug)]
pub struct NotFoundError {
    pub entity: String,
    pub id: i64,
}

#[derive(Debug)]
pub struct ExecutionError {
    pub message: String,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct MetadataError {
    pub entity: String,
    pub message: String,
}

impl Error {
    /// Get the SQL that caused this error, if available.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Execution(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// Is this a missing-row error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::NotFound(e) => write!(f, "{} with id {} not found", e.entity, e.id),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::BuilderMisuse(msg) => write!(f, "Builder misuse: {}", msg),
            Error::Execution(e) => {
                if let Some(sql) = &e.sql {
                    write!(f, "Execution error: {} (sql: {})", e.message, sql)
                } else {
                    write!(f, "Execution error: {}", e.message)
                }
            }
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Metadata(e) => write!(f, "Metadata error for '{}': {}", e.entity, e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Execution(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with id {} not found", self.entity, self.id)
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Error::Execution(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Error::Metadata(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for datamap operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::NotFound(NotFoundError {
            entity: "customer".to_string(),
            id: 7,
        });
        assert_eq!(err.to_string(), "customer with id 7 not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn execution_error_carries_sql() {
        let err = Error::Execution(ExecutionError {
            message: "syntax error".to_string(),
            sql: Some("SELECT * FROM order".to_string()),
            source: None,
        });
        assert_eq!(err.sql(), Some("SELECT * FROM order"));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn type_error_mentions_column() {
        let err = Error::Type(TypeError {
            expected: "i64",
            actual: "TEXT".to_string(),
            column: Some("id".to_string()),
        });
        let msg = err.to_string();
        assert!(msg.contains("id"));
        assert!(msg.contains("i64"));
    }
}
