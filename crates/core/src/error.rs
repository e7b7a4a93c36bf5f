//! Error types for the Eddy core data model.

use alloc::string::String;
use core::fmt;

/// Result type alias for core operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised while building or consulting the data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid schema definition.
    InvalidSchema {
        message: String,
    },
    /// Column not found.
    ColumnNotFound {
        table: String,
        column: String,
    },
    /// Relationship not found.
    RelationshipNotFound {
        table: String,
        relationship: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSchema { message } => {
                write!(f, "Invalid schema: {}", message)
            }
            Error::ColumnNotFound { table, column } => {
                write!(f, "Column {} not found in table {}", column, table)
            }
            Error::RelationshipNotFound { table, relationship } => {
                write!(f, "Relationship {} not found in table {}", relationship, table)
            }
        }
    }
}

impl core::error::Error for Error {}

impl Error {
    /// Creates an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates a column not found error.
    pub fn column_not_found(table: impl Into<String>, column: impl Into<String>) -> Self {
        Error::ColumnNotFound {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a relationship not found error.
    pub fn relationship_not_found(
        table: impl Into<String>,
        relationship: impl Into<String>,
    ) -> Self {
        Error::RelationshipNotFound {
            table: table.into(),
            relationship: relationship.into(),
        }
    }
}
