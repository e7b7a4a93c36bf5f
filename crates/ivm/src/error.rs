//! Error types for the operator graph.
//!
//! Contract violations indicate a malformed graph or a broken reentrancy
//! protocol; they are not retried. Everything surfaces to the immediate
//! caller of `fetch`/`push`.

/// Result type alias for graph operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised by operators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An operator pushed or forwarded before `set_output` was called.
    #[error("no output configured for operator `{operator}`")]
    NoOutput { operator: String },

    /// Correlation key lists of a join differ in length.
    #[error("correlation key lists differ in length: parent {parent}, child {child}")]
    CorrelationKeyLengths { parent: usize, child: usize },

    /// The dedup operator was configured with no key columns.
    #[error("distinct requires a non-empty key column list")]
    EmptyDistinctKey,

    /// A limit operator was configured with a zero row budget.
    #[error("limit requires a positive row budget")]
    ZeroLimit,

    /// An edit delivered to a non-join operator changed primary-key columns.
    #[error("edit changed primary-key columns in table `{table}`")]
    RekeyedEdit { table: String },

    /// A change kind was delivered to an operator that cannot apply it.
    #[error("operator `{operator}` cannot apply a `{kind}` change")]
    UnsupportedChange {
        operator: String,
        kind: &'static str,
    },

    /// A reentrant overlay could not be resolved by the end of a stream.
    #[error("overlay left unresolved at end of stream over table `{table}`")]
    UnresolvedOverlay { table: String },

    /// Schema construction or column resolution failed.
    #[error("schema error: {0}")]
    Schema(#[from] eddy_core::Error),
}

impl Error {
    /// Creates a missing-output contract error.
    pub fn no_output(operator: impl Into<String>) -> Self {
        Error::NoOutput {
            operator: operator.into(),
        }
    }

    /// Creates a rekeyed-edit contract error.
    pub fn rekeyed_edit(table: impl Into<String>) -> Self {
        Error::RekeyedEdit {
            table: table.into(),
        }
    }

    /// Creates an unresolved-overlay contract error.
    pub fn unresolved_overlay(table: impl Into<String>) -> Self {
        Error::UnresolvedOverlay {
            table: table.into(),
        }
    }
}
