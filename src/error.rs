// ⚠️ Engine Errors
// Only failures that invalidate a whole step live here. A record that
// matches nothing is not an error, it simply stays unknown.

use crate::identifiers::IdentifierType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A table the step must read is missing something it cannot do without
    #[error("malformed input in '{table}': {detail}")]
    MalformedInput { table: String, detail: String },

    /// No column of the required identifier type in the table
    #[error("table '{table}' has no {identifier} column")]
    MissingIdentifier {
        table: String,
        identifier: IdentifierType,
    },

    #[error("invalid grammar for {identifier}: '{pattern}'")]
    InvalidGrammar {
        identifier: IdentifierType,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn malformed(table: &str, detail: impl Into<String>) -> Self {
        EngineError::MalformedInput {
            table: table.to_string(),
            detail: detail.into(),
        }
    }

    pub fn missing(table: &str, identifier: IdentifierType) -> Self {
        EngineError::MissingIdentifier {
            table: table.to_string(),
            identifier,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
