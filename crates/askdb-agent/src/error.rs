//! Error types for askdb-agent

use thiserror::Error;

/// Result type alias using askdb-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while assembling an agent. A running agent never
/// returns these; run failures are reported through `RunResult::status`.
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion layer
    #[error(transparent)]
    Ai(#[from] askdb_ai::Error),

    /// Two tools were registered under the same name
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// Invalid agent configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
