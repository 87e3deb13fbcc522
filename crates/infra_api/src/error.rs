//! Errors raised when a value violates one of the shared contracts.

/// A contract violation detected while building or parsing a shared value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("unknown server kind: {0}")]
    UnknownServerKind(String),

    #[error("unknown transfer stage: {0}")]
    UnknownStage(String),

    #[error("transfer cannot move from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },
}
