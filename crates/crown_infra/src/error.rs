use crate::config::ConfigError;
use infra_api::{BusError, ContractError, RealtimeError};
use infra_core::DatabaseError;

/// Everything that can stop a node from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("message bus: {0}")]
    Bus(#[from] BusError),

    #[error("realtime channel: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("database: {0}")]
    Database(#[from] DatabaseError),

    #[error("pub/sub is not started")]
    PubSubNotStarted,

    #[error("subscriber needs at least one channel")]
    NoChannels,

    #[error("service {0} is already registered")]
    DuplicateService(&'static str),

    #[error("failed to close {name}: {message}")]
    Close { name: String, message: String },
}
