//! # Infra API - Shared Contracts for Crown Infrastructure
//!
//! The contract layer shared by every node in a Crown deployment, whether it
//! runs next to a Paper game server or a Velocity proxy. Nothing in this crate
//! performs I/O; it defines the vocabulary the implementations in `infra_core`
//! and the node process in `crown_infra` agree on.
//!
//! ## What lives here
//!
//! * **Context** - which environment a node belongs to, its server id and kind
//! * **Message envelope** - [`InfraMessage`] and its metadata, plus the JSON wire shape
//! * **Channel naming** - the `crown:{environment}:{scope}` convention and flow rules
//! * **Consumer rules** - the guard every subscriber applies before side effects
//! * **Transfer contracts** - player transfer stages and their forward-only transitions
//! * **Service traits** - [`MessageBus`] and [`RealtimeChannel`] with their error types
//!
//! ## Message Flow
//!
//! 1. A Paper node publishes an [`InfraMessage`] on `crown:{env}:proxy`
//! 2. The proxy receives it, applies [`rules::should_process`] and dispatches by type
//! 3. The proxy answers on `crown:{env}:paper`, or everyone hears it on `crown:{env}:broadcast`
//!
//! Latency sensitive traffic such as player transfers skips Redis entirely and
//! travels over a [`RealtimeChannel`].
//!
//! ```rust
//! use infra_api::{channels, InfraContext, InfraMessage, ServerKind};
//!
//! let ctx = InfraContext::new("prod", "village-1", ServerKind::Paper).unwrap();
//! let msg = InfraMessage::text(ctx.environment(), ctx.server_id(), "server.heartbeat", "").unwrap();
//! assert_eq!(channels::outbound_for(ctx.kind(), ctx.environment()).unwrap(), "crown:prod:proxy");
//! assert_eq!(msg.payload(), "");
//! ```

pub mod bus;
pub mod channels;
pub mod context;
pub mod database;
pub mod error;
pub mod executor;
pub mod message;
pub mod message_types;
pub mod realtime;
pub mod rules;
pub mod state;
pub mod transfer;

pub use bus::{BusError, MessageBus, MessageHandler, Subscription};
pub use channels::ChannelScope;
pub use context::{InfraContext, ServerKind};
pub use database::DatabaseConfig;
pub use error::ContractError;
pub use executor::{InlineExecutor, Task, TaskExecutor, TokioExecutor};
pub use message::{InfraMessage, MessageMeta, PayloadFormat};
pub use realtime::{RealtimeChannel, RealtimeError, RealtimeHandler};
pub use state::{AtomicServiceState, ServiceState};
pub use transfer::{TransferFlow, TransferPayload, TransferStage};

/// Returns the current time as milliseconds since the Unix epoch.
pub fn current_epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Returns `true` when the value is empty or consists only of whitespace.
pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Rejects blank values, naming the offending field in the error.
pub(crate) fn require_not_blank(value: &str, name: &'static str) -> Result<(), ContractError> {
    if is_blank(value) {
        return Err(ContractError::Blank(name));
    }
    Ok(())
}
