//! Naming rules for message types.
//!
//! Types stay plain strings so any module can add its own without touching
//! this crate. The convention is `<domain>.<action>` with lowercase segments,
//! e.g. `profile.sync`, `party.invite` or `economy.balance.update`.

use crate::{require_not_blank, ContractError};

/// Heartbeat published by every node on its outbound channel.
pub const SERVER_HEARTBEAT: &str = "server.heartbeat";

/// Operator notice published on the broadcast channel.
pub const BROADCAST_NOTICE: &str = "broadcast.notice";

/// Joins a domain and an action into a message type.
pub fn compose(domain: &str, action: &str) -> Result<String, ContractError> {
    require_not_blank(domain, "domain")?;
    require_not_blank(action, "action")?;
    Ok(format!("{domain}.{action}"))
}
