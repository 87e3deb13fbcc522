//! Pub/sub channel naming.
//!
//! Every channel is named `crown:{environment}:{scope}`. The environment
//! isolates traffic between deployments and the scope says who listens:
//!
//! * Paper nodes publish to `crown:{env}:proxy`
//! * Velocity publishes to `crown:{env}:paper`
//! * Anyone may publish to `crown:{env}:broadcast`

use crate::{require_not_blank, ContractError, ServerKind};
use std::fmt;

const PREFIX: &str = "crown";

/// The audience part of a channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    Proxy,
    Paper,
    Broadcast,
}

impl ChannelScope {
    pub fn wire_name(&self) -> &'static str {
        match self {
            ChannelScope::Proxy => "proxy",
            ChannelScope::Paper => "paper",
            ChannelScope::Broadcast => "broadcast",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "proxy" => Some(ChannelScope::Proxy),
            "paper" => Some(ChannelScope::Paper),
            "broadcast" => Some(ChannelScope::Broadcast),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Builds `crown:{environment}:{scope}`.
pub fn channel(environment: &str, scope: ChannelScope) -> Result<String, ContractError> {
    require_not_blank(environment, "environment")?;
    Ok(format!("{PREFIX}:{environment}:{}", scope.wire_name()))
}

pub fn for_proxy(environment: &str) -> Result<String, ContractError> {
    channel(environment, ChannelScope::Proxy)
}

pub fn for_paper(environment: &str) -> Result<String, ContractError> {
    channel(environment, ChannelScope::Paper)
}

pub fn for_broadcast(environment: &str) -> Result<String, ContractError> {
    channel(environment, ChannelScope::Broadcast)
}

/// The channel a node of the given kind publishes its directed traffic to.
pub fn outbound_for(kind: ServerKind, environment: &str) -> Result<String, ContractError> {
    match kind {
        ServerKind::Paper => for_proxy(environment),
        ServerKind::Velocity => for_paper(environment),
    }
}

/// The channels a node of the given kind listens on: its own scope and broadcast.
pub fn inbound_for(kind: ServerKind, environment: &str) -> Result<Vec<String>, ContractError> {
    let own = match kind {
        ServerKind::Paper => for_paper(environment)?,
        ServerKind::Velocity => for_proxy(environment)?,
    };
    Ok(vec![own, for_broadcast(environment)?])
}

/// Splits a well-formed channel name into its environment and scope.
///
/// Returns `None` for foreign prefixes, unknown scopes or a blank environment.
pub fn parse(name: &str) -> Option<(&str, ChannelScope)> {
    let rest = name.strip_prefix(PREFIX)?.strip_prefix(':')?;
    let (environment, scope) = rest.rsplit_once(':')?;
    if environment.trim().is_empty() {
        return None;
    }
    Some((environment, ChannelScope::from_wire_name(scope)?))
}
