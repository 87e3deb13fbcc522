//! Server context shared by every message, log line and environment branch.
//!
//! A node is identified by the environment it belongs to (`prod`, `dev`,
//! `staging`, ...), its server id (`village-1`, `dungeon-2`, `proxy-1`, ...)
//! and the kind of host it runs beside.

use crate::{require_not_blank, ContractError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The host runtime a node is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// A Paper game server.
    Paper,
    /// A Velocity proxy.
    Velocity,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Paper => "paper",
            ServerKind::Velocity => "velocity",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(ServerKind::Paper),
            "velocity" => Ok(ServerKind::Velocity),
            other => Err(ContractError::UnknownServerKind(other.to_string())),
        }
    }
}

/// Identity of the running node.
///
/// Built once at bootstrap and shared read-only afterwards. Both the
/// environment and the server id are guaranteed non-blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraContext {
    environment: String,
    server_id: String,
    kind: ServerKind,
}

impl InfraContext {
    /// Creates a context after checking that no identifier is blank.
    ///
    /// # Arguments
    ///
    /// * `environment` - Logical environment name isolating traffic
    /// * `server_id` - Unique id of this node inside the environment
    /// * `kind` - Host runtime this node runs beside
    pub fn new(
        environment: impl Into<String>,
        server_id: impl Into<String>,
        kind: ServerKind,
    ) -> Result<Self, ContractError> {
        let environment = environment.into();
        let server_id = server_id.into();
        require_not_blank(&environment, "environment")?;
        require_not_blank(&server_id, "server_id")?;
        Ok(Self {
            environment,
            server_id,
            kind,
        })
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn kind(&self) -> ServerKind {
        self.kind
    }
}

impl fmt::Display for InfraContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.environment, self.server_id, self.kind)
    }
}
