//! Player transfer contracts for the realtime channel.
//!
//! Transfers never travel over Redis. Each step is a message of type
//! `player.transfer.{stage}` with a JSON payload carrying the keys in
//! [`keys`]. The directional flow is:
//!
//! * Paper (origin) → Velocity: `request`
//! * Velocity → Paper (destination): `prepare`
//! * Paper (destination) → Velocity: `ready`
//! * Velocity → Paper (origin): `transferring`
//! * Velocity → Paper (destination): `complete`
//! * Velocity → Paper (origin) on failure: `fail`
//!
//! `cancel` is a terminal branch out of `request`.

use crate::{require_not_blank, ContractError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TYPE_PREFIX: &str = "player.transfer.";

/// One step of a player transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStage {
    Request,
    Prepare,
    Ready,
    Transferring,
    Complete,
    Fail,
    Cancel,
}

impl TransferStage {
    pub const ALL: [TransferStage; 7] = [
        TransferStage::Request,
        TransferStage::Prepare,
        TransferStage::Ready,
        TransferStage::Transferring,
        TransferStage::Complete,
        TransferStage::Fail,
        TransferStage::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Request => "request",
            TransferStage::Prepare => "prepare",
            TransferStage::Ready => "ready",
            TransferStage::Transferring => "transferring",
            TransferStage::Complete => "complete",
            TransferStage::Fail => "fail",
            TransferStage::Cancel => "cancel",
        }
    }

    /// Stages reachable from this one. Terminal stages return an empty slice.
    pub fn next_stages(&self) -> &'static [TransferStage] {
        match self {
            TransferStage::Request => &[TransferStage::Prepare, TransferStage::Cancel],
            TransferStage::Prepare => &[TransferStage::Ready],
            TransferStage::Ready => &[TransferStage::Transferring],
            TransferStage::Transferring => &[TransferStage::Complete, TransferStage::Fail],
            TransferStage::Complete | TransferStage::Fail | TransferStage::Cancel => &[],
        }
    }

    pub fn can_advance_to(&self, next: TransferStage) -> bool {
        self.next_stages().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_stages().is_empty()
    }

    /// The message type carrying this stage, e.g. `player.transfer.ready`.
    pub fn message_type(&self) -> String {
        format!("{TYPE_PREFIX}{}", self.as_str())
    }

    fn from_exact(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == name)
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStage {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_exact(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| ContractError::UnknownStage(s.to_string()))
    }
}

/// Builds `player.transfer.{stage}` from a free-form stage name.
///
/// The stage is trimmed and lower-cased; blank stages are rejected.
pub fn compose(stage: &str) -> Result<String, ContractError> {
    require_not_blank(stage, "stage")?;
    Ok(format!("{TYPE_PREFIX}{}", stage.trim().to_ascii_lowercase()))
}

/// Stage names reachable from `current`.
///
/// Matching is exact. Unknown and terminal stages yield an empty list, which
/// leaves room for extension stages outside the canonical flow.
pub fn allowed_next_stages(current: &str) -> Vec<&'static str> {
    TransferStage::from_exact(current)
        .map(|stage| stage.next_stages().iter().map(TransferStage::as_str).collect())
        .unwrap_or_default()
}

/// Whether moving from `from` to `to` follows the forward-only flow.
pub fn is_valid_transition(from: &str, to: &str) -> bool {
    match (TransferStage::from_exact(from), TransferStage::from_exact(to)) {
        (Some(from), Some(to)) => from.can_advance_to(to),
        _ => false,
    }
}

/// JSON keys every transfer payload carries.
pub mod keys {
    pub const TRANSFER_ID: &str = "transferId";
    pub const PLAYER_ID: &str = "playerId";
    pub const FROM_SERVER_ID: &str = "fromServerId";
    pub const TO_SERVER_ID: &str = "toServerId";
    pub const TIMESTAMP: &str = "timestamp";
    pub const REASON: &str = "reason";
}

/// Typed body of a transfer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPayload {
    pub transfer_id: String,
    pub player_id: String,
    pub from_server_id: String,
    pub to_server_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransferPayload {
    pub fn new(
        transfer_id: impl Into<String>,
        player_id: impl Into<String>,
        from_server_id: impl Into<String>,
        to_server_id: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            player_id: player_id.into(),
            from_server_id: from_server_id.into(),
            to_server_id: to_server_id.into(),
            timestamp: crate::current_epoch_millis(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Tracks the stage of a single transfer.
#[derive(Debug, Clone)]
pub struct TransferFlow {
    transfer_id: String,
    stage: TransferStage,
    history: Vec<TransferStage>,
}

impl TransferFlow {
    /// Starts a flow at [`TransferStage::Request`].
    pub fn new(transfer_id: impl Into<String>) -> Result<Self, ContractError> {
        let transfer_id = transfer_id.into();
        require_not_blank(&transfer_id, "transfer_id")?;
        Ok(Self {
            transfer_id,
            stage: TransferStage::Request,
            history: vec![TransferStage::Request],
        })
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn stage(&self) -> TransferStage {
        self.stage
    }

    pub fn history(&self) -> &[TransferStage] {
        &self.history
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Moves to `next` if the flow allows it. The stage is unchanged on error.
    pub fn advance(&mut self, next: TransferStage) -> Result<TransferStage, ContractError> {
        if !self.stage.can_advance_to(next) {
            return Err(ContractError::InvalidTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        self.stage = next;
        self.history.push(next);
        Ok(next)
    }
}
