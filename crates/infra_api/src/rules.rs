//! Consumer-side processing rules.
//!
//! Subscribers call [`should_process`] right after decoding a message and
//! before any side effect. It keeps traffic inside its environment and stops a
//! node from reacting to its own publications.

use crate::{require_not_blank, ContractError, InfraMessage};

/// Decides whether the current node should handle `message`.
///
/// # Arguments
///
/// * `message` - Decoded message
/// * `self_environment` - Environment of the current node
/// * `self_server_id` - Server id of the current node
///
/// # Returns
///
/// `Ok(false)` for foreign environments or self-originated messages,
/// `Ok(true)` otherwise. Blank self identifiers are a contract error.
pub fn should_process(
    message: &InfraMessage,
    self_environment: &str,
    self_server_id: &str,
) -> Result<bool, ContractError> {
    require_not_blank(self_environment, "self_environment")?;
    require_not_blank(self_server_id, "self_server_id")?;

    if message.environment() != self_environment {
        return Ok(false);
    }
    Ok(message.from_server_id() != self_server_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(env: &str, from: &str) -> InfraMessage {
        InfraMessage::json(env, from, "party.invite", "{}").unwrap()
    }

    #[test]
    fn test_filters_foreign_environment() {
        assert!(!should_process(&msg("dev", "paper-1"), "prod", "proxy-1").unwrap());
    }

    #[test]
    fn test_filters_self_messages() {
        assert!(!should_process(&msg("prod", "proxy-1"), "prod", "proxy-1").unwrap());
    }

    #[test]
    fn test_accepts_peer_messages() {
        assert!(should_process(&msg("prod", "paper-1"), "prod", "proxy-1").unwrap());
    }

    #[test]
    fn test_rejects_blank_self() {
        assert_eq!(
            should_process(&msg("prod", "paper-1"), "", "proxy-1"),
            Err(ContractError::Blank("self_environment"))
        );
        assert_eq!(
            should_process(&msg("prod", "paper-1"), "prod", " "),
            Err(ContractError::Blank("self_server_id"))
        );
    }
}
