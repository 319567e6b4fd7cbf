//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use crate::utils::{current_timestamp, generate_correlation_id};
use serde_json;

/// AMQP queue and exchange names
pub const COMMAND_QUEUE: &str = "draft_room.commands";
pub const NOTICE_EXCHANGE: &str = "draft_room.notices";

/// Prefix of every outbound routing key
pub const NOTICE_ROUTING_PREFIX: &str = "notice";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: generate_correlation_id().to_string(),
            timestamp: current_timestamp(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidCommand {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Deserialize a command, accepting either a bare command or a
    /// timestamped `CommandRequest`
    pub fn deserialize_command(bytes: &[u8]) -> Result<Command> {
        let command = match serde_json::from_slice::<CommandRequest>(bytes) {
            Ok(request) => request.command,
            Err(_) => serde_json::from_slice::<Command>(bytes).map_err(|e| {
                MatchmakingError::InvalidCommand {
                    reason: format!("Failed to deserialize command: {}", e),
                }
            })?,
        };

        Self::validate_command(&command)?;
        Ok(command)
    }

    /// Reject commands that can never succeed
    pub fn validate_command(command: &Command) -> Result<()> {
        let reason = match command {
            Command::Join { player } if player.name.trim().is_empty() => {
                Some("Player name cannot be empty")
            }
            Command::Substitute { replacement, .. } if replacement.name.trim().is_empty() => {
                Some("Replacement name cannot be empty")
            }
            Command::Substitute {
                player_id,
                replacement,
                ..
            } if *player_id == replacement.id => Some("A player cannot replace themselves"),
            Command::Swap { first, second, .. } if first == second => {
                Some("Cannot swap a player with themselves")
            }
            Command::SelectMap { query, .. } if query.trim().is_empty() => {
                Some("Map query cannot be empty")
            }
            _ => None,
        };

        match reason {
            Some(reason) => Err(MatchmakingError::InvalidCommand {
                reason: reason.to_string(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Routing key a notice is published under
    pub fn routing_key(notice: &Notice) -> String {
        format!(
            "{}.{}",
            NOTICE_ROUTING_PREFIX,
            notice.target.routing_suffix()
        )
    }
}
