//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::{GatewayRequest, Prompt};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Inbound queue carrying gateway requests
pub const REQUEST_QUEUE: &str = "scrims.requests";

/// Outbound exchange carrying player prompts
pub const PROMPT_EXCHANGE: &str = "scrims.prompts";

/// Routing key prefix of player prompts
pub const PROMPT_ROUTING_PREFIX: &str = "prompt";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: crate::utils::generate_correlation_id(),
            timestamp: Utc::now(),
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
            MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Routing key a prompt is published under
pub fn prompt_routing_key(prompt: &Prompt) -> String {
    format!("{}.{}", PROMPT_ROUTING_PREFIX, prompt.player_id)
}

/// Message decoding and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Decode a gateway request, accepting both a bare request and an envelope
    pub fn decode_request(bytes: &[u8]) -> Result<GatewayRequest> {
        let request = match serde_json::from_slice::<GatewayRequest>(bytes) {
            Ok(request) => request,
            Err(_) => MessageEnvelope::<GatewayRequest>::from_bytes(bytes)?.payload,
        };
        Self::validate_request(&request)?;
        Ok(request)
    }

    /// Reject requests that can never be served
    pub fn validate_request(request: &GatewayRequest) -> Result<()> {
        if request.player_id().trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        match request {
            GatewayRequest::InviteClanmate {
                inviter, invitee, ..
            }
            | GatewayRequest::RespondInvite {
                inviter, invitee, ..
            } if inviter == invitee => Err(MatchmakingError::InvalidRequest {
                reason: "A player cannot invite themselves".to_string(),
            }
            .into()),
            GatewayRequest::SubmitResult { evidence, .. } if evidence.attachment.is_empty() => {
                Err(MatchmakingError::InvalidRequest {
                    reason: "Result evidence needs an attachment".to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }
}
