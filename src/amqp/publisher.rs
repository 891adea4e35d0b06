//! Outbound prompt delivery

use crate::amqp::messages::{prompt_routing_key, MessageEnvelope};
use crate::error::{MatchmakingError, Result};
use crate::types::{PlayerId, Prompt};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Delivery of prompts to individual players
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Deliver one prompt to its recipient
    async fn prompt(&self, prompt: &Prompt) -> Result<()>;
}

/// Configuration for prompt publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: crate::amqp::messages::PROMPT_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

/// AMQP-backed gateway publishing to a topic exchange
pub struct AmqpGateway {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpGateway {
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let gateway = Self { channel, config };
        gateway.setup_exchange().await?;
        Ok(gateway)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare prompt exchange: {}", e),
            }
        })?;

        info!("Declared prompt exchange {}", self.config.exchange);
        Ok(())
    }

    async fn try_publish(&self, envelope: &MessageEnvelope<Prompt>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish prompt: {}", e),
            })?;
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for AmqpGateway {
    async fn prompt(&self, prompt: &Prompt) -> Result<()> {
        let envelope = MessageEnvelope::new(prompt.clone(), prompt_routing_key(prompt));
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(&envelope).await {
                Ok(()) => {
                    debug!(
                        "Published prompt {} to {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to deliver prompt {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(MatchmakingError::DeliveryFailed {
                            player_id: prompt.player_id.clone(),
                            reason: e.to_string(),
                        }
                        .into());
                    }

                    warn!(
                        "Publish attempt {} failed for prompt {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );
                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }
}

/// In-process gateway recording every prompt, for tests and offline runs
#[derive(Debug, Default)]
pub struct MockGateway {
    delivered: Mutex<Vec<Prompt>>,
    unreachable: Mutex<HashSet<PlayerId>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every prompt to this player fail
    pub fn fail_for(&self, player_id: &str) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.insert(player_id.to_string());
        }
    }

    /// All prompts delivered so far
    pub fn prompts(&self) -> Vec<Prompt> {
        self.delivered
            .lock()
            .map(|delivered| delivered.clone())
            .unwrap_or_default()
    }

    /// Prompts delivered to one player
    pub fn prompts_for(&self, player_id: &str) -> Vec<Prompt> {
        self.prompts()
            .into_iter()
            .filter(|prompt| prompt.player_id == player_id)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.clear();
        }
    }
}

#[async_trait]
impl MessagingGateway for MockGateway {
    async fn prompt(&self, prompt: &Prompt) -> Result<()> {
        let unreachable = self
            .unreachable
            .lock()
            .map(|set| set.contains(&prompt.player_id))
            .unwrap_or(false);
        if unreachable {
            return Err(MatchmakingError::DeliveryFailed {
                player_id: prompt.player_id.clone(),
                reason: "recipient unreachable".to_string(),
            }
            .into());
        }

        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push(prompt.clone());
        }
        Ok(())
    }
}
