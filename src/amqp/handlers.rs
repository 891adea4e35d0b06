//! AMQP consumer for inbound gateway requests
//!
//! Every delivery on the request queue is decoded into a
//! [`GatewayRequest`] and routed to a [`MessageHandler`], in practice the
//! matchmaking engine. Deliveries are acknowledged once handled, whatever
//! the outcome; a request that cannot be decoded is answered with a
//! rejection when its sender can still be made out.

use crate::amqp::messages::MessageUtils;
use crate::engine::MatchEngine;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::types::GatewayRequest;
use amqprs::{
    channel::{BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Receiver of decoded gateway requests
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_request(&self, request: GatewayRequest) -> Result<()>;

    /// A delivery that could not be turned into a request
    async fn handle_invalid(&self, sender: Option<String>, error: &anyhow::Error);
}

#[async_trait]
impl MessageHandler for MatchEngine {
    async fn handle_request(&self, request: GatewayRequest) -> Result<()> {
        MatchEngine::handle_request(self, request).await
    }

    async fn handle_invalid(&self, sender: Option<String>, error: &anyhow::Error) {
        match sender {
            Some(player_id) => self.reject(&player_id, &error.to_string()).await,
            None => warn!("Dropped undecodable request without a sender: {}", error),
        }
    }
}

/// Decode, validate and dispatch one delivery body
pub async fn process_delivery(handler: &dyn MessageHandler, content: &[u8]) -> Result<()> {
    match MessageUtils::decode_request(content) {
        Ok(request) => {
            debug!(
                "Request from {} decoded, dispatching",
                request.player_id()
            );
            handler.handle_request(request).await
        }
        Err(e) => {
            handler.handle_invalid(sender_hint(content), &e).await;
            Ok(())
        }
    }
}

/// Best guess at who sent a body that failed to decode
fn sender_hint(content: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(content).ok()?;
    let body = value.get("payload").unwrap_or(&value);
    let field = match body.get("type").and_then(serde_json::Value::as_str) {
        Some("invite_clanmate") => "inviter",
        Some("respond_invite") => "invitee",
        _ => "player_id",
    };
    body.get(field)
        .and_then(serde_json::Value::as_str)
        .or_else(|| body.get("evidence")?.get("submitted_by")?.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Consumer registration on the request queue
pub struct RequestConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
    channel: Channel,
    consumer_tag: String,
}

impl RequestConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("scrim-requests-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            metrics: None,
            channel,
            consumer_tag,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(
                RequestDelivery {
                    handler: self.handler.clone(),
                    metrics: self.metrics.clone(),
                },
                args,
            )
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming requests from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming requests");
        Ok(())
    }
}

struct RequestDelivery {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl AsyncConsumer for RequestDelivery {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP request received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let started = Instant::now();
        let result = process_delivery(self.handler.as_ref(), &content).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_amqp_operation("consume", result.is_ok());
        }
        match result {
            Ok(()) => debug!(
                "Request handled - delivery_tag: {}, processing_time: {:.2}ms",
                delivery_tag,
                started.elapsed().as_secs_f64() * 1000.0
            ),
            Err(e) => error!(
                "Request failed - delivery_tag: {}, processing_time: {:.2}ms, error: {}",
                delivery_tag,
                started.elapsed().as_secs_f64() * 1000.0,
                e
            ),
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            warn!("Failed to ack delivery {}: {}", delivery_tag, e);
        }
    }
}
