//! AMQP integration for the matchmaking service
//!
//! Requests arrive on a single durable queue; prompts leave through a topic
//! exchange keyed by recipient.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::AmqpConnection;
pub use handlers::{process_delivery, MessageHandler, RequestConsumer};
pub use messages::{prompt_routing_key, MessageEnvelope, MessageUtils};
pub use publisher::{AmqpGateway, MessagingGateway, MockGateway, PublisherConfig};
