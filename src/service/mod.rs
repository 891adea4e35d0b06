//! Service layer for the scrim-room matchmaking service
//!
//! Application state, AMQP wiring, background tasks and health checks.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus};
