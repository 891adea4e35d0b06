//! Metrics and monitoring for the scrim-room matchmaking service
//!
//! Prometheus collectors for lobby and match lifecycle events, plus the
//! HTTP server exposing them next to the health checks.

pub mod collector;
pub mod health;

pub use collector::{
    LobbyMetrics, MatchMetrics, MetricsCollector, MetricsTimer, PerformanceMetrics,
    ServiceMetrics,
};
pub use health::{encode_metrics, HealthServer, HealthServerConfig};
