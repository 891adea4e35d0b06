//! Health checks
//!
//! Readiness and liveness checks for the scrim-room service plus a detailed
//! report used by the `/stats` endpoint and the periodic health log.

use crate::engine::EngineStats;
use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: EngineStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn timed(name: &str, started: Instant, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl HealthCheck {
    /// Full health report of the service
    pub async fn check(app_state: &AppState) -> Result<Self> {
        let mut checks = vec![Self::check_service_running(app_state).await];

        let started = Instant::now();
        let (engine_check, stats) = match app_state.stats().await {
            Ok(stats) => (
                ComponentCheck::timed("engine", started, HealthStatus::Healthy, None),
                stats,
            ),
            Err(e) => (
                ComponentCheck::timed(
                    "engine",
                    started,
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                ),
                EngineStats::default(),
            ),
        };
        checks.push(engine_check);
        checks.push(Self::check_amqp(app_state));

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));
        debug!("Health check finished: {}", status);

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Liveness: the service loop is up
    pub async fn liveness_check(app_state: &AppState) -> Result<HealthStatus> {
        Ok(if app_state.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        })
    }

    /// Readiness: running and the engine answers
    pub async fn readiness_check(app_state: &AppState) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(match app_state.stats().await {
            Ok(_) => Self::check_amqp(app_state).status,
            Err(_) => HealthStatus::Unhealthy,
        })
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        if app_state.is_running().await {
            ComponentCheck::timed("service_running", started, HealthStatus::Healthy, None)
        } else {
            ComponentCheck::timed(
                "service_running",
                started,
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        }
    }

    fn check_amqp(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        match app_state.amqp_connected() {
            Some(true) => ComponentCheck::timed("amqp_connection", started, HealthStatus::Healthy, None),
            Some(false) => ComponentCheck::timed(
                "amqp_connection",
                started,
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => ComponentCheck::timed(
                "amqp_connection",
                started,
                HealthStatus::Degraded,
                Some("Running without AMQP".to_string()),
            ),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
