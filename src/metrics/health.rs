//! Monitoring HTTP server
//!
//! Health checks (`/health`, `/ready`, `/alive`), Prometheus scraping (`/metrics`),
//! engine counters (`/stats`) and per-mode slot occupancy (`/lobby`).

use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use crate::types::GameMode;
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

const SERVICE_NAME: &str = "scrim-room";
const ENDPOINTS: [&str; 6] = ["/health", "/ready", "/alive", "/metrics", "/stats", "/lobby"];

/// Bind address of the monitoring server
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone)]
struct MonitorState {
    metrics: Arc<MetricsCollector>,
    app: Option<Arc<AppState>>,
}

/// HTTP server exposing health checks, metrics and lobby state
pub struct HealthServer {
    config: HealthServerConfig,
    state: MonitorState,
    stop_tx: watch::Sender<bool>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics: Arc<MetricsCollector>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            state: MonitorState { metrics, app: None },
            stop_tx,
        }
    }

    /// Attach the running service; without it every health check reports unavailable
    pub fn with_app_state(mut self, app: Arc<AppState>) -> Self {
        self.state.app = Some(app);
        self
    }

    /// Serve until [`HealthServer::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .with_context(|| {
                format!(
                    "Bad monitoring address {}:{}",
                    self.config.host, self.config.port
                )
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Could not bind monitoring server to {}", addr))?;
        info!("Monitoring endpoints on http://{}", addr);

        let mut stop_rx = self.stop_tx.subscribe();
        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stopped| *stopped).await;
            })
            .await?;

        info!("Monitoring server stopped");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.stop_tx.send_replace(true);
        Ok(())
    }

    #[cfg(test)]
    fn router(&self) -> Router {
        router(self.state.clone())
    }
}

fn router(state: MonitorState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/alive", get(alive))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .route("/lobby", get(lobby))
        .with_state(state)
}

fn unavailable(reason: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "service": SERVICE_NAME, "error": reason })),
    )
        .into_response()
}

fn health_status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": crate::VERSION,
        "endpoints": ENDPOINTS,
    }))
}

async fn health(State(state): State<MonitorState>) -> Response {
    let Some(app) = &state.app else {
        return unavailable("service not started");
    };
    let status = HealthCheck::liveness_check(app)
        .await
        .unwrap_or(HealthStatus::Unhealthy);
    debug!("Health check: {:?}", status);

    (
        health_status_code(status),
        Json(json!({
            "status": status,
            "service": SERVICE_NAME,
            "version": crate::VERSION,
        })),
    )
        .into_response()
}

async fn ready(State(state): State<MonitorState>) -> Response {
    let Some(app) = &state.app else {
        return unavailable("service not started");
    };
    let status = match HealthCheck::readiness_check(app).await {
        Ok(status) => status,
        Err(e) => {
            error!("Readiness check failed: {}", e);
            HealthStatus::Unhealthy
        }
    };
    (health_status_code(status), Json(json!({ "status": status }))).into_response()
}

async fn alive(State(state): State<MonitorState>) -> Response {
    let Some(app) = &state.app else {
        return unavailable("service not started");
    };
    match HealthCheck::liveness_check(app).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not alive").into_response(),
    }
}

async fn metrics(State(state): State<MonitorState>) -> Response {
    match encode_metrics(&state.metrics) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Metrics encoding failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

async fn stats(State(state): State<MonitorState>) -> Response {
    let Some(app) = &state.app else {
        return unavailable("service not started");
    };
    let report = match HealthCheck::check(app).await {
        Ok(report) => report,
        Err(e) => {
            error!("Stats collection failed: {}", e);
            return unavailable("stats unavailable");
        }
    };

    let engine = &report.stats;
    Json(json!({
        "status": report.status,
        "version": report.version,
        "lobby": engine.registry,
        "matches": {
            "pending": engine.pending_matches,
            "active": engine.active_matches,
            "pending_timers": engine.pending_timers,
        },
        "totals": {
            "promotions": engine.promotions,
            "confirmation_timeouts": engine.confirmation_timeouts,
            "auto_actions": engine.auto_actions,
            "stale_timers": engine.stale_timers,
            "settlements": engine.settlements,
            "cancellations": engine.cancellations,
            "rejected_requests": engine.rejected_requests,
            "delivery_failures": engine.delivery_failures,
        },
        "components": report.checks,
        "timestamp": report.timestamp,
    }))
    .into_response()
}

async fn lobby(State(state): State<MonitorState>) -> Response {
    let Some(app) = &state.app else {
        return unavailable("service not started");
    };
    match lobby_occupancy(app) {
        Ok(modes) => Json(Value::Object(modes)).into_response(),
        Err(e) => {
            error!("Lobby snapshot failed: {}", e);
            unavailable("lobby unavailable")
        }
    }
}

/// Seated players per slot, keyed by mode wire name
fn lobby_occupancy(app: &AppState) -> Result<Map<String, Value>> {
    let registry = app.engine().registry();
    let mut modes = Map::new();
    for mode in GameMode::ALL {
        let slots = registry.occupancy(mode)?;
        modes.insert(mode.to_string(), json!(slots));
    }
    Ok(modes)
}

/// Gather every registered metric in the Prometheus text format
pub fn encode_metrics(metrics: &MetricsCollector) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metrics.registry().gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}
