//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the scrim-room matchmaking
//! service using Prometheus metrics.

use crate::engine::EngineStats;
use crate::types::{GameMode, PhaseKind};
use anyhow::Result;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    lobby_metrics: LobbyMetrics,
    match_metrics: MatchMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Lobby-related metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Players seated in lobby slots
    pub players_waiting: IntGauge,

    /// Slots with at least one member
    pub occupied_slots: IntGauge,

    /// Clans waiting in the clan queue
    pub clans_queued: IntGauge,

    /// Slots filled and handed to confirmation
    pub promotions_total: IntCounterVec,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    pub pending_matches: IntGauge,
    pub active_matches: IntGauge,

    /// Confirmation windows that expired
    pub confirmations_timed_out_total: IntCounter,

    /// No-show warnings issued
    pub warnings_total: IntCounter,

    /// No-show bans issued
    pub bans_total: IntCounter,

    /// Turns resolved by the timer
    pub auto_actions_total: IntCounterVec,

    /// Timer firings that found the turn already taken
    pub stale_timers_total: IntCounter,

    /// Requests rejected by validation
    pub rejected_total: IntCounterVec,

    pub settlements_total: IntCounterVec,
    pub cancellations_total: IntCounterVec,

    /// Prompts that could not be delivered
    pub delivery_failures_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Engine operation latency
    pub operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            match_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from an engine snapshot
    pub fn update_from_engine_stats(&self, stats: &EngineStats) {
        self.lobby_metrics
            .players_waiting
            .set(stats.registry.players_waiting as i64);
        self.lobby_metrics
            .occupied_slots
            .set(stats.registry.occupied_slots as i64);
        self.lobby_metrics
            .clans_queued
            .set(stats.registry.clans_queued as i64);
        self.match_metrics
            .pending_matches
            .set(stats.pending_matches as i64);
        self.match_metrics
            .active_matches
            .set(stats.active_matches as i64);
    }

    pub fn record_promotion(&self, mode: GameMode) {
        self.lobby_metrics
            .promotions_total
            .with_label_values(&[&mode.to_string()])
            .inc();
    }

    pub fn record_confirmation_timeout(&self, warnings: u64, bans: u64) {
        self.match_metrics.confirmations_timed_out_total.inc();
        self.match_metrics.warnings_total.inc_by(warnings);
        self.match_metrics.bans_total.inc_by(bans);
    }

    pub fn record_auto_action(&self, phase: PhaseKind) {
        self.match_metrics
            .auto_actions_total
            .with_label_values(&[&phase.to_string()])
            .inc();
    }

    pub fn record_stale_timer(&self) {
        self.match_metrics.stale_timers_total.inc();
    }

    pub fn record_rejection(&self, reason: &str) {
        self.match_metrics
            .rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_settlement(&self, mode: GameMode) {
        self.match_metrics
            .settlements_total
            .with_label_values(&[&mode.to_string()])
            .inc();
    }

    pub fn record_cancellation(&self, reason: &str) {
        self.match_metrics
            .cancellations_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_delivery_failure(&self) {
        self.match_metrics.delivery_failures_total.inc();
    }

    /// Record engine operation duration
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(if healthy { 1 } else { 0 });
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("scrim_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "scrim_room_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("scrim_room_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "scrim_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("scrim_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_waiting =
            IntGauge::new("scrim_room_players_waiting", "Players seated in lobby slots")?;
        registry.register(Box::new(players_waiting.clone()))?;

        let occupied_slots = IntGauge::new(
            "scrim_room_occupied_slots",
            "Slots with at least one member",
        )?;
        registry.register(Box::new(occupied_slots.clone()))?;

        let clans_queued = IntGauge::new("scrim_room_clans_queued", "Clans in the clan queue")?;
        registry.register(Box::new(clans_queued.clone()))?;

        let promotions_total = IntCounterVec::new(
            Opts::new("scrim_room_promotions_total", "Slots promoted to matches"),
            &["mode"],
        )?;
        registry.register(Box::new(promotions_total.clone()))?;

        Ok(Self {
            players_waiting,
            occupied_slots,
            clans_queued,
            promotions_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pending_matches =
            IntGauge::new("scrim_room_pending_matches", "Matches awaiting confirmation")?;
        registry.register(Box::new(pending_matches.clone()))?;

        let active_matches = IntGauge::new("scrim_room_active_matches", "Matches in setup or play")?;
        registry.register(Box::new(active_matches.clone()))?;

        let confirmations_timed_out_total = IntCounter::new(
            "scrim_room_confirmations_timed_out_total",
            "Confirmation windows that expired",
        )?;
        registry.register(Box::new(confirmations_timed_out_total.clone()))?;

        let warnings_total =
            IntCounter::new("scrim_room_warnings_total", "No-show warnings issued")?;
        registry.register(Box::new(warnings_total.clone()))?;

        let bans_total = IntCounter::new("scrim_room_bans_total", "No-show bans issued")?;
        registry.register(Box::new(bans_total.clone()))?;

        let auto_actions_total = IntCounterVec::new(
            Opts::new("scrim_room_auto_actions_total", "Turns resolved by timeout"),
            &["phase"],
        )?;
        registry.register(Box::new(auto_actions_total.clone()))?;

        let stale_timers_total = IntCounter::new(
            "scrim_room_stale_timers_total",
            "Timer firings dropped as stale",
        )?;
        registry.register(Box::new(stale_timers_total.clone()))?;

        let rejected_total = IntCounterVec::new(
            Opts::new("scrim_room_rejected_total", "Requests rejected by validation"),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let settlements_total = IntCounterVec::new(
            Opts::new("scrim_room_settlements_total", "Matches settled"),
            &["mode"],
        )?;
        registry.register(Box::new(settlements_total.clone()))?;

        let cancellations_total = IntCounterVec::new(
            Opts::new("scrim_room_cancellations_total", "Matches cancelled"),
            &["reason"],
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let delivery_failures_total = IntCounter::new(
            "scrim_room_delivery_failures_total",
            "Prompts that could not be delivered",
        )?;
        registry.register(Box::new(delivery_failures_total.clone()))?;

        Ok(Self {
            pending_matches,
            active_matches,
            confirmations_timed_out_total,
            warnings_total,
            bans_total,
            auto_actions_total,
            stale_timers_total,
            rejected_total,
            settlements_total,
            cancellations_total,
            delivery_failures_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "scrim_room_operation_duration_seconds",
                "Engine operation duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self { operation_duration })
    }
}
