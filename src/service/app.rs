//! Main application state and service coordination
//!
//! [`AppState`] owns the engine, the AMQP plumbing and the background tasks.
//! It is shared behind an `Arc` so that the health server can inspect the
//! same state it reports on.

use crate::amqp::{
    AmqpConnection, AmqpGateway, MessageHandler, MessagingGateway, MockGateway, PublisherConfig,
    RequestConsumer,
};
use crate::config::{validate_config, AppConfig};
use crate::engine::{EngineStats, MatchEngine};
use crate::lobby::StaticModeProvider;
use crate::metrics::health::{HealthServer, HealthServerConfig};
use crate::metrics::MetricsCollector;
use crate::roster::{InMemoryMatchStore, InMemoryRosterStore, MatchStore, RosterStore};
use amqprs::channel::QueueDeclareArguments;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    engine: MatchEngine,
    metrics: Arc<MetricsCollector>,
    /// `None` when running offline
    amqp_connection: Option<Arc<AmqpConnection>>,
    request_consumer: Mutex<Option<RequestConsumer>>,
    health_server: Mutex<Option<Arc<HealthServer>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Connect to the broker and build the engine around it
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing scrim-room matchmaking service");
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let connection = AmqpConnection::connect(&config.amqp)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;
        let connection = Arc::new(connection);

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open publisher channel: {}", e),
                })?;
        let publisher_config = PublisherConfig {
            exchange: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };
        let gateway = AmqpGateway::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize prompt gateway: {}", e),
            })?;

        Self::assemble(config, Arc::new(gateway), Some(connection))
    }

    /// Run without a broker; prompts are only recorded in memory
    pub fn offline(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing scrim-room matchmaking service without AMQP");
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;
        Self::assemble(config, Arc::new(MockGateway::new()), None)
    }

    fn assemble(
        config: AppConfig,
        gateway: Arc<dyn MessagingGateway>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        // Accounts and match rows live in external stores; the in-memory
        // implementations stand in for them in this process.
        let roster: Arc<dyn RosterStore> = Arc::new(InMemoryRosterStore::with_auto_register());
        let matches: Arc<dyn MatchStore> = Arc::new(InMemoryMatchStore::new());

        let engine = MatchEngine::new(
            config.matchmaking.clone(),
            &StaticModeProvider::new(),
            roster,
            matches,
            gateway,
        )
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to initialize matchmaking engine: {}", e),
        })?
        .with_metrics(metrics.clone());

        Ok(Self {
            config,
            engine,
            metrics,
            amqp_connection,
            request_consumer: Mutex::new(None),
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Recover open matches, then start serving requests and health checks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting scrim-room matchmaking service");

        let report = self
            .engine
            .recover_open_matches()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to recover open matches: {}", e),
            })?;
        if report.failed > 0 {
            warn!("{} open matches could not be recovered", report.failed);
        }

        *self.is_running.write().await = true;

        self.start_health_server().await;
        self.start_amqp_consumption().await?;
        self.start_background_tasks().await;

        info!("Scrim-room matchmaking service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of scrim-room service");
        *self.is_running.write().await = false;

        if let Some(consumer) = self.request_consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            }
        }

        self.engine.shutdown();
        self.stop_background_tasks().await;

        if let Some(server) = self.health_server.lock().await.take() {
            if let Err(e) = server.stop().await {
                warn!("Failed to stop health server: {}", e);
            }
        }

        let final_stats = self
            .engine
            .stats()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;
        info!("Final service statistics: {:?}", final_stats);
        info!("Scrim-room service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// `None` when the service runs without a broker
    pub fn amqp_connected(&self) -> Option<bool> {
        self.amqp_connection
            .as_ref()
            .map(|connection| connection.is_open())
    }

    pub async fn stats(&self) -> anyhow::Result<EngineStats> {
        self.engine.stats().await
    }

    async fn start_health_server(self: &Arc<Self>) {
        let config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let server = Arc::new(
            HealthServer::new(config, self.metrics.clone()).with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(server.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.lock().await.push(handle);
        info!(
            "Health endpoints starting on port {}",
            self.config.service.health_port
        );
    }

    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("AMQP disabled, not consuming requests");
            return Ok(());
        };

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open consumer channel: {}", e),
                })?;

        let queue = self.config.amqp.queue_name.clone();
        let args = QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;
        debug!("Queue '{}' declared", queue);

        let handler: Arc<dyn MessageHandler> = Arc::new(self.engine.clone());
        let consumer = RequestConsumer::new(handler, channel).with_metrics(self.metrics.clone());
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming requests: {}", e),
            })?;

        *self.request_consumer.lock().await = Some(consumer);
        info!("Listening for gateway requests on '{}'", queue);
        Ok(())
    }

    async fn start_background_tasks(&self) {
        let stats_task = {
            let engine = self.engine.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(30));
                while *is_running.read().await {
                    interval.tick().await;
                    match engine.stats().await {
                        Ok(stats) => debug!(
                            "Engine stats - pending: {}, active: {}, waiting: {}",
                            stats.pending_matches,
                            stats.active_matches,
                            stats.registry.players_waiting
                        ),
                        Err(e) => warn!("Failed to refresh engine stats: {}", e),
                    }
                }
            })
        };

        let health_task = {
            let metrics = self.metrics.clone();
            let is_running = self.is_running.clone();
            let amqp = self.amqp_connection.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                let started = Instant::now();
                while *is_running.read().await {
                    interval.tick().await;
                    metrics
                        .service()
                        .uptime_seconds
                        .set(started.elapsed().as_secs() as i64);

                    let amqp_healthy = amqp.as_ref().map_or(true, |c| c.is_open());
                    metrics.update_component_health("amqp", amqp_healthy);
                    metrics.update_component_health("engine", true);
                    metrics.update_health_status(if amqp_healthy { 2 } else { 1 });
                }
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(stats_task);
        tasks.push(health_task);
        info!("{} background tasks running", tasks.len());
    }

    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let count = tasks.len();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("Stopped {} background tasks", count);
    }
}
