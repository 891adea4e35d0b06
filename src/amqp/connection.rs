//! AMQP connection management with retry logic

use crate::config::AmqpSettings;
use crate::error::{MatchmakingError, Result};
use amqprs::channel::Channel;
use amqprs::connection::{Connection, OpenConnectionArguments};
use anyhow::Context;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Wrapper around an AMQP connection opened with exponential backoff
pub struct AmqpConnection {
    connection: Connection,
}

impl AmqpConnection {
    /// Connect to the broker named by `settings.url`
    pub async fn connect(settings: &AmqpSettings) -> Result<Self> {
        let args = OpenConnectionArguments::try_from(settings.url.as_str()).map_err(|e| {
            MatchmakingError::ConfigurationError {
                message: format!("Invalid AMQP URL: {}", e),
            }
        })?;

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(settings.retry_delay_ms);
        let timeout = Duration::from_secs(settings.connection_timeout_seconds);

        loop {
            let attempt = tokio::time::timeout(timeout, Connection::open(&args)).await;
            let failure = match attempt {
                Ok(Ok(connection)) => {
                    info!("Connected to AMQP broker");
                    return Ok(Self { connection });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", timeout),
            };

            retry_count += 1;
            if retry_count > settings.max_retry_attempts {
                error!(
                    "Failed to connect to AMQP after {} retries",
                    settings.max_retry_attempts
                );
                return Err(MatchmakingError::AmqpConnectionFailed {
                    message: format!("Max retries exceeded: {}", failure),
                }
                .into());
            }

            warn!(
                "AMQP connection attempt {} failed: {}. Retrying in {:?}",
                retry_count, failure, delay
            );
            sleep(delay).await;
            delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(30000));
        }
    }

    /// Open a fresh channel on the connection
    pub async fn open_channel(&self) -> Result<Channel> {
        self.connection.open_channel(None).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to open channel: {}", e),
            }
            .into()
        })
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub async fn close(self) -> Result<()> {
        self.connection
            .close()
            .await
            .context("Failed to close AMQP connection")
    }
}
