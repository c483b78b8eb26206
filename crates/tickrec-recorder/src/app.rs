//! Application supervisor.
//!
//! Opens the API connection, runs the session until it is lost, then tears
//! everything down and reconnects with exponential backoff. Authorization
//! always restarts from the beginning on a new connection; resolved account
//! ids and symbol catalogs carry over.

use std::sync::Arc;
use std::time::Duration;
use tickrec_core::EventBus;
use tickrec_persistence::AccountRegistry;
use tickrec_telemetry::{Metrics, StatsReporter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::accounts::AccountArena;
use crate::config::{AppConfig, ReconnectConfig};
use crate::error::{AppError, AppResult};
use crate::manager::{ApiCredentials, ConnectionManager, SessionEnd};

pub struct Application {
    config: AppConfig,
    manager: ConnectionManager,
    events: EventBus,
    shutdown: CancellationToken,
}

impl Application {
    /// Load accounts from the registry and build the manager.
    pub fn new(
        config: AppConfig,
        registry: Arc<dyn AccountRegistry>,
        events: EventBus,
    ) -> AppResult<Self> {
        let accounts = registry.load_accounts()?;
        if accounts.is_empty() {
            return Err(AppError::NoAccounts(config.accounts_dir.clone()));
        }
        info!(count = accounts.len(), "Accounts loaded");

        let manager = ConnectionManager::new(
            ApiCredentials {
                client_id: config.api.client_id.clone(),
                client_secret: config.api.client_secret.clone(),
            },
            config.writer_config(),
            AccountArena::new(accounts)?,
            registry,
            events.clone(),
        );

        Ok(Self {
            config,
            manager,
            events,
            shutdown: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops the application.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(mut self) -> AppResult<()> {
        let stats = self.spawn_stats_task();
        let result = self.supervise().await;

        self.manager.flush_buffers();
        self.shutdown.cancel();
        if let Some(stats) = stats {
            let _ = stats.await;
        }
        info!("Recorder stopped");
        result
    }

    async fn supervise(&mut self) -> AppResult<()> {
        let settings = self.config.connection_settings();
        let mut attempt: u32 = 0;

        loop {
            match self.manager.open_connection(&settings).await {
                Ok(mut inbound) => {
                    attempt = 0;
                    Metrics::api_connected();
                    let end = self.manager.run_session(&mut inbound, &self.shutdown).await;
                    self.manager.close_session().await;
                    Metrics::api_disconnected();

                    if end == SessionEnd::Stopped {
                        info!("Shutdown requested, connection closed");
                        return Ok(());
                    }
                    warn!("API connection lost");
                }
                Err(e) => {
                    error!(error = %e, "Unable to open API connection");
                    self.events
                        .error(format!("Unable to open API connection: {e}"));
                }
            }

            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            attempt += 1;
            let max = self.config.reconnect.max_attempts;
            if max > 0 && attempt > max {
                return Err(AppError::ReconnectExhausted(max));
            }

            Metrics::reconnect();
            let delay = backoff_delay(&self.config.reconnect, attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_stats_task(&self) -> Option<JoinHandle<()>> {
        if self.config.stats_interval_secs == 0 {
            return None;
        }
        let interval = Duration::from_secs(self.config.stats_interval_secs);
        let reporter = StatsReporter::new();
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => reporter.output_summary(),
                }
            }
            reporter.output_summary();
        }))
    }
}

/// Exponential backoff: base * 2^(attempt-1), capped, plus up to 1s jitter.
pub fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = config
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_delay_ms);
    Duration::from_millis(delay + rand_jitter())
}

/// Random jitter (0-1000ms).
fn rand_jitter() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickrec_core::Account;
    use tickrec_persistence::MemoryAccountRegistry;

    fn config() -> AppConfig {
        toml::from_str(
            r#"
accounts_dir = "unused"
stats_interval_secs = 0

[api]
host = "127.0.0.1"
port = 1
client_id = "id"
client_secret = "secret"
connect_timeout_ms = 200

[reconnect]
max_attempts = 2
base_delay_ms = 10
max_delay_ms = 20
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let reconnect = ReconnectConfig {
            max_attempts: 0,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        };

        let first = backoff_delay(&reconnect, 1).as_millis();
        assert!((1_000..2_000).contains(&first));
        let third = backoff_delay(&reconnect, 3).as_millis();
        assert!((4_000..5_000).contains(&third));
        let capped = backoff_delay(&reconnect, 30).as_millis();
        assert!((60_000..61_000).contains(&capped));
    }

    #[test]
    fn test_no_accounts_is_error() {
        let registry = Arc::new(MemoryAccountRegistry::new(vec![]));
        let result = Application::new(config(), registry, EventBus::default());
        assert!(matches!(result, Err(AppError::NoAccounts(_))));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let registry = Arc::new(MemoryAccountRegistry::new(vec![Account::new(
            "tok", "refresh", "/tmp",
        )]));
        let app = Application::new(config(), registry, EventBus::default()).unwrap();

        let result = app.run().await;
        assert!(matches!(result, Err(AppError::ReconnectExhausted(2))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_reconnect_loop() {
        let mut config = config();
        config.reconnect.max_attempts = 0;
        config.reconnect.base_delay_ms = 60_000;
        config.reconnect.max_delay_ms = 60_000;
        let registry = Arc::new(MemoryAccountRegistry::new(vec![Account::new(
            "tok", "refresh", "/tmp",
        )]));
        let app = Application::new(config, registry, EventBus::default()).unwrap();
        let shutdown = app.shutdown_token();

        let handle = tokio::spawn(app.run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
