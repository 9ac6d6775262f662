use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use stepwise_core::config::EngineConfig;

use crate::engine::Engine;
use crate::store::Store;

/// Configuration for the timer worker.
#[derive(Debug, Clone)]
pub struct TimerWorkerConfig {
    /// How often to poll for due calls.
    pub poll_interval: Duration,
}

impl Default for TimerWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&EngineConfig> for TimerWorkerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_interval: config.timer_poll_interval(),
        }
    }
}

/// Polls the store for due scheduled action calls and fires them.
pub struct TimerWorker<S: Store> {
    engine: Arc<Engine<S>>,
    config: TimerWorkerConfig,
}

impl<S: Store> TimerWorker<S> {
    pub fn new(engine: Arc<Engine<S>>, config: TimerWorkerConfig) -> Self {
        Self { engine, config }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);

        tracing::info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.engine.config().timer_batch_size,
            "Timer worker started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Timer worker shutting down");
                    break;
                }
            }
        }
    }

    /// Fire everything due now. Returns how many calls were fired.
    pub async fn tick(&self) -> usize {
        match self.engine.fire_due(self.engine.now()).await {
            Ok(count) => {
                if count > 0 {
                    tracing::debug!(count = count, "Fired scheduled actions");
                }
                count
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to fire scheduled actions");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    #[test]
    fn test_worker_config_default() {
        let config = TimerWorkerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_worker_config_from_engine_config() {
        let engine_config = EngineConfig {
            timer_poll_interval_ms: 250,
            timer_batch_size: 5,
        };
        let config = TimerWorkerConfig::from(&engine_config);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let engine = Arc::new(Engine::in_memory(Registry::with_builtins()));
        let worker = TimerWorker::new(
            engine,
            TimerWorkerConfig {
                poll_interval: Duration::from_millis(10),
            },
        );

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker.run(shutdown))
            .await
            .unwrap();
    }
}
