use anyhow::Result;
use async_trait::async_trait;
use flume::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::ActivityLog;
use crate::config::settings::AuditConfig;

/// Destination for flushed batches.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn insert_batch(&self, logs: &[ActivityLog]) -> Result<usize>;
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before dropping)
    pub queue_capacity: usize,

    /// Batch size for sink inserts
    pub batch_size: usize,

    /// Max wait time before flushing a partial batch (milliseconds)
    pub batch_timeout_ms: u64,

    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_000,
            batch_size: 50,
            batch_timeout_ms: 500,
            worker_count: 1,
        }
    }
}

impl From<&AuditConfig> for LoggerConfig {
    fn from(cfg: &AuditConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity.max(1),
            batch_size: cfg.batch_size.max(1),
            batch_timeout_ms: cfg.batch_timeout_ms,
            worker_count: cfg.worker_count.max(1),
        }
    }
}

/// Async activity logger with queue mechanism
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Option<Sender<ActivityLog>>,
}

impl ActivityLogger {
    /// Initialize logger with background workers. Must be called inside a
    /// tokio runtime.
    pub fn new(sink: Arc<dyn ActivitySink>, config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let sink = sink.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, sink, receiver, config).await;
            });
        }

        Self {
            sender: Some(sender),
        }
    }

    /// A logger that discards everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    async fn worker_loop(
        worker_id: usize,
        sink: Arc<dyn ActivitySink>,
        receiver: Receiver<ActivityLog>,
        config: LoggerConfig,
    ) {
        debug!("Activity logger worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            // block for the first entry so an idle logger does not spin
            match receiver.recv_async().await {
                Ok(log) => batch.push(log),
                Err(_) => {
                    debug!("Activity logger worker {} shutting down", worker_id);
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + batch_timeout;
            let mut closed = false;
            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            Self::flush_batch(sink.as_ref(), &batch, worker_id).await;
            batch.clear();

            if closed {
                debug!("Activity logger worker {} shutting down (channel closed)", worker_id);
                return;
            }
        }
    }

    async fn flush_batch(sink: &dyn ActivitySink, batch: &[ActivityLog], worker_id: usize) {
        let start = std::time::Instant::now();

        match sink.insert_batch(batch).await {
            Ok(inserted) => {
                debug!(
                    "Worker {} inserted {} activity logs in {:?}",
                    worker_id,
                    inserted,
                    start.elapsed()
                );
            }
            Err(e) => {
                error!(
                    "Worker {} failed to insert {} activity logs: {:#}",
                    worker_id,
                    batch.len(),
                    e
                );
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::types::ActivityType;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<ActivityLog>>>,
    }

    #[async_trait]
    impl ActivitySink for RecordingSink {
        async fn insert_batch(&self, logs: &[ActivityLog]) -> Result<usize> {
            self.batches.lock().push(logs.to_vec());
            Ok(logs.len())
        }
    }

    #[tokio::test]
    async fn test_entries_are_flushed_in_batches() {
        let sink = Arc::new(RecordingSink::default());
        let logger = ActivityLogger::new(
            sink.clone(),
            LoggerConfig {
                queue_capacity: 16,
                batch_size: 2,
                batch_timeout_ms: 20,
                worker_count: 1,
            },
        );

        for _ in 0..3 {
            logger.log(ActivityLog::builder(ActivityType::Login).build());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let batches = sink.batches.lock();
        let total: usize = batches.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
        assert!(batches.iter().all(|b| b.len() <= 2));
    }

    #[test]
    fn test_disabled_logger_discards() {
        let logger = ActivityLogger::disabled();
        logger.log(ActivityLog::builder(ActivityType::Login).build());
        assert_eq!(logger.queue_len(), 0);
    }
}
