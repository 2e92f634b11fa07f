//! Stage worker.
//!
//! Drives one stage: receive a batch, hand it to the stage's [`BatchHandler`],
//! settle the partial batch response, repeat. A batch interrupted by shutdown is
//! never settled and comes back through redelivery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::QueueError;
use crate::interfaces::{BatchHandler, MessageQueue};
use crate::policy::Stage;

/// Interval between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for a stage worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of messages handed to the handler at once.
    pub batch_size: usize,
    /// Maximum time spent gathering one batch.
    pub batch_window: Duration,
    /// Minimum time between two progress log lines.
    pub progress_interval: Duration,
}

impl WorkerConfig {
    /// Defaults of the given stage: 10 requests per generation batch; up to 1000
    /// items gathered for at most 60 seconds per load batch.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Generation => Self {
                batch_size: 10,
                batch_window: Duration::from_secs(5),
                progress_interval: PROGRESS_INTERVAL,
            },
            Stage::Load => Self {
                batch_size: 1000,
                batch_window: Duration::from_secs(60),
                progress_interval: PROGRESS_INTERVAL,
            },
        }
    }
}

/// Counters of a running worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: u64,
    pub messages: u64,
    pub failures: u64,
}

/// Loop driving one stage against a queue.
pub struct StageWorker {
    stage: Stage,
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn BatchHandler>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    total_batches: AtomicU64,
    total_messages: AtomicU64,
    total_failures: AtomicU64,
}

impl StageWorker {
    pub fn new(
        stage: Stage,
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn BatchHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            stage,
            queue,
            handler,
            config,
            shutdown_tx,
            total_batches: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            batches: self.total_batches.load(Ordering::Relaxed),
            messages: self.total_messages.load(Ordering::Relaxed),
            failures: self.total_failures.load(Ordering::Relaxed),
        }
    }

    /// Run until Ctrl-C, [`StageWorker::shutdown`] or a receive error.
    #[instrument(skip(self), fields(stage = %self.stage))]
    pub async fn run(&self) -> Result<(), QueueError> {
        info!(
            batch_size = self.config.batch_size,
            batch_window_secs = self.config.batch_window.as_secs(),
            visibility_timeout_secs = self.queue.policy().visibility_timeout.as_secs(),
            max_receive_count = self.queue.policy().max_receive_count,
            "Starting stage worker"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut prev = self.stats();
        let mut prev_time = Instant::now();

        loop {
            if *shutdown_rx.borrow() {
                info!("Received shutdown request");
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Received shutdown request");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
                result = self.run_once() => {
                    result?;
                }
            }

            let elapsed = prev_time.elapsed();
            if elapsed >= self.config.progress_interval {
                let current = self.stats();
                let elapsed_secs = elapsed.as_secs_f64();
                let messages_per_sec =
                    current.messages.saturating_sub(prev.messages) as f64 / elapsed_secs;
                let failures_per_sec =
                    current.failures.saturating_sub(prev.failures) as f64 / elapsed_secs;

                info!(
                    batches = current.batches,
                    messages_processed = current.messages,
                    messages_failed = current.failures,
                    messages_per_sec = format!("{:.2}", messages_per_sec),
                    failures_per_sec = format!("{:.2}", failures_per_sec),
                    "Processing progress"
                );

                prev = current;
                prev_time = Instant::now();
            }
        }

        let stats = self.stats();
        info!(
            total_batches = stats.batches,
            total_messages_processed = stats.messages,
            total_messages_failed = stats.failures,
            "Stage worker shutdown complete"
        );
        Ok(())
    }

    /// Receive, handle and settle a single batch. Returns the batch size.
    ///
    /// Settlement errors are logged rather than returned: unsettled messages are
    /// redelivered by the queue.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let batch = self
            .queue
            .receive(self.config.batch_size, self.config.batch_window)
            .await?;

        if batch.is_empty() {
            debug!("No messages received");
            return Ok(0);
        }

        let response = self.handler.handle(&batch).await;
        let failed = response.failure_count();

        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_messages
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.total_failures
            .fetch_add(failed as u64, Ordering::Relaxed);

        if failed > 0 {
            warn!(
                batch_size = batch.len(),
                failed = failed,
                "Batch completed with failures"
            );
        } else {
            info!(batch_size = batch.len(), "Batch completed");
        }

        if let Err(e) = self.queue.settle(&batch, &response).await {
            error!(error = %e, batch_size = batch.len(), "Failed to settle batch");
        }

        Ok(batch.len())
    }

    /// Ask a running worker to stop after its current batch step.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryQueue;
    use crate::message::{BatchResponse, QueueMessage};
    use crate::policy::RetryPolicy;
    use async_trait::async_trait;

    /// Fails every message whose body is `bad`.
    struct RejectBad;

    #[async_trait]
    impl BatchHandler for RejectBad {
        async fn handle(&self, batch: &[QueueMessage]) -> BatchResponse {
            BatchResponse::from_failures(
                batch
                    .iter()
                    .filter(|message| message.body == b"bad")
                    .map(|message| message.message_id.clone()),
            )
        }
    }

    fn worker(queue: Arc<InMemoryQueue>) -> StageWorker {
        let config = WorkerConfig {
            batch_size: 10,
            batch_window: Duration::from_millis(100),
            progress_interval: PROGRESS_INTERVAL,
        };
        StageWorker::new(Stage::Load, queue, Arc::new(RejectBad), config)
    }

    #[test]
    fn test_stage_defaults() {
        assert_eq!(WorkerConfig::for_stage(Stage::Generation).batch_size, 10);
        let load = WorkerConfig::for_stage(Stage::Load);
        assert_eq!(load.batch_size, 1000);
        assert_eq!(load.batch_window, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_settles_batch() {
        let queue = Arc::new(InMemoryQueue::new(RetryPolicy::for_stage(Stage::Load)));
        queue.send(b"good".to_vec()).await;
        let bad = queue.send(b"bad".to_vec()).await;
        let worker = worker(Arc::clone(&queue));

        assert_eq!(worker.run_once().await.unwrap(), 2);
        assert_eq!(
            worker.stats(),
            WorkerStats {
                batches: 1,
                messages: 2,
                failures: 1
            }
        );

        // Only the failed message is left, visible again
        assert_eq!(queue.len().await, 1);
        let redelivered = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(redelivered[0].message_id, bad);
        assert_eq!(redelivered[0].receive_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poison_message_reaches_dead_letter() {
        let queue = Arc::new(InMemoryQueue::new(RetryPolicy::for_stage(Stage::Load)));
        queue.send(b"bad".to_vec()).await;
        let worker = worker(Arc::clone(&queue));

        for _ in 0..5 {
            assert_eq!(worker.run_once().await.unwrap(), 1);
        }
        assert_eq!(worker.run_once().await.unwrap(), 0);

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, b"bad");
        assert_eq!(worker.stats().failures, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_is_noop() {
        let queue = Arc::new(InMemoryQueue::new(RetryPolicy::for_stage(Stage::Load)));
        let worker = worker(queue);

        assert_eq!(worker.run_once().await.unwrap(), 0);
        assert_eq!(worker.stats(), WorkerStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new(RetryPolicy::for_stage(Stage::Load)));
        queue.send(b"good".to_vec()).await;
        let worker = Arc::new(worker(Arc::clone(&queue)));

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.run().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();

        assert_eq!(worker.stats().messages, 1);
        assert!(queue.is_empty().await);
    }
}
