use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::store::QueueStore;
use crate::{AdmissionQueue, QueueKey};

/// Outcome of one sweep over the active queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Queues whose interval had elapsed.
    pub processed: usize,
    pub promoted: usize,
    pub failures: usize,
}

/// Recurring job that promotes waiting entries.
///
/// Every tick it lists the active queues and runs
/// [`AdmissionQueue::process_entries`] for each queue whose own
/// `entry_interval` has elapsed since its last successful promotion. Queues
/// are processed concurrently and a failing queue never holds up the others.
pub struct PromotionSweeper<S: QueueStore> {
    queue: Arc<AdmissionQueue<S>>,
    tick: Duration,
    last_run: HashMap<QueueKey, Instant>,
}

impl<S: QueueStore> PromotionSweeper<S> {
    pub fn new(queue: Arc<AdmissionQueue<S>>, tick: Duration) -> Self {
        Self {
            queue,
            tick,
            last_run: HashMap::new(),
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "promotion sweeper started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("promotion sweeper stopped");
    }

    pub async fn sweep_once(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        let queues = match self.queue.active_queues().await {
            Ok(queues) => queues,
            Err(e) => {
                tracing::error!(error = %e, "failed to list active queues");
                metrics::counter!("queue_sweep_failures_total").increment(1);
                report.failures += 1;
                return report;
            }
        };

        self.last_run
            .retain(|key, _| queues.iter().any(|queue| &queue.key == key));

        let due: Vec<QueueKey> = queues
            .into_iter()
            .filter(|queue| {
                self.last_run
                    .get(&queue.key)
                    .is_none_or(|last| now.duration_since(*last) >= queue.config.entry_interval())
            })
            .map(|queue| queue.key)
            .collect();

        let results = join_all(due.iter().map(|key| self.queue.process_entries(key))).await;

        for (key, result) in due.into_iter().zip(results) {
            report.processed += 1;
            match result {
                Ok(promoted) => {
                    report.promoted += promoted.len();
                    self.last_run.insert(key, now);
                }
                Err(e) => {
                    tracing::error!(queue = %key, error = %e, "queue promotion failed");
                    metrics::counter!("queue_sweep_failures_total").increment(1);
                    report.failures += 1;
                }
            }
        }

        report
    }
}
