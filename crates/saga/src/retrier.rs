use std::sync::Arc;
use std::time::Duration;

use domain::OrderRepository;
use ledger::LedgerStore;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::SagaOrchestrator;
use crate::repository::SagaRepository;
use crate::services::{DeliveryService, OrderEventPublisher};

/// Recurring job that re-runs compensation for sagas stuck in
/// `Compensating`.
pub struct CompensationRetrier<L, O, R, D, E>
where
    L: LedgerStore,
    O: OrderRepository,
    R: SagaRepository,
    D: DeliveryService,
    E: OrderEventPublisher,
{
    orchestrator: Arc<SagaOrchestrator<L, O, R, D, E>>,
    every: Duration,
}

impl<L, O, R, D, E> CompensationRetrier<L, O, R, D, E>
where
    L: LedgerStore,
    O: OrderRepository,
    R: SagaRepository,
    D: DeliveryService,
    E: OrderEventPublisher,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<L, O, R, D, E>>, every: Duration) -> Self {
        Self {
            orchestrator,
            every,
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; give in-flight sagas a full period.
        ticker.tick().await;
        tracing::info!(every_secs = self.every.as_secs(), "compensation retrier started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.orchestrator.retry_stalled_compensations().await {
                        tracing::error!(error = %e, "could not list stalled compensations");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("compensation retrier stopped");
    }
}
