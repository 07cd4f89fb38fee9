//! Saga orchestrator for order fulfillment.

use chrono::Utc;
use domain::{Order, OrderRepository, OrderRepositoryExt};
use ledger::{Ledger, LedgerReference, LedgerStore};

use crate::error::{Result, SagaError};
use crate::repository::{SagaRepository, SagaRepositoryExt};
use crate::services::{DeliveryService, OrderEvent, OrderEventPublisher};
use crate::state::{SagaState, SagaStatus, SagaStep};

/// Failed compensation attempts before a saga is parked in
/// `CompensationFailed`.
pub const MAX_COMPENSATION_ATTEMPTS: u32 = 3;

/// Drives the order-fulfillment saga.
///
/// `start_saga` reserves stock and confirms the order, then the saga waits
/// for payment. `complete_saga_after_payment` deducts the reservation,
/// creates the delivery and marks the order paid. Any failure runs
/// [`compensate`](Self::compensate), which undoes completed steps in
/// reverse order.
pub struct SagaOrchestrator<L, O, R, D, E>
where
    L: LedgerStore,
    O: OrderRepository,
    R: SagaRepository,
    D: DeliveryService,
    E: OrderEventPublisher,
{
    ledger: Ledger<L>,
    orders: O,
    sagas: R,
    delivery: D,
    events: E,
}

impl<L, O, R, D, E> SagaOrchestrator<L, O, R, D, E>
where
    L: LedgerStore,
    O: OrderRepository,
    R: SagaRepository,
    D: DeliveryService,
    E: OrderEventPublisher,
{
    pub fn new(ledger: Ledger<L>, orders: O, sagas: R, delivery: D, events: E) -> Self {
        Self {
            ledger,
            orders,
            sagas,
            delivery,
            events,
        }
    }

    pub fn ledger(&self) -> &Ledger<L> {
        &self.ledger
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    /// Starts the saga for a stored order and runs `RESERVE_INVENTORY`.
    ///
    /// Starting twice returns the existing saga without reserving again. On
    /// failure the saga is compensated and the triggering error (for example
    /// `InsufficientStock`) is returned.
    #[tracing::instrument(skip(self, order), fields(order_number = %order.order_number()))]
    pub async fn start_saga(&self, order: &Order) -> Result<SagaState> {
        if let Some(existing) = self.sagas.find_by_order_number(order.order_number()).await? {
            tracing::info!(saga_id = %existing.saga_id(), "saga already started");
            return Ok(existing);
        }
        let order = self.orders.get(order.order_number()).await?;

        let mut saga = SagaState::new(order.id(), order.order_number(), Utc::now());
        match self.sagas.insert(&saga).await {
            Ok(version) => saga.version = version,
            Err(SagaError::DuplicateSaga(_)) => {
                tracing::info!("saga started concurrently");
                return self.sagas.get(order.order_number()).await;
            }
            Err(e) => return Err(e),
        }

        metrics::counter!("saga_started_total").increment(1);
        tracing::info!(saga_id = %saga.saga_id(), "saga started");

        if let Err(e) = self.reserve_and_confirm(&mut saga, order).await {
            tracing::warn!(
                saga_id = %saga.saga_id(),
                step = %saga.current_step(),
                error = %e,
                "saga step failed"
            );
            self.compensate_or_log(&mut saga, &e.to_string()).await;
            return Err(e);
        }

        tracing::info!(saga_id = %saga.saga_id(), "inventory reserved, awaiting payment");
        Ok(saga)
    }

    /// Runs the steps after an approved payment: `DEDUCT_INVENTORY`,
    /// `CREATE_DELIVERY` and `CONFIRM_ORDER`.
    ///
    /// A completed saga is returned as-is. Failures compensate and surface as
    /// [`SagaError::ExecutionFailed`].
    #[tracing::instrument(skip(self))]
    pub async fn complete_saga_after_payment(&self, order_number: &str) -> Result<SagaState> {
        let mut saga = self.sagas.get(order_number).await?;

        match saga.status() {
            SagaStatus::Completed => return Ok(saga),
            SagaStatus::Started if saga.is_step_completed(SagaStep::ProcessPayment) => {
                return Err(SagaError::AlreadyInProgress(order_number.to_string()));
            }
            SagaStatus::Started => {}
            status => {
                return Err(SagaError::InvalidState {
                    saga_id: saga.saga_id().to_string(),
                    status,
                    action: "complete",
                });
            }
        }

        let order = self.orders.get(order_number).await?;

        saga.complete_step(SagaStep::ProcessPayment);
        match self.sagas.persist(&mut saga).await {
            Err(SagaError::VersionConflict { .. }) => {
                return Err(SagaError::AlreadyInProgress(order_number.to_string()));
            }
            other => other?,
        }
        tracing::info!(saga_id = %saga.saga_id(), "payment recorded");

        if let Err(e) = self.finish_after_payment(&mut saga, order).await {
            let step = saga.current_step();
            let reason = e.to_string();
            tracing::warn!(saga_id = %saga.saga_id(), %step, error = %e, "saga step failed");
            self.compensate_or_log(&mut saga, &reason).await;
            return Err(SagaError::ExecutionFailed {
                saga_id: saga.saga_id().to_string(),
                step,
                reason,
            });
        }

        metrics::counter!("saga_completed_total").increment(1);
        Self::record_duration(&saga);
        tracing::info!(saga_id = %saga.saga_id(), "saga completed");
        Ok(saga)
    }

    /// Undoes the saga's completed steps in reverse order and fails it.
    ///
    /// Errors while undoing count as a failed attempt; the saga stays
    /// `Compensating` for a later retry until the attempt ceiling is hit.
    /// Only failures to record the saga itself are returned.
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.saga_id(), order_number = %saga.order_number()))]
    pub async fn compensate(&self, saga: &mut SagaState, reason: &str) -> Result<()> {
        tracing::warn!(reason, "starting compensation");
        saga.start_compensation(reason);
        self.sagas.persist(saga).await?;

        let outcome = match self.orders.find_by_number(saga.order_number()).await {
            Ok(Some(order)) => self.undo_steps(saga, order, reason).await,
            Ok(None) => {
                saga.mark_failed("Order not found during compensation", Utc::now());
                self.sagas.persist(saga).await?;
                metrics::counter!("saga_failed_total").increment(1);
                tracing::warn!("order not found during compensation");
                return Ok(());
            }
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(()) => {
                saga.mark_failed(reason, Utc::now());
                self.sagas.persist(saga).await?;
                metrics::counter!("saga_failed_total").increment(1);
                Self::record_duration(saga);
                tracing::info!("compensation completed");
            }
            Err(e) => {
                let exhausted = saga.record_compensation_failure(
                    e.to_string(),
                    MAX_COMPENSATION_ATTEMPTS,
                    Utc::now(),
                );
                let attempts = saga.compensation_attempts();
                if exhausted {
                    metrics::counter!("saga_compensation_failed_total").increment(1);
                    tracing::error!(
                        attempts,
                        error = %e,
                        "compensation failed, manual intervention required"
                    );
                } else {
                    tracing::warn!(attempts, error = %e, "compensation attempt failed");
                }
                self.sagas.persist(saga).await?;
            }
        }
        Ok(())
    }

    /// Cancels an order whose saga is still waiting for payment.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_number: &str, reason: &str) -> Result<SagaState> {
        let mut saga = self.sagas.get(order_number).await?;

        match saga.status() {
            SagaStatus::Started if saga.is_step_completed(SagaStep::ProcessPayment) => {
                return Err(SagaError::AlreadyInProgress(order_number.to_string()));
            }
            SagaStatus::Started => {}
            SagaStatus::Compensating => {
                return Err(SagaError::AlreadyInProgress(order_number.to_string()));
            }
            status => {
                return Err(SagaError::InvalidState {
                    saga_id: saga.saga_id().to_string(),
                    status,
                    action: "cancel",
                });
            }
        }

        match self.compensate(&mut saga, reason).await {
            Err(SagaError::VersionConflict { .. }) => {
                Err(SagaError::AlreadyInProgress(order_number.to_string()))
            }
            Err(e) => Err(e),
            Ok(()) => Ok(saga),
        }
    }

    /// Re-runs compensation for every saga still `Compensating`.
    ///
    /// Returns how many sagas were retried. Per-saga failures are logged.
    #[tracing::instrument(skip(self))]
    pub async fn retry_stalled_compensations(&self) -> Result<usize> {
        let stalled = self.sagas.find_by_status(SagaStatus::Compensating).await?;
        let mut retried = 0;

        for mut saga in stalled {
            let reason = saga
                .last_error_message()
                .unwrap_or("compensation retry")
                .to_string();
            match self.compensate(&mut saga, &reason).await {
                Ok(()) => retried += 1,
                Err(e) => {
                    tracing::error!(saga_id = %saga.saga_id(), error = %e, "compensation retry failed");
                }
            }
        }

        if retried > 0 {
            tracing::info!(retried, "stalled compensations retried");
        }
        Ok(retried)
    }

    pub async fn get_saga(&self, order_number: &str) -> Result<SagaState> {
        self.sagas.get(order_number).await
    }

    async fn reserve_and_confirm(&self, saga: &mut SagaState, mut order: Order) -> Result<()> {
        tracing::debug!(saga_id = %saga.saga_id(), step = %SagaStep::ReserveInventory, "executing step");
        let reference = LedgerReference::order(order.order_number(), order.requester_id().clone());
        self.ledger
            .reserve_batch(&order.ledger_lines(), &reference)
            .await?;
        saga.complete_step(SagaStep::ReserveInventory);
        self.sagas.persist(saga).await?;

        order.confirm()?;
        self.orders.save(&order).await?;
        self.publish(OrderEvent::created(&order)).await;
        Ok(())
    }

    async fn finish_after_payment(&self, saga: &mut SagaState, mut order: Order) -> Result<()> {
        tracing::debug!(saga_id = %saga.saga_id(), step = %SagaStep::DeductInventory, "executing step");
        let reference = LedgerReference::order(order.order_number(), order.requester_id().clone());
        self.ledger
            .deduct_batch(&order.ledger_lines(), &reference)
            .await?;
        saga.complete_step(SagaStep::DeductInventory);
        self.sagas.persist(saga).await?;

        tracing::debug!(saga_id = %saga.saga_id(), step = %SagaStep::CreateDelivery, "executing step");
        let delivery_id = self.delivery.create_delivery(&order).await?;
        saga.record_delivery(delivery_id);
        self.sagas.persist(saga).await?;

        tracing::debug!(saga_id = %saga.saga_id(), step = %SagaStep::ConfirmOrder, "executing step");
        order.mark_paid()?;
        self.orders.save(&order).await?;
        saga.complete_step(SagaStep::ConfirmOrder);
        saga.mark_completed(Utc::now());
        self.sagas.persist(saga).await?;
        Ok(())
    }

    async fn undo_steps(&self, saga: &SagaState, mut order: Order, reason: &str) -> Result<()> {
        if saga.is_step_completed(SagaStep::CreateDelivery) {
            if let Some(delivery_id) = saga.delivery_id() {
                self.delivery.cancel_delivery(delivery_id).await?;
                tracing::info!(delivery_id, "delivery cancelled");
            }
        }

        if saga.is_step_completed(SagaStep::DeductInventory) {
            tracing::warn!("deducted inventory cannot be restored automatically");
        }

        if saga.is_step_completed(SagaStep::ReserveInventory) {
            let reference = LedgerReference::order_cancel(order.order_number());
            self.ledger
                .release_batch(&order.ledger_lines(), &reference)
                .await?;
            tracing::info!("reservation released");
        }

        if order.status().is_cancellable() {
            let cancel_reason = format!("Saga compensation: {reason}");
            order.cancel(cancel_reason.as_str())?;
            self.orders.save(&order).await?;
            self.publish(OrderEvent::cancelled(&order, cancel_reason)).await;
        }
        Ok(())
    }

    async fn compensate_or_log(&self, saga: &mut SagaState, reason: &str) {
        if let Err(e) = self.compensate(saga, reason).await {
            tracing::error!(saga_id = %saga.saga_id(), error = %e, "could not record compensation");
        }
    }

    async fn publish(&self, event: OrderEvent) {
        let event_type = event.event_type();
        let order_number = event.order_number().to_string();
        if let Err(e) = self.events.publish(event).await {
            tracing::warn!(%order_number, event_type, error = %e, "order event not published");
        }
    }

    fn record_duration(saga: &SagaState) {
        let elapsed = (Utc::now() - saga.started_at())
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(elapsed);
    }
}
