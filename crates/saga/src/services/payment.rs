//! Payment gateway trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Answer from the payment gateway for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Approved { payment_id: String },
    Declined { reason: String },
}

/// Trait for payment processing.
///
/// A decline is a normal outcome, not an error. Errors mean the gateway
/// could not give an answer.
///
/// The order number is the idempotency key: a second approval request for an
/// order already charged returns the original `payment_id` and charges
/// nothing. Callers racing on the same order therefore charge it once.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` for the order, once per order number.
    async fn process(&self, order_number: &str, amount: Money) -> Result<PaymentOutcome>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (String, Money)>,
    /// order number -> payment id
    charged: HashMap<String, String>,
    next_id: u32,
    decline: bool,
    fail_on_process: bool,
}

/// In-memory payment gateway for testing and the demo server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory payment gateway.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the gateway to decline every charge.
    pub fn set_decline(&self, decline: bool) {
        self.state().decline = decline;
    }

    /// Configures the gateway to fail without an answer.
    pub fn set_fail_on_process(&self, fail: bool) {
        self.state().fail_on_process = fail;
    }

    /// Returns the number of approved payments.
    pub fn payment_count(&self) -> usize {
        self.state().payments.len()
    }

    /// Returns true if a payment exists with the given ID.
    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.state().payments.contains_key(payment_id)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn process(&self, order_number: &str, amount: Money) -> Result<PaymentOutcome> {
        let mut state = self.state();

        if state.fail_on_process {
            return Err(SagaError::PaymentService(
                "Payment gateway unavailable".to_string(),
            ));
        }
        if let Some(payment_id) = state.charged.get(order_number) {
            tracing::debug!(order_number, %payment_id, "order already charged");
            return Ok(PaymentOutcome::Approved {
                payment_id: payment_id.clone(),
            });
        }
        if state.decline {
            return Ok(PaymentOutcome::Declined {
                reason: "Payment declined".to_string(),
            });
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(payment_id.clone(), (order_number.to_string(), amount));
        state
            .charged
            .insert(order_number.to_string(), payment_id.clone());

        Ok(PaymentOutcome::Approved { payment_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_approved_payment() {
        let gateway = InMemoryPaymentGateway::new();

        let outcome = gateway
            .process("ORD-1", Money::from_cents(5000))
            .await
            .unwrap();
        let PaymentOutcome::Approved { payment_id } = outcome else {
            panic!("expected approval");
        };
        assert!(payment_id.starts_with("PAY-"));
        assert_eq!(gateway.payment_count(), 1);
        assert!(gateway.has_payment(&payment_id));
    }

    #[tokio::test]
    async fn test_decline_and_failure() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_decline(true);

        let outcome = gateway.process("ORD-1", Money::from_cents(5000)).await;
        assert!(matches!(outcome, Ok(PaymentOutcome::Declined { .. })));

        gateway.set_fail_on_process(true);
        let outcome = gateway.process("ORD-1", Money::from_cents(5000)).await;
        assert!(matches!(outcome, Err(SagaError::PaymentService(_))));
        assert_eq!(gateway.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_sequential_payment_ids() {
        let gateway = InMemoryPaymentGateway::new();
        let amount = Money::from_cents(1000);

        let r1 = gateway.process("ORD-1", amount).await.unwrap();
        let r2 = gateway.process("ORD-2", amount).await.unwrap();

        assert_eq!(
            r1,
            PaymentOutcome::Approved {
                payment_id: "PAY-0001".to_string()
            }
        );
        assert_eq!(
            r2,
            PaymentOutcome::Approved {
                payment_id: "PAY-0002".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_charges_for_one_order() {
        let gateway = InMemoryPaymentGateway::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let gateway = gateway.clone();
            handles.push(tokio::spawn(async move {
                gateway.process("ORD-1", Money::from_cents(5000)).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                PaymentOutcome::Approved { payment_id } => ids.push(payment_id),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        ids.dedup();
        assert_eq!(ids, vec!["PAY-0001".to_string()]);
        assert_eq!(gateway.payment_count(), 1);

        // The original charge stands even if the gateway would now decline.
        gateway.set_decline(true);
        assert_eq!(
            gateway
                .process("ORD-1", Money::from_cents(5000))
                .await
                .unwrap(),
            PaymentOutcome::Approved {
                payment_id: "PAY-0001".to_string()
            }
        );
    }
}
