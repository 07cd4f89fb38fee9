//! Saga state machine.

use chrono::{DateTime, Utc};
use common::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Forward steps of the order-fulfillment saga, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    ReserveInventory,
    ProcessPayment,
    DeductInventory,
    CreateDelivery,
    ConfirmOrder,
}

impl SagaStep {
    pub const ALL: [SagaStep; 5] = [
        SagaStep::ReserveInventory,
        SagaStep::ProcessPayment,
        SagaStep::DeductInventory,
        SagaStep::CreateDelivery,
        SagaStep::ConfirmOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::ReserveInventory => "RESERVE_INVENTORY",
            SagaStep::ProcessPayment => "PROCESS_PAYMENT",
            SagaStep::DeductInventory => "DEDUCT_INVENTORY",
            SagaStep::CreateDelivery => "CREATE_DELIVERY",
            SagaStep::ConfirmOrder => "CONFIRM_ORDER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == s)
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall status of a saga.
///
/// State transitions:
/// ```text
/// Started ──┬──► Completed
///           └──► Compensating ──┬──► Failed
///                  │   ▲        └──► CompensationFailed
///                  └───┘ (retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    #[default]
    Started,
    Completed,
    /// A step failed and previously applied steps are being undone.
    Compensating,
    /// Compensation finished (terminal state).
    Failed,
    /// Compensation gave up after repeated failures. Needs an operator.
    CompensationFailed,
}

impl SagaStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::CompensationFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Failed => "FAILED",
            SagaStatus::CompensationFailed => "COMPENSATION_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "STARTED" => Some(SagaStatus::Started),
            "COMPLETED" => Some(SagaStatus::Completed),
            "COMPENSATING" => Some(SagaStatus::Compensating),
            "FAILED" => Some(SagaStatus::Failed),
            "COMPENSATION_FAILED" => Some(SagaStatus::CompensationFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted progress of one order's fulfillment saga.
///
/// `completed_steps` is append-only and `current_step` is always the first
/// step not yet completed (it stays on `ConfirmOrder` once every step is).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaState {
    pub(crate) saga_id: String,
    pub(crate) order_id: Uuid,
    pub(crate) order_number: String,
    pub(crate) current_step: SagaStep,
    pub(crate) status: SagaStatus,
    pub(crate) completed_steps: Vec<SagaStep>,
    pub(crate) delivery_id: Option<String>,
    pub(crate) compensation_attempts: u32,
    pub(crate) last_error_message: Option<String>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) version: Version,
}

/// Builds a saga id: `SAGA-` followed by 8 upper-case hex characters.
pub fn generate_saga_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("SAGA-{}", hex[..8].to_uppercase())
}

impl SagaState {
    /// Creates an unsaved saga at the first step.
    pub fn new(order_id: Uuid, order_number: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            saga_id: generate_saga_id(),
            order_id,
            order_number: order_number.into(),
            current_step: SagaStep::ReserveInventory,
            status: SagaStatus::Started,
            completed_steps: Vec::new(),
            delivery_id: None,
            compensation_attempts: 0,
            last_error_message: None,
            started_at: now,
            completed_at: None,
            version: Version::initial(),
        }
    }

    pub fn saga_id(&self) -> &str {
        &self.saga_id
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn current_step(&self) -> SagaStep {
        self.current_step
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn completed_steps(&self) -> &[SagaStep] {
        &self.completed_steps
    }

    pub fn delivery_id(&self) -> Option<&str> {
        self.delivery_id.as_deref()
    }

    pub fn compensation_attempts(&self) -> u32 {
        self.compensation_attempts
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_step_completed(&self, step: SagaStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Records a finished step and moves `current_step` forward.
    pub fn complete_step(&mut self, step: SagaStep) {
        if !self.is_step_completed(step) {
            self.completed_steps.push(step);
        }
        self.current_step = SagaStep::ALL
            .into_iter()
            .find(|s| !self.is_step_completed(*s))
            .unwrap_or(SagaStep::ConfirmOrder);
    }

    pub fn record_delivery(&mut self, delivery_id: impl Into<String>) {
        self.delivery_id = Some(delivery_id.into());
        self.complete_step(SagaStep::CreateDelivery);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = SagaStatus::Completed;
        self.completed_at = Some(now);
    }

    pub fn start_compensation(&mut self, reason: impl Into<String>) {
        self.status = SagaStatus::Compensating;
        self.last_error_message = Some(reason.into());
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = SagaStatus::Failed;
        self.last_error_message = Some(reason.into());
        self.completed_at = Some(now);
    }

    /// Counts a failed compensation attempt. Once `max_attempts` is reached
    /// the saga moves to `CompensationFailed` and this returns true.
    pub fn record_compensation_failure(
        &mut self,
        reason: impl Into<String>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> bool {
        self.compensation_attempts = self.compensation_attempts.saturating_add(1);
        if self.compensation_attempts < max_attempts {
            return false;
        }
        self.status = SagaStatus::CompensationFailed;
        self.last_error_message = Some(reason.into());
        self.completed_at = Some(now);
        true
    }

    /// Comma-separated form used by the persisted row.
    pub fn encode_steps(&self) -> String {
        self.completed_steps
            .iter()
            .map(SagaStep::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses the comma-separated form. An empty string has no steps.
    pub fn decode_steps(encoded: &str) -> Option<Vec<SagaStep>> {
        encoded
            .split(',')
            .filter(|s| !s.is_empty())
            .map(SagaStep::parse)
            .collect()
    }
}
