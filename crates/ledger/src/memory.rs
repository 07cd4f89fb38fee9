use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::record::plan_batch;
use crate::store::{LedgerLines, LedgerStore};
use crate::{
    LedgerError, LedgerOp, LedgerRecord, LedgerReference, ResourceId, Result, StockMovement,
};

#[derive(Debug, Default)]
struct InMemoryLedgerState {
    records: BTreeMap<ResourceId, LedgerRecord>,
    holds: HashMap<(String, ResourceId), u32>,
    movements: Vec<StockMovement>,
}

#[derive(Debug, Default)]
struct FailureToggles {
    reserve: AtomicBool,
    deduct: AtomicBool,
    release: AtomicBool,
}

/// In-memory ledger store for tests and single-process deployments.
///
/// One mutex guards every record, so a batch is trivially atomic.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<InMemoryLedgerState>>,
    fail: Arc<FailureToggles>,
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures reserve calls to fail as if the store were unreachable.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.fail.reserve.store(fail, Ordering::SeqCst);
    }

    /// Configures deduct calls to fail as if the store were unreachable.
    pub fn set_fail_on_deduct(&self, fail: bool) {
        self.fail.deduct.store(fail, Ordering::SeqCst);
    }

    /// Configures release calls to fail as if the store were unreachable.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.fail.release.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of records.
    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    fn injected_failure(&self, op: LedgerOp) -> Option<LedgerError> {
        let toggle = match op {
            LedgerOp::Reserve => &self.fail.reserve,
            LedgerOp::Deduct => &self.fail.deduct,
            LedgerOp::Release => &self.fail.release,
            LedgerOp::AddStock => return None,
        };
        toggle
            .load(Ordering::SeqCst)
            .then(|| LedgerError::Unavailable(format!("{op} rejected by test toggle")))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn initialize(&self, resource_id: &ResourceId, quantity: u32) -> Result<LedgerRecord> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(resource_id) {
            return Err(LedgerError::ResourceAlreadyExists(resource_id.clone()));
        }

        let record = LedgerRecord::new(resource_id.clone(), quantity);
        state.movements.push(StockMovement::initial(&record));
        state.records.insert(resource_id.clone(), record.clone());
        Ok(record)
    }

    async fn apply(
        &self,
        op: LedgerOp,
        lines: &LedgerLines,
        reference: Option<&LedgerReference>,
    ) -> Result<Vec<LedgerRecord>> {
        if let Some(err) = self.injected_failure(op) {
            return Err(err);
        }

        let mut state = self.state.lock().await;

        let holds: HashMap<ResourceId, u32> = match reference {
            Some(reference) => lines
                .keys()
                .filter_map(|id| {
                    state
                        .holds
                        .get(&(reference.source_id.clone(), id.clone()))
                        .map(|held| (id.clone(), *held))
                })
                .collect(),
            None => HashMap::new(),
        };

        let outcome = plan_batch(op, lines, &state.records, &holds, reference)?;

        for record in &outcome.records {
            state
                .records
                .insert(record.resource_id().clone(), record.clone());
        }
        if let Some(reference) = reference {
            for (resource_id, held) in outcome.holds {
                let key = (reference.source_id.clone(), resource_id);
                if held == 0 {
                    state.holds.remove(&key);
                } else {
                    state.holds.insert(key, held);
                }
            }
        }
        state.movements.extend(outcome.movements);

        Ok(outcome.records)
    }

    async fn get(&self, resource_id: &ResourceId) -> Result<Option<LedgerRecord>> {
        Ok(self.state.lock().await.records.get(resource_id).cloned())
    }

    async fn held(&self, source_id: &str, resource_id: &ResourceId) -> Result<u32> {
        let state = self.state.lock().await;
        Ok(state
            .holds
            .get(&(source_id.to_string(), resource_id.clone()))
            .copied()
            .unwrap_or(0))
    }

    async fn movements(&self, resource_id: &ResourceId) -> Result<Vec<StockMovement>> {
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| &m.resource_id == resource_id)
            .cloned()
            .collect())
    }
}
