use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::Version;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::state::{SagaState, SagaStatus};

/// Durable storage for saga states, keyed by order number.
///
/// Saves are optimistic: a save only succeeds if the stored version still
/// equals the version the caller loaded.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Stores a new saga and returns its first version.
    ///
    /// Fails with `DuplicateSaga` if the order already has one.
    async fn insert(&self, saga: &SagaState) -> Result<Version>;

    /// Overwrites a saga whose stored version equals `saga.version()` and
    /// returns the new version.
    async fn save(&self, saga: &SagaState) -> Result<Version>;

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>>;

    /// Sagas in `status`, oldest first.
    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>>;
}

/// Extension trait for SagaRepository with convenience methods.
#[async_trait]
pub trait SagaRepositoryExt: SagaRepository {
    /// Like `find_by_order_number`, but a missing saga is an error.
    async fn get(&self, order_number: &str) -> Result<SagaState> {
        self.find_by_order_number(order_number)
            .await?
            .ok_or_else(|| SagaError::SagaNotFound(order_number.to_string()))
    }

    /// Saves and bumps the caller's copy to the stored version.
    async fn persist(&self, saga: &mut SagaState) -> Result<()> {
        saga.version = self.save(saga).await?;
        Ok(())
    }
}

// Blanket implementation for all SagaRepository implementations
impl<T: SagaRepository + ?Sized> SagaRepositoryExt for T {}

#[async_trait]
impl<T: SagaRepository + ?Sized> SagaRepository for Arc<T> {
    async fn insert(&self, saga: &SagaState) -> Result<Version> {
        (**self).insert(saga).await
    }

    async fn save(&self, saga: &SagaState) -> Result<Version> {
        (**self).save(saga).await
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>> {
        (**self).find_by_order_number(order_number).await
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        (**self).find_by_status(status).await
    }
}

/// In-memory saga repository for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaRepository {
    sagas: Arc<RwLock<HashMap<String, SagaState>>>,
    fail_on_save: Arc<AtomicBool>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures `save` to fail as if the store were unreachable.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.fail_on_save.store(fail, Ordering::SeqCst);
    }

    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn insert(&self, saga: &SagaState) -> Result<Version> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(saga.order_number()) {
            return Err(SagaError::DuplicateSaga(saga.order_number().to_string()));
        }
        let mut stored = saga.clone();
        stored.version = Version::first();
        sagas.insert(saga.order_number().to_string(), stored);
        Ok(Version::first())
    }

    async fn save(&self, saga: &SagaState) -> Result<Version> {
        if self.fail_on_save.load(Ordering::SeqCst) {
            return Err(SagaError::Unavailable(
                "save rejected by test toggle".to_string(),
            ));
        }
        let mut sagas = self.sagas.write().await;
        let existing = sagas
            .get_mut(saga.order_number())
            .ok_or_else(|| SagaError::SagaNotFound(saga.order_number().to_string()))?;

        if existing.version != saga.version {
            return Err(SagaError::VersionConflict {
                saga_id: saga.saga_id().to_string(),
                expected: saga.version,
            });
        }

        let next = saga.version.next();
        *existing = saga.clone();
        existing.version = next;
        Ok(next)
    }

    async fn find_by_order_number(&self, order_number: &str) -> Result<Option<SagaState>> {
        Ok(self.sagas.read().await.get(order_number).cloned())
    }

    async fn find_by_status(&self, status: SagaStatus) -> Result<Vec<SagaState>> {
        let sagas = self.sagas.read().await;
        let mut found: Vec<SagaState> = sagas
            .values()
            .filter(|saga| saga.status() == status)
            .cloned()
            .collect();
        found.sort_by_key(|saga| saga.started_at());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SagaStep;
    use chrono::Utc;
    use uuid::Uuid;

    fn new_saga(order_number: &str) -> SagaState {
        SagaState::new(Uuid::new_v4(), order_number, Utc::now())
    }

    #[tokio::test]
    async fn test_insert_assigns_first_version() {
        let repo = InMemorySagaRepository::new();
        let saga = new_saga("ORD-1");
        assert_eq!(repo.insert(&saga).await.unwrap(), Version::first());

        let stored = repo.get("ORD-1").await.unwrap();
        assert_eq!(stored.version(), Version::first());
        assert_eq!(stored.saga_id(), saga.saga_id());
    }

    #[tokio::test]
    async fn test_duplicate_order_number_rejected() {
        let repo = InMemorySagaRepository::new();
        repo.insert(&new_saga("ORD-1")).await.unwrap();

        assert!(matches!(
            repo.insert(&new_saga("ORD-1")).await,
            Err(SagaError::DuplicateSaga(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let repo = InMemorySagaRepository::new();
        repo.insert(&new_saga("ORD-1")).await.unwrap();

        let mut first = repo.get("ORD-1").await.unwrap();
        let mut second = first.clone();

        first.complete_step(SagaStep::ReserveInventory);
        repo.persist(&mut first).await.unwrap();
        assert_eq!(first.version(), Version::new(2));

        second.complete_step(SagaStep::ReserveInventory);
        assert!(matches!(
            repo.persist(&mut second).await,
            Err(SagaError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_unknown_saga() {
        let repo = InMemorySagaRepository::new();
        assert!(matches!(
            repo.save(&new_saga("ORD-404")).await,
            Err(SagaError::SagaNotFound(_))
        ));
        assert!(matches!(
            repo.get("ORD-404").await,
            Err(SagaError::SagaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_status() {
        let repo = InMemorySagaRepository::new();
        for number in ["ORD-1", "ORD-2", "ORD-3"] {
            repo.insert(&new_saga(number)).await.unwrap();
        }
        let mut saga = repo.get("ORD-2").await.unwrap();
        saga.start_compensation("boom");
        repo.persist(&mut saga).await.unwrap();

        let compensating = repo.find_by_status(SagaStatus::Compensating).await.unwrap();
        assert_eq!(compensating.len(), 1);
        assert_eq!(compensating[0].order_number(), "ORD-2");
        assert_eq!(repo.find_by_status(SagaStatus::Started).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_on_save_toggle() {
        let repo = InMemorySagaRepository::new();
        repo.insert(&new_saga("ORD-1")).await.unwrap();
        repo.set_fail_on_save(true);

        let saga = repo.get("ORD-1").await.unwrap();
        assert!(matches!(
            repo.save(&saga).await,
            Err(SagaError::Unavailable(_))
        ));
    }
}
