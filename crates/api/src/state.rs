//! Shared application state and store wiring.

use std::sync::Arc;

use admission::{AdmissionQueue, InMemoryQueueStore, QueueError, QueueStore, RedisQueueStore};
use allocator::{
    AllocationError, AllocationRepository, Allocator, ArbitrationStore,
    InMemoryAllocationRepository, InMemoryArbitrationStore, PostgresAllocationRepository,
    RedisArbitrationStore,
};
use domain::{InMemoryOrderRepository, OrderRepository, PostgresOrderRepository};
use ledger::{InMemoryLedgerStore, Ledger, LedgerError, LedgerStore, PostgresLedgerStore};
use saga::{
    InMemoryDeliveryService, InMemoryEventPublisher, InMemoryPaymentGateway,
    InMemorySagaRepository, PaymentGateway, PostgresSagaRepository, SagaOrchestrator,
    SagaRepository,
};
use sqlx::PgPool;
use thiserror::Error;

use crate::config::Config;

/// The saga orchestrator as wired by the server.
pub type Orchestrator = SagaOrchestrator<
    Arc<dyn LedgerStore>,
    Arc<dyn OrderRepository>,
    Arc<dyn SagaRepository>,
    InMemoryDeliveryService,
    InMemoryEventPublisher,
>;

pub type SharedAllocator = Allocator<Arc<dyn ArbitrationStore>, Arc<dyn AllocationRepository>>;

pub type SharedQueue = AdmissionQueue<Arc<dyn QueueStore>>;

/// Errors that can occur while wiring the stores at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger setup failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Allocator setup failed: {0}")]
    Allocator(#[from] AllocationError),

    #[error("Queue setup failed: {0}")]
    Queue(#[from] QueueError),
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub allocator: SharedAllocator,
    pub queue: Arc<SharedQueue>,
    pub payment: Arc<dyn PaymentGateway>,
    pub orders: Arc<dyn OrderRepository>,
}

impl AppState {
    /// Every store in process memory.
    pub fn in_memory() -> Self {
        Self::assemble(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemorySagaRepository::new()),
            Arc::new(InMemoryArbitrationStore::new()),
            Arc::new(InMemoryAllocationRepository::new()),
            Arc::new(InMemoryQueueStore::new()),
        )
    }

    /// PostgreSQL when `database_url` is set, Redis when `redis_url` is set,
    /// in-memory stores for whatever is left unset.
    pub async fn connect(config: &Config) -> Result<Self, StartupError> {
        let (ledger, orders, sagas, allocations): (
            Arc<dyn LedgerStore>,
            Arc<dyn OrderRepository>,
            Arc<dyn SagaRepository>,
            Arc<dyn AllocationRepository>,
        ) = match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url).await?;
                let ledger = PostgresLedgerStore::new(pool.clone());
                // One migrator covers every table in `migrations/`.
                ledger.run_migrations().await?;
                tracing::info!("connected to PostgreSQL, migrations applied");
                (
                    Arc::new(ledger),
                    Arc::new(PostgresOrderRepository::new(pool.clone())),
                    Arc::new(PostgresSagaRepository::new(pool.clone())),
                    Arc::new(PostgresAllocationRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory ledger, orders and sagas");
                (
                    Arc::new(InMemoryLedgerStore::new()),
                    Arc::new(InMemoryOrderRepository::new()),
                    Arc::new(InMemorySagaRepository::new()),
                    Arc::new(InMemoryAllocationRepository::new()),
                )
            }
        };

        let (arbitration, queues): (Arc<dyn ArbitrationStore>, Arc<dyn QueueStore>) =
            match &config.redis_url {
                Some(url) => {
                    let arbitration = RedisArbitrationStore::connect(url).await?;
                    let queues = RedisQueueStore::connect(url).await?;
                    tracing::info!("connected to Redis");
                    (Arc::new(arbitration), Arc::new(queues))
                }
                None => {
                    tracing::warn!("REDIS_URL not set, arbitration and queues are process-local");
                    (
                        Arc::new(InMemoryArbitrationStore::new()),
                        Arc::new(InMemoryQueueStore::new()),
                    )
                }
            };

        Ok(Self::assemble(
            ledger,
            orders,
            sagas,
            arbitration,
            allocations,
            queues,
        ))
    }

    fn assemble(
        ledger: Arc<dyn LedgerStore>,
        orders: Arc<dyn OrderRepository>,
        sagas: Arc<dyn SagaRepository>,
        arbitration: Arc<dyn ArbitrationStore>,
        allocations: Arc<dyn AllocationRepository>,
        queues: Arc<dyn QueueStore>,
    ) -> Self {
        let orchestrator = SagaOrchestrator::new(
            Ledger::new(ledger),
            orders.clone(),
            sagas,
            InMemoryDeliveryService::new(),
            InMemoryEventPublisher::new(),
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            allocator: Allocator::new(arbitration, allocations),
            queue: Arc::new(AdmissionQueue::new(queues)),
            payment: Arc::new(InMemoryPaymentGateway::new()),
            orders,
        }
    }

    pub fn ledger(&self) -> &Ledger<Arc<dyn LedgerStore>> {
        self.orchestrator.ledger()
    }
}
