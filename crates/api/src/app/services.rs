//! Queue service wiring for the HTTP layer.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use courier_core::{Clock, SystemClock};
use courier_infra::config::QueueConfig;
use courier_infra::queue::{
    InMemoryQueueStore, JobController, LeaseManager, PostgresQueueStore, QueueError, QueueStore,
    RetryEngine, SubmissionService,
};

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Services shared by every handler.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub jobs: JobController,
    pub submissions: SubmissionService,
    pub leases: LeaseManager,
    pub retry: RetryEngine,
    backend: &'static str,
}

impl AppServices {
    pub fn new<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
        backend: &'static str,
    ) -> Self
    where
        S: QueueStore + 'static,
    {
        Self {
            jobs: JobController::new(store.clone(), clock.clone(), config.export),
            submissions: SubmissionService::new(store.clone(), clock.clone()),
            leases: LeaseManager::new(store.clone(), clock.clone(), config.lease),
            retry: RetryEngine::new(store, clock),
            backend,
        }
    }

    pub fn in_memory(config: QueueConfig) -> Self {
        Self::new(InMemoryQueueStore::arc(), Arc::new(SystemClock), config, "in_memory")
    }

    pub async fn postgres(
        database_url: &str,
        max_connections: u32,
        config: QueueConfig,
    ) -> Result<Self, StartupError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = PostgresQueueStore::new(pool);
        store.migrate().await?;
        Ok(Self::new(Arc::new(store), Arc::new(SystemClock), config, "postgres"))
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

/// Pick the backend from configuration: Postgres when `DATABASE_URL` is set.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    let services = match &config.database_url {
        Some(url) => {
            AppServices::postgres(url, config.database_max_connections, config.queue).await?
        }
        None => AppServices::in_memory(config.queue),
    };
    tracing::info!(backend = services.backend(), "queue services ready");
    Ok(services)
}
