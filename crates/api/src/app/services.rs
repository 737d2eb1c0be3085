//! Engine wiring: event store, bus, reference data and background workers.

use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

use stockflow_infra::command_dispatcher::DispatchError;
use stockflow_infra::event_store::{EventStore, InMemoryEventStore};
use stockflow_infra::fulfillment::FulfillmentEngine;
use stockflow_infra::read_model::{ReferenceData, ReferenceError};
use stockflow_infra::workers::{HoldSweeper, WorkerHandle};
use stockflow_infra::EnvelopeBus;

#[cfg(feature = "postgres")]
use stockflow_infra::event_store::{EventStoreError, PostgresEventStore};

use crate::app::errors;
use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("failed to start worker: {0}")]
    Worker(#[from] std::io::Error),

    #[error("failed to rebuild projections: {0}")]
    Rebuild(#[from] DispatchError),

    #[error("projection rebuild task failed: {0}")]
    RebuildTask(#[from] tokio::task::JoinError),

    #[cfg(feature = "postgres")]
    #[error("failed to connect to Postgres: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("failed to prepare the event store: {0}")]
    Migrate(#[from] EventStoreError),
}

#[derive(Debug)]
pub struct AppServices {
    pub engine: Arc<FulfillmentEngine>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl AppServices {
    /// Services over an existing engine, without background workers.
    pub fn new(engine: Arc<FulfillmentEngine>) -> Self {
        Self {
            engine,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the projection worker and, when holds are enabled, the hold sweeper.
    pub fn start_workers(&self, sweeper: &HoldSweeper) -> Result<(), ServiceError> {
        let mut handles = vec![self.engine.start_projection_worker()?];
        if self.engine.settings().reservation_hold.is_some() {
            handles.push(sweeper.spawn("hold-sweeper", self.engine.clone())?);
        }
        self.workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(handles);
        Ok(())
    }

    /// Stop and join every background worker.
    pub fn shutdown(&self) {
        let handles: Vec<WorkerHandle> = self
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            handle.shutdown();
        }
    }

    /// Run a synchronous engine operation off the async runtime and map its
    /// error to an HTTP response for `path`.
    pub async fn run_blocking<T, F>(&self, path: &str, op: F) -> Result<T, Response>
    where
        F: FnOnce(&FulfillmentEngine) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        match tokio::task::spawn_blocking(move || op(&engine)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(errors::dispatch_error_to_response(err, path)),
            Err(join) => {
                tracing::error!(error = %join, path, "engine task failed");
                Err(errors::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error",
                    path,
                ))
            }
        }
    }
}

/// Build the engine from configuration, replay stored orders into the
/// projection and start its workers.
pub async fn build_services(config: &AppConfig) -> Result<Arc<AppServices>, ServiceError> {
    let reference = Arc::new(match &config.seed_file {
        Some(path) => {
            tracing::info!(seed_file = %path.display(), "loading reference data");
            ReferenceData::load_seed_file(path)?
        }
        None => ReferenceData::new(),
    });

    let store = event_store(config).await?;
    let engine = Arc::new(FulfillmentEngine::new(
        store,
        Arc::new(EnvelopeBus::new()),
        reference,
        config.engine_settings(),
    ));

    // The Postgres store blocks on the runtime, so replay off the async workers.
    let rebuilding = engine.clone();
    tokio::task::spawn_blocking(move || rebuilding.rebuild_projection()).await??;

    let services = Arc::new(AppServices::new(engine));
    services.start_workers(&HoldSweeper::new(config.sweep_interval))?;
    Ok(services)
}

#[cfg(feature = "postgres")]
async fn event_store(config: &AppConfig) -> Result<Arc<dyn EventStore>, ServiceError> {
    let Some(database_url) = &config.database_url else {
        tracing::info!("DATABASE_URL not set; using the in-memory event store");
        return Ok(Arc::new(InMemoryEventStore::new()));
    };

    let pool = sqlx::PgPool::connect(database_url).await?;
    let store = PostgresEventStore::new(pool, tokio::runtime::Handle::current());
    store.migrate().await?;
    tracing::info!("using the Postgres event store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn event_store(config: &AppConfig) -> Result<Arc<dyn EventStore>, ServiceError> {
    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL ignored: built without the postgres feature");
    }
    Ok(Arc::new(InMemoryEventStore::new()))
}
