use std::future::Future;

use anyhow::{anyhow, Context};
use axum::Router;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::router::router;
use crate::store::memory::MemoryEventStore;
use crate::store::postgres::PostgresEventStore;
use crate::time::SystemTime;

async fn build_router(config: &Config) -> anyhow::Result<Router> {
    if config.use_memory_store {
        tracing::warn!("using the in-memory event store, records will not survive a restart");
        return Ok(router(
            SystemTime {},
            MemoryEventStore::default(),
            config.reconcile_max_attempts,
            config.export_prometheus,
        ));
    }

    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL is required unless USE_MEMORY_STORE is set"))?;

    let store = PostgresEventStore::connect(database_url, config.max_pg_connections)
        .await
        .context("failed to create Postgres event store")?;
    tracing::info!("connected to Postgres");

    if config.run_migrations {
        store
            .run_migrations()
            .await
            .context("failed to run migrations")?;
    }

    Ok(router(
        SystemTime {},
        store,
        config.reconcile_max_attempts,
        config.export_prometheus,
    ))
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = match build_router(&config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!("failed to start: {e:#}");
            return;
        }
    };

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap()
}
