use httpflow::api::{self, AdminState};
use httpflow::config;
use httpflow::db;
use httpflow::jobs::{JobStore, PgJobStore, Scheduler};

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cfg = config::Config::from_env()?;
    let engine = &cfg.engine;

    tracing::info!(
        poll_interval_ms = engine.poll_interval.as_millis() as u64,
        request_timeout_ms = engine.request_timeout.as_millis() as u64,
        max_concurrent = engine.max_concurrent,
        max_attempts = engine.max_attempts,
        admin_addr = cfg.admin_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        "httpflow worker starting"
    );

    let pool = db::make_pool(&cfg).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        tracing::info!("migrations applied");
    }

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone(), engine.max_attempts));
    let scheduler = Scheduler::new(store, engine)?;

    // ---- Admin API task ----
    let api_handle = {
        let state = AdminState {
            scheduler: scheduler.clone(),
        };
        let addr = cfg.admin_addr.clone();
        tokio::spawn(async move {
            match addr {
                Some(addr) => api::serve(&addr, state).await,
                None => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        })
    };

    // ---- Poller ----
    // an admin failure still drains in-flight work before it is returned
    let stop_signal = async move {
        tokio::select! {
            res = api_handle => match res {
                Ok(Ok(())) => Err(anyhow::anyhow!("admin api exited unexpectedly")),
                Ok(Err(e)) => Err(e.context("admin api failed")),
                Err(join_err) => Err(anyhow::Error::from(join_err)),
            },
            res = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                res.map_err(anyhow::Error::from)
            }
        }
    };

    let exit = scheduler.run_until(stop_signal, cfg.shutdown_grace).await;
    pool.close().await;
    tracing::info!("httpflow worker stopped");

    exit
}
