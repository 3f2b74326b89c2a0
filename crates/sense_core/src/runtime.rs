/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::ServiceConfig;
use crate::engagement::Engine;
use crate::http_api;
use crate::store::Store;
use anyhow::{Context, Result};
use sense_protocol::ReconcileReport;
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;

/// Installs the global fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .try_init()
        .ok();
}

pub async fn build_engine(cfg: &ServiceConfig) -> Result<Engine> {
    let store = Store::open(cfg.db_path(), cfg.store_options())
        .await
        .with_context(|| format!("open store {}", cfg.db_path))?;
    Ok(Engine::new(store, cfg.engine_options()))
}

/// Serves the HTTP API until `shutdown` resolves.
pub async fn serve(cfg: &ServiceConfig, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let engine = build_engine(cfg).await?;
    let addr: SocketAddr = cfg.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    info!(%addr, db = %cfg.db_path, pool_size = cfg.pool_size, "sense service listening");

    axum::serve(listener, http_api::router(engine).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;
    info!("sense service stopped");
    Ok(())
}

/// One-shot counter repair for maintenance runs.
pub async fn reconcile(cfg: &ServiceConfig) -> Result<ReconcileReport> {
    let engine = build_engine(cfg).await?;
    let report = engine
        .reconcile_counters(&crate::store::OpContext::background())
        .await
        .context("reconcile counters")?;
    info!(
        publications = report.publications_fixed,
        comments = report.comments_fixed,
        users = report.users_fixed,
        "reconciliation finished"
    );
    Ok(report)
}
