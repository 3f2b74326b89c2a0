/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use sense_core::config::ServiceConfig;
use sense_core::runtime;
use std::path::PathBuf;
use tracing::{info, warn};

struct Args {
    config: Option<PathBuf>,
    reconcile: bool,
}

fn parse_args() -> Result<Args> {
    let mut out = Args {
        config: None,
        reconcile: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => out.config = Some(PathBuf::from(path)),
                None => return Err(anyhow::anyhow!("--config requires a path")),
            },
            "--reconcile" => out.reconcile = true,
            other => return Err(anyhow::anyhow!("unknown argument {other:?}")),
        }
    }
    if out.config.is_none() {
        if let Ok(path) = std::env::var("SENSE_CONFIG") {
            if !path.trim().is_empty() {
                out.config = Some(PathBuf::from(path));
            }
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let args = parse_args()?;
    let cfg = ServiceConfig::load(args.config.as_deref())?;
    match &args.config {
        Some(p) => info!("config: {}", p.display()),
        None => info!("config: defaults + environment"),
    }

    if args.reconcile {
        runtime::reconcile(&cfg).await?;
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl_c handler failed: {e}");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };
    runtime::serve(&cfg, shutdown).await
}
