// kaspool: share intake, VarDiff, hashrate and reward settlement service
//
// The stratum front end feeds shares through SharesManager::add_share against
// the shared TemplateCache; the treasury signals matured coinbases on
// POST /coinbase.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use kaspool::api::{self, ApiState};
use kaspool::blockchain::{BlockCandidate, TemplateCache};
use kaspool::config::Config;
use kaspool::metrics::{PrometheusMetrics, Pushgateway};
use kaspool::payout::AnyBalances;
use kaspool::service::{Pool, PoolSettings};

const PUSH_JOB: &str = "kaspool";

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load().context("loading configuration")?;

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_target(false)
        .init();

    tracing::info!("🚀 kaspool v{} on {}", env!("CARGO_PKG_VERSION"), cfg.network);
    tracing::info!("🏦 Treasury address: {}", cfg.pool_address);

    let metrics = Arc::new(PrometheusMetrics::new().context("registering metrics")?);
    let balances = Arc::new(AnyBalances::from_url(cfg.database_url.as_deref()).await?);

    let pool = Arc::new(Pool::new(PoolSettings::from_config(&cfg), balances, metrics.clone()));
    pool.start();

    // The node bridge inserts templates into this cache and answers the block
    // candidates it emits; the stratum front end passes `&templates` to
    // SharesManager::add_share. Neither surface lives in this binary, so the
    // cache stays empty here and candidates are logged and reported as not
    // accepted. It is held until shutdown, which closes the candidate channel.
    let (candidates_tx, candidates_rx) = mpsc::channel(16);
    let templates = Arc::new(TemplateCache::new(cfg.templates.cache_size, candidates_tx));
    tokio::spawn(drain_block_candidates(candidates_rx));
    tracing::info!("📦 Template cache ready (capacity {}, {} live)", cfg.templates.cache_size, templates.len());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pusher = match cfg.pushgateway.as_deref() {
        Some(url) => {
            let gateway = Pushgateway::new(url, PUSH_JOB)?;
            tracing::info!("📊 Pushing metrics to {} every {}s", gateway.url(), cfg.metrics.push_interval_secs);
            Some(gateway.spawn(
                metrics.clone(),
                Duration::from_secs(cfg.metrics.push_interval_secs),
                shutdown_rx,
            ))
        }
        None => {
            tracing::info!("📊 No PUSHGATEWAY configured; metrics served on /metrics only");
            None
        }
    };

    let app = api::router(ApiState::new(pool.clone(), metrics));
    let listener = tokio::net::TcpListener::bind(&cfg.api_listen)
        .await
        .with_context(|| format!("binding API listener on {}", cfg.api_listen))?;

    tracing::info!("📡 kaspool API listening on {}", cfg.api_listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server")?;

    let _ = shutdown_tx.send(true);
    pool.shutdown().await;
    drop(templates);
    if let Some(pusher) = pusher {
        let _ = pusher.await;
    }

    tracing::info!("🏁 kaspool shut down cleanly");
    Ok(())
}

async fn drain_block_candidates(mut rx: mpsc::Receiver<BlockCandidate>) {
    while let Some(candidate) = rx.recv().await {
        tracing::warn!(
            "⚠️  Block candidate from {} on {} (nonce {:#x}) has no node bridge to submit to",
            candidate.miner_id,
            candidate.hash,
            candidate.nonce
        );
        let _ = candidate.reply.send(false);
    }
}

// Graceful shutdown (ctrl_c + SIGTERM on Unix)
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable ({}), waiting for Ctrl+C", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C, shutting down");
    }
}
