//! Flux dispatch daemon — binary entrypoint.
//! Boots the scheduler, registers the configured sources, and serves the
//! ops HTTP surface (health, stats, admin toggles, Prometheus metrics).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flux_dispatch::dispatch::discord::DiscordSender;
use flux_dispatch::{
    api, config, metrics::Metrics, DiagnosticsHub, Fetcher, FingerprintStore, PollContext,
    Scheduler, Settings,
};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flux_dispatch=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::from_env();
    let metrics = Metrics::init(settings.max_concurrent_polls);

    let token = settings
        .discord_token
        .clone()
        .context("DISCORD_TOKEN is required")?;

    let store = Arc::new(FingerprintStore::open(&settings.store_path).await);
    let diagnostics = Arc::new(DiagnosticsHub::new());
    let ctx = PollContext {
        fetcher: Arc::new(Fetcher::new(&settings)?),
        sender: Arc::new(DiscordSender::new(token, &settings)),
        store,
        diagnostics: diagnostics.clone(),
    };

    let (scheduler, handle) = Scheduler::new(ctx, settings.clone());

    let sources = config::load_sources_default().context("loading source definitions")?;
    if sources.is_empty() {
        warn!("no sources configured; waiting for registrations");
    }
    for source in sources {
        handle.register(source);
    }

    let scheduler_task = tokio::spawn(scheduler.run());

    let state = api::AppState {
        scheduler: handle.clone(),
        diagnostics,
    };
    let router = api::create_router(state).merge(metrics.router());

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "ops surface listening");

    tokio::select! {
        res = axum::serve(listener, router) => {
            res.context("ops server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    handle.shutdown();
    scheduler_task.await.context("scheduler task panicked")?;
    Ok(())
}
