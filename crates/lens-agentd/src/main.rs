use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use lens_api::{HttpApi, RunnerApiAdapter};
use lens_core::{Dispatcher, LensConfig, TaskStore};
use lens_exec::{
    MemoryContextCache, ToolRegistry, ToolRunner,
    gemini::{GeminiClient, GeminiConfig},
};
use lens_observe::{Journal, LoggerConfig, logger_init};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const ENV_LISTEN: &str = "LENS_LISTEN";
const DEFAULT_LISTEN: &str = "127.0.0.1:8090";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    let logger = LoggerConfig::from_env()?;
    logger_init(&logger)?;

    // 2) Config
    let config = LensConfig::from_env();
    let listen = listen_addr(std::env::var(ENV_LISTEN).ok())?;
    info!(model = %config.model, %listen, "configuration loaded");

    // 3) Upstream + dispatcher
    let gemini = GeminiClient::new(GeminiConfig::from_env()?)?;
    let dispatcher = Dispatcher::builder(Arc::new(gemini), &config)
        .with_subscriber(Arc::new(Journal::new()))
        .build();

    // 4) Runner
    let registry = ToolRegistry::with_builtins();
    info!(tools = ?registry.names(), "tools registered");
    let store = TaskStore::new();
    let runner = ToolRunner::new(
        dispatcher,
        registry,
        Arc::new(MemoryContextCache::new(config.context_ttl())),
        store.clone(),
        &config,
    );

    // 5) Background purge of expired task records
    let shutdown = CancellationToken::new();
    let purge = tokio::spawn(purge_loop(store, config.task_ttl(), shutdown.clone()));

    // 6) HTTP API
    let adapter = Arc::new(RunnerApiAdapter::with_shutdown(runner, shutdown.child_token()));
    let app = HttpApi::new(Arc::clone(&adapter)).router();
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    info!(%listen, "serving");

    let signal = shutdown.clone();
    lens_api::axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
            signal.cancel();
        })
        .await
        .context("http server")?;

    // The adapter token is a child of `shutdown`, so in-flight invocations are cancelled too.
    purge.await.context("purge task")?;
    info!(inflight = adapter.inflight(), "stopped");
    Ok(())
}

fn listen_addr(raw: Option<String>) -> anyhow::Result<SocketAddr> {
    let raw = raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    raw.parse()
        .with_context(|| format!("{ENV_LISTEN}={raw} is not a socket address"))
}

/// Sweep cadence: half the TTL, clamped to [1s, 60s].
fn purge_interval(ttl: Duration) -> Duration {
    (ttl / 2).clamp(Duration::from_secs(1), Duration::from_secs(60))
}

async fn purge_loop(store: TaskStore, ttl: Duration, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(purge_interval(ttl));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tick.tick() => {
                let purged = store.purge_expired(ttl);
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "expired tasks purged");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_defaults_and_validates() {
        assert_eq!(listen_addr(None).unwrap().port(), 8090);
        assert_eq!(listen_addr(Some("  ".into())).unwrap().port(), 8090);
        assert_eq!(
            listen_addr(Some("0.0.0.0:9000".into())).unwrap().to_string(),
            "0.0.0.0:9000"
        );
        assert!(listen_addr(Some("localhost".into())).is_err());
    }

    #[test]
    fn purge_interval_is_clamped() {
        assert_eq!(purge_interval(Duration::from_millis(10)), Duration::from_secs(1));
        assert_eq!(purge_interval(Duration::from_secs(30)), Duration::from_secs(15));
        assert_eq!(purge_interval(Duration::from_secs(3600)), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_loop_stops_on_shutdown() {
        let store = TaskStore::new();
        store.create_task("review_diff");
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(purge_loop(store.clone(), Duration::from_secs(2), shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
