//! Runs the task admission scheduler and HTTP intake against Redis and RabbitMQ.
//!
//! Loads the `[manager]` / `[store]` / `[broker]` / `[http]` config file, connects
//! to both services, and serves `POST /tasks/` and `GET /tasks/{id}` next to the
//! scheduler loop until Ctrl-C.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use prometheus_task_admission::builders::connect_system;
use prometheus_task_admission::config::AppConfig;
use prometheus_task_admission::runtime::http;
use prometheus_task_admission::util::telemetry::{init_tracing, redact_url};

/// Task admission scheduler.
#[derive(Parser, Debug)]
#[command(name = "task-admission", version, about)]
struct Cli {
    /// Path to the config file (TOML, or JSON by `.json` extension).
    #[arg(long, env = "TASK_ADMISSION_CONFIG", default_value = "config/config.toml")]
    config: String,

    /// Override the Redis URL from the config file.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Override the AMQP URL from the config file.
    #[arg(long, env = "AMQP_URL")]
    amqp_url: Option<String>,

    /// Override the HTTP listen address from the config file.
    #[arg(long, env = "TASK_ADMISSION_LISTEN")]
    listen: Option<String>,

    /// Seconds to wait for the scheduler to stop after Ctrl-C.
    #[arg(long, env = "TASK_ADMISSION_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("info");

    let cli = Cli::parse();

    let mut config = AppConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    if let Some(url) = cli.redis_url {
        config.store.url = url;
    }
    if let Some(url) = cli.amqp_url {
        config.broker.url = url;
    }
    if let Some(listen) = cli.listen {
        config.http.listen = listen;
    }
    info!(
        path = %cli.config,
        store = %redact_url(&config.store.url),
        broker = %redact_url(&config.broker.url),
        listen = %config.http.listen,
        "loaded config"
    );

    let system = connect_system(&config).await?;
    let broker = system.broker.clone();
    let listener = tokio::net::TcpListener::bind(&config.http.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.http.listen))?;
    let app = http::router(system.store.clone(), config.manager.clone());

    let cancel = CancellationToken::new();
    let mut scheduler = system.scheduler.spawn(cancel.clone());
    let mut server = tokio::spawn(http::serve(listener, app, cancel.clone()));

    info!("task-admission running");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("shutdown requested");
        }
        joined = &mut scheduler => {
            joined.context("scheduler task panicked")??;
            warn!("scheduler exited on its own");
        }
        joined = &mut server => {
            joined
                .context("http server task panicked")?
                .context("http server failed")?;
            warn!("http server exited on its own");
        }
    }

    cancel.cancel();
    if !server.is_finished() {
        match tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), &mut server).await {
            Ok(joined) => {
                if let Err(e) = joined.context("http server task panicked")? {
                    warn!(error = %e, "http server stopped with an error");
                }
            }
            Err(_) => warn!(timeout_secs = cli.shutdown_timeout, "http server did not stop in time"),
        }
    }
    if !scheduler.is_finished() {
        match tokio::time::timeout(Duration::from_secs(cli.shutdown_timeout), &mut scheduler).await {
            Ok(joined) => joined.context("scheduler task panicked")??,
            Err(_) => warn!(timeout_secs = cli.shutdown_timeout, "scheduler did not stop in time"),
        }
    }
    broker.shutdown().await;

    info!("task-admission exited cleanly");
    Ok(())
}
