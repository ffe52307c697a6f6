use std::future::ready;

use anyhow::Error;
use axum::{routing::get, Router};
use envconfig::Envconfig;
use euc_log_ingest::{
    config::Config,
    context::AppContext,
    health::{Liveness, Readiness},
    metrics_utils::{serve, setup_metrics_routes},
};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "euc log ingest"
}

fn start_health_liveness_server(
    config: &Config,
    liveness: Liveness,
    readiness: Readiness,
) -> Result<JoinHandle<()>, Error> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(move || ready(readiness.check())))
        .route("/_liveness", get(move || ready(liveness.check())));
    let router = setup_metrics_routes(router)?;
    let bind = config.bind_address();

    Ok(tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health and metrics on {bind}: {e}");
        }
    }))
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().expect("failed to load configuration from env");
    let context = AppContext::new(&config).await?;
    let mut ingestor = context.ingestor().await?;

    context.spawn_shutdown_listener();
    start_health_liveness_server(&config, ingestor.liveness(), context.readiness())?;

    ingestor.run(context.shutdown.clone()).await;

    info!("exiting");
    Ok(())
}
