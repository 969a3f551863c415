use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use data_service::{api, config::LogFormat, Config, DataService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let load = Config::load().context("failed to load configuration")?;
    let config = load.config;

    init_tracing(&config);

    match &load.source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => warn!("could not read config file, using defaults"),
    }

    let service = Arc::new(
        DataService::open(config.clone())
            .await
            .context("failed to open data store")?,
    );
    service.start_processing();

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "starting data service");

    let served = axum::serve(listener, api::router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown_signal(service.shutdown_token()))
        .await;

    info!("shutting down data service");
    service.shutdown().await;
    served.context("server error")?;

    info!("data service exited");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=warn", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolves on SIGINT/SIGTERM and stops the background ticker before the
/// server starts draining connections.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    token.cancel();
}
