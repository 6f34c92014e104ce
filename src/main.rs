use std::net::SocketAddr;

use opentelemetry::global;
use passcore::{app, initialize_state, telemetry};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_PORT: u16 = 8080;
const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,passcore=debug"));
    let otlp = std::env::var(OTLP_ENDPOINT).ok();

    // Export logs and traces only when a collector is configured.
    let logs = match otlp.as_deref().map(telemetry::setup_logging) {
        Some(Ok(layer)) => Some(layer),
        Some(Err(err)) => {
            eprintln!("cannot export logs over OTLP: {err}");
            None
        },
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(logs)
        .init();

    if otlp.is_some() {
        match telemetry::setup_tracer() {
            Ok(provider) => {
                global::set_tracer_provider(provider);
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot export traces over OTLP")
            },
        }
    }

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::error!(error = %err, "cannot install metrics recorder");
            None
        },
    };

    let state = match initialize_state(metrics).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start passcore");
            std::process::exit(1);
        },
    };

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "cannot bind listener");
            std::process::exit(1);
        },
    };
    tracing::info!(%addr, "server listening");

    if let Err(err) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server stopped");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
