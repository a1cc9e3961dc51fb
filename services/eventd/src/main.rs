use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Arg, Command};
use ev_store::service::Service;
use ev_store::Repository as _;
use eventd::AppState;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "eventd starting");

    let matches = Command::new("eventd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Event store with time-ordered replay")
        .arg(
            Arg::new("path")
                .long("path")
                .value_name("DIR")
                .help("Working directory holding config.yaml and backend data (default: $EVENTS_PATH or ~/.events)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("HTTP listen port (default: $EVENTS_HTTP_PORT or 8080)"),
        )
        .get_matches();

    let path = matches
        .get_one::<String>("path")
        .cloned()
        .or_else(|| env::var("EVENTS_PATH").ok())
        .map(PathBuf::from)
        .unwrap_or_else(default_path);

    let port = matches
        .get_one::<u16>("port")
        .copied()
        .or_else(|| {
            env::var("EVENTS_HTTP_PORT")
                .ok()
                .and_then(|raw| raw.parse().ok())
        })
        .unwrap_or(8080);

    let cfg = eventd::config::load(&path).expect("failed to load configuration");
    info!(driver = cfg.persistence.driver.as_str(), path = %path.display(), "configuration loaded");

    let repo = ev_store::open(&cfg.persistence).expect("failed to open event repository");
    let svc = Arc::new(Service::new(Arc::clone(&repo)));
    svc.up();

    let state = AppState::new(Arc::clone(&svc));
    let router = eventd::build_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "eventd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    svc.down();
    if let Err(err) = repo.close().await {
        tracing::error!(error = %err, "repository close failed");
    }
    info!("eventd shut down gracefully");
}

fn default_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".events")
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
