//! Registry service entry point.

use std::sync::Arc;

use event_store::InMemoryEventStore;
use registry::AppState;
use registry::config::Config;
use saga::{InMemoryLedger, InMemoryMessageBus, LedgerService, MessageBus, SagaCoordinator, SagaWorker};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let subscriber = tracing_subscriber::registry().with(filter);
    if config.log_json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect collaborators
    let store = InMemoryEventStore::new();
    let ledger = InMemoryLedger::new();
    ledger.connect().await.expect("failed to connect to ledger");
    let bus = InMemoryMessageBus::new();

    // 4. Start the saga worker
    let coordinator = SagaCoordinator::new(store, ledger.clone(), bus.clone())
        .with_ledger_timeout(config.saga.ledger_timeout);
    let worker = SagaWorker::new(Arc::new(coordinator), bus.clone(), config.saga.clone());
    let worker_handle = tokio::spawn(worker.run());

    // 5. Serve health and metrics
    let state = Arc::new(AppState {
        ledger: ledger.clone(),
        bus: bus.clone(),
    });
    let app = registry::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting registry service");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 6. Drain in-flight sagas before dropping the ledger connection
    bus.close().await;
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "saga worker terminated abnormally");
    }
    ledger.close().await;

    tracing::info!("registry shut down gracefully");
}
