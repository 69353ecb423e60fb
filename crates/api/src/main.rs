//! API server entry point.

use api::config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use row_store::{InMemoryRowStore, PostgresRowStore, RowStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for SIGINT or SIGTERM, then tells background tasks to stop.
async fn shutdown_signal(cancel: CancellationToken) {
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
    cancel.cancel();
}

/// Serves the API over `store` until shutdown, with the expiry sweeper
/// running alongside.
async fn serve<S: RowStore + Clone + 'static>(store: S, config: Config, metrics: PrometheusHandle) {
    let state = api::create_default_state(store, config.engine());

    let cancel = CancellationToken::new();
    let sweeper = state.storefront.sweeper().spawn(cancel.clone());

    let app = api::create_app(state, metrics);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .expect("server error");

    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "expiry sweeper task failed");
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env().expect("invalid configuration");

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the row store and serve
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to Postgres");
            let store = PostgresRowStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using Postgres row store");
            serve(store, config, metrics).await;
        }
        None => {
            tracing::info!("using in-memory row store");
            serve(InMemoryRowStore::new(), config, metrics).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
