use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use summarizarr::{config, http, ingestor, provider, scheduler, store::Store};

#[tokio::main]
async fn main() {
    let cfg = config::load_config().unwrap_or_else(|e| {
        eprintln!("FATAL: failed to load config: {e}");
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cfg.log_level.as_filter_str()))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "summarizarr starting");

    let store = Store::open(std::path::Path::new(&cfg.database_path)).unwrap_or_else(|e| {
        eprintln!("FATAL: failed to open database: {e}");
        std::process::exit(1);
    });
    store.migrate().await.unwrap_or_else(|e| {
        eprintln!("FATAL: failed to apply migrations: {e}");
        std::process::exit(1);
    });
    store.integrity_check().await.unwrap_or_else(|e| {
        eprintln!("FATAL: database integrity check failed: {e}");
        std::process::exit(1);
    });
    let store = Arc::new(store);

    let provider: Arc<dyn provider::Provider> = Arc::from(provider::build_provider(&cfg.provider));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ingestor_config = ingestor::IngestorConfig {
        url: ingestor::build_url(&cfg.signal_url, &cfg.signal_phone_number),
        max_retries: cfg.ingestor_max_retries,
        retry_delay: cfg.ingestor_retry_delay,
    };
    let ingestor_store = store.clone();
    let ingestor_shutdown = shutdown_rx.clone();
    let ingestor_handle = tokio::spawn(async move {
        if let Err(err) = ingestor::run(ingestor_config, ingestor_store, ingestor_shutdown).await {
            tracing::error!(error = %err, "ingestor exited with error");
        }
    });

    let scheduler_config = scheduler::SchedulerConfig {
        interval: cfg.summarization_interval,
        provider_is_local: cfg.provider.provider == config::AiProvider::Local,
    };
    let scheduler_store = store.clone();
    let scheduler_provider = provider.clone();
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler::run(scheduler_config, scheduler_store, scheduler_provider, scheduler_shutdown).await;
    });

    let signal_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_shutdown_tx.send(true);
    });

    let app = http::build_router(http::AppState { store: store.clone() });
    let listener = tokio::net::TcpListener::bind(&cfg.http_bind)
        .await
        .unwrap_or_else(|e| {
            eprintln!("FATAL: failed to bind {}: {e}", cfg.http_bind);
            std::process::exit(1);
        });
    info!(addr = %cfg.http_bind, "http api listening");

    let mut http_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "http server exited with error");
        });

    let _ = shutdown_tx.send(true);
    let _ = ingestor_handle.await;
    let _ = scheduler_handle.await;
    info!("summarizarr shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
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
