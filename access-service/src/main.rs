use access_service::{
    build_router,
    config::{AccessConfig, StoreBackend},
    db,
    services::{
        metrics::init_metrics, AccessEngine, AccessStore, Database, EngineSettings, HttpNotifier,
        MemoryStore, NoopNotifier, Notifier, SystemClock,
    },
    AppState,
};
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store_backend = ?config.store_backend,
        "Starting access service"
    );

    let (store, database): (Arc<dyn AccessStore>, Option<Database>) = match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            let database = Database::new(pool);
            (Arc::new(database.clone()), Some(database))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store - state is lost on restart");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(
            url.clone(),
            Duration::from_millis(config.notifications.timeout_ms),
        )),
        None => Arc::new(NoopNotifier),
    };

    let engine = AccessEngine::new(
        store,
        notifier,
        Arc::new(SystemClock),
        EngineSettings {
            audit_timeout: config.security.audit_timeout(),
            device_cache_ttl: config.security.device_cache_ttl(),
        },
    );

    let shutdown = CancellationToken::new();
    let job_handles = if config.jobs.enabled {
        engine.jobs.spawn_all(config.jobs.intervals(), shutdown.clone())
    } else {
        tracing::info!("Security jobs disabled by configuration");
        Vec::new()
    };

    let state = AppState {
        engine,
        database,
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
        allowed_origins: config.security.allowed_origins.clone(),
    };
    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    for handle in job_handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Security job task failed to stop cleanly");
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
