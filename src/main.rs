use std::{process, sync::Arc, time::Duration};

use advanced_cache::{
    application::error::AppError,
    cache::{
        CacheAdmin, CacheConfig, CacheState, CacheStore, MemoryBackend, Processor, RedisBackend,
        StorageBackend,
    },
    config::{self, BackendSettings, Settings},
    infra::{
        error::InfraError,
        http::{self, ApiState, PublicState},
        telemetry,
        upstream::Origin,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "advanced_cache::server";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig(_) => run_check_config(&settings),
    }
}

fn run_check_config(settings: &Settings) -> Result<(), AppError> {
    let cache = CacheConfig::from(&settings.cache);
    // Building the processor validates policy and instruction names.
    Processor::from_config(
        CacheStore::new(
            Arc::new(MemoryBackend::new(cache.memory_capacity_non_zero())),
            cache.backend_timeout(),
        ),
        &cache,
    )
    .map_err(InfraError::from)?;

    info!(
        target = SOURCE,
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        origin = %settings.upstream.origin,
        backend = settings.cache.backend.name(),
        enabled = settings.cache.enabled,
        policies = ?settings.cache.policies,
        instructions = ?settings.cache.instructions,
        admin_api = settings.admin.token.is_some(),
        "Configuration is valid"
    );
    Ok(())
}

async fn build_backend(settings: &Settings) -> Result<Arc<dyn StorageBackend>, AppError> {
    let backend: Arc<dyn StorageBackend> = match &settings.cache.backend {
        BackendSettings::Memory => Arc::new(MemoryBackend::new(settings.cache.memory_capacity)),
        BackendSettings::Redis { url, namespace } => Arc::new(
            RedisBackend::connect(url, namespace.clone())
                .await
                .map_err(InfraError::from)?,
        ),
    };
    Ok(backend)
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let backend = build_backend(&settings).await?;
    let cache_config = CacheConfig::from(&settings.cache);
    let store = CacheStore::new(backend, cache_config.backend_timeout());

    let processor =
        Processor::from_config(store.clone(), &cache_config).map_err(InfraError::from)?;
    let origin = Arc::new(Origin::new(&settings.upstream)?);

    info!(
        target = SOURCE,
        backend = store.backend_name(),
        enabled = processor.is_enabled(),
        origin = %origin.base(),
        "Page cache ready"
    );

    let public_state = PublicState {
        origin,
        cache: Some(CacheState {
            processor,
            body_limit: settings.cache.body_limit_bytes.get(),
        }),
    };

    if settings.admin.token.is_none() {
        warn!(
            target = SOURCE,
            "admin.token is not set; the cache admin API will refuse every request"
        );
    }
    let api_state = ApiState::new(CacheAdmin::new(store), settings.admin.token.as_deref());

    serve_http(&settings, public_state, api_state).await
}

async fn serve_http(
    settings: &Settings,
    public_state: PublicState,
    api_state: ApiState,
) -> Result<(), AppError> {
    let request_limit = settings.upstream.max_request_bytes.get();
    let public_router = http::build_public_router(public_state, request_limit);
    let admin_router = http::build_admin_router(api_state, request_limit);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = SOURCE,
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target = SOURCE, "Shutdown requested");
        }
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));

    let servers = async { try_join!(public_server, admin_server) };
    tokio::select! {
        result = servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = shutdown_deadline(shutdown_rx, settings.server.graceful_shutdown) => {
            warn!(
                target = SOURCE,
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_deadline(rx: watch::Receiver<bool>, grace: Duration) {
    shutdown_requested(rx).await;
    tokio::time::sleep(grace).await;
}
