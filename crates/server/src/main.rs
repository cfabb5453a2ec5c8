mod api;
mod config;
mod event_loop;
mod startup;
mod state;
mod utils;

#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use api::api_router;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use event_loop::{Command, EventLoop, EventLoopConfig};
use jukebox::{
    ControllerConfig, JukeboxController, Notifier, SchedulerRuntime, ThreadDispatcher,
    WorkerContext,
};
use library::AlbumCache;
use player::{Connector, TcpConnector};
use startup::load_album_snapshot;
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const NOTIFICATION_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }

    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new(config.connection_settings()));
    let cache = Arc::new(AlbumCache::new(config.album_grouping()?));
    let snapshot_path = config
        .cache
        .save
        .then(|| resolve_path(&config_path, &config.cache.path));
    let cache_loaded = match &snapshot_path {
        Some(path) => load_album_snapshot(connector.as_ref(), &cache, path),
        None => false,
    };

    let runtime = Arc::new(SchedulerRuntime::new());
    let notifier = Notifier::new(NOTIFICATION_CAPACITY);
    let dispatcher = Arc::new(ThreadDispatcher::new(
        Arc::clone(&runtime),
        WorkerContext {
            connector: Arc::clone(&connector),
            cache: Arc::clone(&cache),
            cache_timeout: Duration::from_secs(2),
            snapshot_path,
        },
    ));
    let mut controller = JukeboxController::new(
        connector,
        dispatcher,
        cache,
        notifier.clone(),
        ControllerConfig {
            limits: config.buffer_limits(),
            last_played_size: config.jukebox.last_played_size,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            cache_timeout: Duration::from_millis(100),
        },
    );
    for partition in &config.partitions {
        controller.add_partition(&partition.name, partition.settings()?)?;
    }
    if !cache_loaded {
        if let Err(err) = controller.request_cache_rebuild(false) {
            warn!("Failed to start album cache rebuild: {}", err);
        }
    }

    let (event_loop, events) = EventLoop::new(
        controller,
        Arc::clone(&runtime),
        EventLoopConfig {
            tick_interval: config.tick_interval(),
            job_max_age: config.job_max_age(),
            ..EventLoopConfig::default()
        },
    );
    let event_thread = event_loop.spawn()?;

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let state = AppState {
        events: events.clone(),
        notifier,
    };
    let app = Router::new()
        .nest("/api/v1", api_router(state))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    events.send(Command::Stop);
    match tokio::task::spawn_blocking(move || event_thread.join()).await {
        Ok(Ok(())) => {}
        _ => warn!("Event loop did not stop cleanly"),
    }
    if !runtime.shutdown(shutdown_timeout) {
        warn!("Workers still running at exit");
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
