use axum::Router;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use beamcast::adapter::local_adapter::LocalAdapter;
use beamcast::adapter::{ConnectionHandler, ConnectionManager};
use beamcast::app::factory::AppManagerFactory;
use beamcast::channel::ChannelManager;
use beamcast::control::LocalBroadcastListener;
use beamcast::dispatch::{DispatchEngine, HandlerResolver};
use beamcast::error::{Error, Result};
use beamcast::http_handler;
use beamcast::middleware::pusher_api_auth_middleware;
use beamcast::options::ServerOptions;
use beamcast::restart::{RestartWatcher, write_marker};
use beamcast::statistics::{
    MemoryStatisticsCollector, MemoryStatisticsStore, StatisticsCollector, StatisticsStore,
    run_flush_loop,
};
use clap::{Args, Parser, Subcommand};
use http::HeaderMap;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "beamcast", version, about = "Pusher-compatible WebSocket broker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker.
    Start(StartArgs),
    /// Signal running brokers to restart via the shared restart marker.
    Restart(RestartArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Path to the JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Turn the statistics sink off.
    #[arg(long)]
    disable_statistics: bool,
    /// Seconds between statistics flushes.
    #[arg(long)]
    statistics_interval: Option<u64>,
    #[arg(long)]
    debug: bool,
    /// Drain instead of hard-stopping on INT/TERM.
    #[arg(long)]
    soft: bool,
}

#[derive(Args)]
struct RestartArgs {
    /// Path to the JSON config file (for the restart marker location).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Request a drain instead of a hard stop.
    #[arg(long)]
    soft: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            init_tracing(args.debug);
            match run_server(args).await {
                Ok(()) => {
                    info!("Shutdown complete");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    error!("Fatal startup error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Restart(args) => {
            init_tracing(false);
            match load_options(args.config.as_deref(), None) {
                Ok(options) => {
                    match write_marker(std::path::Path::new(&options.restart_marker_path), args.soft)
                    {
                        Ok(marker) => {
                            info!(
                                "Restart marker written to {} (soft={})",
                                options.restart_marker_path, marker.soft
                            );
                            ExitCode::SUCCESS
                        }
                        Err(e) => {
                            error!("Cannot write restart marker: {}", e);
                            ExitCode::FAILURE
                        }
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_options(config: Option<&std::path::Path>, start: Option<&StartArgs>) -> Result<ServerOptions> {
    let mut options = match config {
        Some(path) => ServerOptions::load_from_file(path)?,
        None => ServerOptions::default(),
    };

    if let Some(args) = start {
        if let Some(host) = &args.host {
            options.host = host.clone();
        }
        if let Some(port) = args.port {
            options.port = port;
        }
        if args.disable_statistics {
            options.statistics.enabled = false;
        }
        if let Some(interval) = args.statistics_interval {
            options.statistics.interval_seconds = interval;
        }
        if args.debug {
            options.debug = true;
        }
        if args.soft {
            options.soft_shutdown = true;
        }
    }

    options.validate().map_err(Error::Config)?;
    Ok(options)
}

async fn run_server(args: StartArgs) -> Result<()> {
    let options = Arc::new(load_options(args.config.as_deref(), Some(&args))?);
    info!("Starting beamcast on {}:{}", options.host, options.port);

    // Core components, wired the adapter-first way.
    let connection_manager: Arc<Mutex<dyn ConnectionManager + Send + Sync>> =
        Arc::new(Mutex::new(LocalAdapter::new()));
    connection_manager.lock().await.init().await;

    let app_manager = AppManagerFactory::create(&options.app_manager, &options.apps).await?;
    let channel_manager = Arc::new(RwLock::new(ChannelManager::new(connection_manager.clone())));

    let resolver = Arc::new(HandlerResolver::new());
    let dispatch_engine = Arc::new(DispatchEngine::new(resolver, connection_manager.clone()));

    let statistics: Option<Arc<dyn StatisticsCollector>> = options
        .statistics
        .enabled
        .then(|| Arc::new(MemoryStatisticsCollector::new()) as Arc<dyn StatisticsCollector>);

    let statistics_task = statistics.as_ref().map(|collector| {
        let store: Arc<dyn StatisticsStore> = Arc::new(MemoryStatisticsStore::new());
        tokio::spawn(run_flush_loop(
            collector.clone(),
            store,
            options.statistics.interval_seconds,
            options.statistics.retention_days,
        ))
    });

    let handler = Arc::new(ConnectionHandler::new(
        app_manager,
        channel_manager,
        connection_manager.clone(),
        dispatch_engine,
        statistics,
        options.clone(),
    ));

    // Local broadcast control plane; bind failure disables only this
    // feature.
    let control_task = if options.broadcast_socket_enabled {
        LocalBroadcastListener::new(options.broadcast_socket_path.clone(), connection_manager)
            .spawn()
    } else {
        None
    };

    let router = build_router(handler.clone());
    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address: {e}")))?;

    let server_handle = Handle::new();
    let server_task = {
        let handle = server_handle.clone();
        let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
        if options.ssl.enabled() {
            let cert = options.ssl.local_cert.clone().unwrap_or_default();
            let key = options.ssl.local_pk.clone().unwrap_or_default();
            let tls_config = RustlsConfig::from_pem_file(cert, key)
                .await
                .map_err(|e| Error::Config(format!("Invalid TLS configuration: {e}")))?;
            tokio::spawn(async move {
                axum_server::bind_rustls(addr, tls_config)
                    .handle(handle)
                    .serve(make_service)
                    .await
            })
        } else {
            tokio::spawn(async move {
                axum_server::bind(addr)
                    .handle(handle)
                    .serve(make_service)
                    .await
            })
        }
    };

    info!("Listening on {}", addr);

    // Shutdown rendezvous: OS signals and the shared restart marker.
    let soft = wait_for_shutdown(&options).await;

    if soft {
        info!("Draining connections before shutdown");
        handler.decline_new_connections();
        handler
            .close_all_connections(4200, "Server is restarting")
            .await;
        server_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    } else {
        info!("Hard stop");
        server_handle.shutdown();
    }

    if let Some(task) = control_task {
        task.abort();
    }
    if let Some(task) = statistics_task {
        task.abort();
    }

    match server_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(e) => {
            warn!("Server task ended abnormally: {}", e);
            Ok(())
        }
    }
}

fn build_router(handler: Arc<ConnectionHandler>) -> Router {
    let api = Router::new()
        .route("/apps/{app_id}/events", post(http_handler::trigger_event))
        .route("/apps/{app_id}/channels", get(http_handler::channels_index))
        .route(
            "/apps/{app_id}/channels/{channel_name}",
            get(http_handler::channel_show),
        )
        .route(
            "/apps/{app_id}/channels/{channel_name}/users",
            get(http_handler::channel_users),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            handler.clone(),
            pusher_api_auth_middleware,
        ));

    Router::new()
        .route("/up", get(http_handler::up))
        .route("/app/{app_key}", any(ws_handler))
        .merge(api)
        .layer(CorsLayer::permissive())
        .with_state(handler)
}

async fn ws_handler(
    State(handler): State<Arc<ConnectionHandler>>,
    Path(app_key): Path<String>,
    headers: HeaderMap,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handler.handle_socket(socket, app_key, headers, Some(peer_addr)))
}

/// Resolves to the soft/hard verdict once a shutdown trigger fires.
async fn wait_for_shutdown(options: &ServerOptions) -> bool {
    let watcher = RestartWatcher::new(&options.restart_marker_path);

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot install SIGINT handler: {}", e);
            watcher.wait_for_restart().await;
            return options.soft_shutdown;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {}", e);
            watcher.wait_for_restart().await;
            return options.soft_shutdown;
        }
    };

    tokio::select! {
        marker = watcher.wait_for_restart() => marker.soft,
        _ = sigint.recv() => {
            info!("SIGINT received");
            options.soft_shutdown
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received");
            options.soft_shutdown
        }
    }
}
