#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # forgecore
//!
//! Execution core for an AI-assisted developer tooling server: a session
//! pool, task queue, process store, incremental generator pipeline and
//! change-driven rebuild controller, exposed over HTTP, SSE and WebSocket.
//!
//! ## Subcommands
//!
//! - `forgecore serve` (default) — run the HTTP/WS server
//! - `forgecore watch-only --root <path> --project <name>` — run only the
//!   rebuild controller against one project root, useful for local
//!   development without standing up the full server

use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use forgecore::config::Config;
use forgecore::events::EventBus;
use forgecore::pipeline::graph::ComponentGraph;
use forgecore::pipeline::invoker::SessionPoolInvoker;
use forgecore::pipeline::phases::PhaseContext;
use forgecore::pool::session::EchoSessionFactory;
use forgecore::pool::SessionPool;
use forgecore::queue::TaskQueue;
use forgecore::rebuild::RebuildController;
use forgecore::routes;
use forgecore::state::AppState;
use forgecore::store::ProcessStore;
use forgecore::workspace::WorkspaceRegistry;
use forgecore::ws;

/// Execution core for an AI-assisted developer tooling server.
#[derive(Parser)]
#[command(name = "forgecore", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Run only the rebuild controller against one project root, with no
    /// HTTP server.
    WatchOnly {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
        /// Project root to watch.
        #[arg(long)]
        root: String,
        /// Project name (component graph label).
        #[arg(long)]
        project: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::WatchOnly { config, root, project }) => {
            run_watch_only(config.as_deref(), &root, &project).await;
        }
        Some(Commands::Serve { config }) => {
            run_server(config.as_deref()).await;
        }
        None => {
            run_server(None).await;
        }
    }
}

fn init_tracing(config: &Config) {
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();
}

/// Build the shared [`PhaseContext`] (and the session pool backing it) from
/// config. Every deployment wires in its own [`forgecore::pool::session::SessionFactory`]
/// here in place of [`EchoSessionFactory`]; the rest of the core never changes.
fn build_pool_and_pipeline(config: &Config, data_dir: PathBuf) -> (SessionPool, PhaseContext) {
    let factory = Arc::new(EchoSessionFactory);
    let pool = SessionPool::new(factory, config.pool.clone());
    let invoker = Arc::new(SessionPoolInvoker::new(pool.clone()));
    let ctx = PhaseContext::new(config.clone(), data_dir, invoker);
    (pool, ctx)
}

/// Runs a rebuild controller standalone, with no HTTP server, queue, or
/// store behind it — so there is nothing to enqueue re-analysis onto. The
/// callback just logs the affected set; `forgecore serve` is what wires a
/// controller's callback to an actual queue (see
/// `routes::workspaces::register`).
async fn run_watch_only(config_path: Option<&str>, root: &str, project: &str) {
    let config = Config::load(config_path);
    init_tracing(&config);

    info!(root, project, "forgecore watch-only starting");

    let graph = ComponentGraph::new(project);
    let callback = Arc::new(|affected: Vec<String>| {
        info!(?affected, "rebuild affected set (no queue in watch-only mode)");
    });
    let controller = RebuildController::start(
        PathBuf::from(root),
        graph,
        config.rebuild.debounce_ms,
        callback,
    );

    tokio::signal::ctrl_c().await.ok();
    controller.stop();
    info!("forgecore watch-only stopping");
}

#[allow(clippy::too_many_lines)]
async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);
    init_tracing(&config);

    info!("forgecore v{} starting", env!("CARGO_PKG_VERSION"));
    info!("listening on {}:{}", config.server.host, config.server.port);

    let data_dir = PathBuf::from(&config.server.data_dir);
    if let Err(e) = tokio::fs::create_dir_all(&data_dir).await {
        tracing::error!(error = %e, "failed to create data directory");
        std::process::exit(1);
    }

    let bus = EventBus::new();
    let workspaces = WorkspaceRegistry::new();

    let (pool, pipeline_ctx) = build_pool_and_pipeline(&config, data_dir.join("cache"));

    let factory = Arc::new(EchoSessionFactory);
    let queue = TaskQueue::new(config.queue.clone(), bus.clone(), pool.clone(), factory);

    let store = ProcessStore::open(&data_dir, bus.clone())
        .await
        .unwrap_or_else(|e| panic!("failed to open process store: {e}"));

    let state = AppState::new(config, bus, workspaces, pool, queue, store, pipeline_ctx);

    let workspace_routes = Router::new().route(
        "/api/workspaces",
        get(routes::workspaces::list).post(routes::workspaces::register),
    );

    let process_routes = Router::new()
        .route(
            "/api/processes",
            get(routes::processes::list)
                .post(routes::processes::create)
                .delete(routes::processes::delete_bulk),
        )
        .route(
            "/api/processes/{id}",
            get(routes::processes::get_one)
                .patch(routes::processes::patch)
                .delete(routes::processes::delete_one),
        )
        .route("/api/processes/{id}/cancel", post(routes::processes::cancel))
        .route("/api/stats", get(routes::processes::stats));

    let queue_routes = Router::new()
        .route(
            "/api/queue",
            get(routes::queue::snapshot)
                .post(routes::queue::enqueue)
                .delete(routes::queue::clear_queued),
        )
        .route(
            "/api/queue/history",
            get(routes::queue::history).delete(routes::queue::clear_history),
        )
        .route("/api/queue/{id}", delete(routes::queue::cancel))
        .route("/api/queue/pause", post(routes::queue::pause))
        .route("/api/queue/resume", post(routes::queue::resume))
        .route("/api/queue/{id}/move-to-top", post(routes::queue::move_to_top))
        .route("/api/queue/{id}/move-up", post(routes::queue::move_up))
        .route("/api/queue/{id}/move-down", post(routes::queue::move_down));

    let pipeline_routes = Router::new()
        .route("/api/pipeline/run", post(routes::pipeline::run))
        .route("/api/pipeline/{project}", get(routes::pipeline::get));

    let event_routes = Router::new().route("/api/events", get(routes::events::event_stream));
    let ws_route = Router::new().route("/api/ws", get(ws::ws_upgrade));

    // GUARD: Headers must be listed explicitly — `allow_headers(Any)` works in
    // Chrome but Firefox rejects credentialed requests without explicit listing.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
        ]);

    let app = Router::new()
        .merge(workspace_routes)
        .merge(process_routes)
        .merge(queue_routes)
        .merge(pipeline_routes)
        .merge(event_routes)
        .merge(ws_route)
        .with_state(state.clone());

    // GUARD: .layer() only applies to routes merged BEFORE the call.
    let app = app.layer(cors).layer(TraceLayer::new_for_http()).layer(
        tower::limit::ConcurrencyLimitLayer::new(state.config.pool.max_sessions.max(1) * 4),
    );

    let listener = TcpListener::bind((state.config.server.host.as_str(), state.config.server.port))
        .await
        .expect("failed to bind");
    let bound = listener.local_addr().expect("listener has a local address");
    info!(addr = %bound, "server ready");

    state.queue.spawn_executor();

    let cleanup_pool = state.pool.clone();
    let cleanup_interval_ms = state.config.pool.cleanup_interval_ms;
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(cleanup_interval_ms));
        loop {
            interval.tick().await;
            cleanup_pool.cleanup_idle_sessions().await;
        }
    });

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("server error");

    info!("shutting down...");
    sweep_task.abort();
    for controller in state.rebuild_controllers.read().await.values() {
        controller.stop();
    }
    state.pool.dispose().await;
    info!("goodbye");
}
