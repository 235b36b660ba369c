//! codectx binary — thin CLI shell over the [`codectx`] library crate.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use codectx::config::{Config, IndexMode, DEFAULT_HTTP_PORT};
use codectx::engine::EngineClient;
use codectx::graph::GraphStore;
use codectx::queue::{DurableQueue, IndexJob};
use codectx::telemetry::Telemetry;
use codectx::types::ServerState;
use codectx::watch::SingleFlight;
use codectx::weights::WeightManager;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Local code-context service: live source index + MCP search/retrieval tools.
#[derive(Parser)]
#[command(name = "codectx", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project root to index (default: current directory)
    #[arg(long, env = "INDEX_ROOT")]
    root: Option<PathBuf>,

    /// Data directory for manifests, graph.db, and logs
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Graph database path (default: <data_dir>/graph.db)
    #[arg(long, env = "SQLITE_DB")]
    graph_db: Option<PathBuf>,

    /// External semantic engine base URL
    #[arg(long, env = "ENGINE_URL")]
    engine_url: Option<String>,

    /// Command line used to launch the external engine
    #[arg(long, env = "ENGINE_CMD")]
    engine_cmd: Option<String>,

    /// Reranker endpoint (optional)
    #[arg(long, env = "RERANK_URL")]
    rerank_url: Option<String>,

    /// Vector-service endpoint for the ANN manifest sink (optional)
    #[arg(long, env = "ANN_URL")]
    ann_url: Option<String>,

    /// HTTP port for the MCP transport
    #[arg(long, env = "MCP_HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Serve the MCP stdio transport as well (logs move to stderr)
    #[arg(long)]
    stdio: bool,

    /// Start the RPC surface before the first index pass completes
    /// (also enabled by MCP_FAST_START=1)
    #[arg(long)]
    fast_start: bool,

    /// Route watcher jobs through the durable queue instead of in-process
    #[arg(long)]
    durable_queue: bool,

    /// Disable the file watcher
    #[arg(long)]
    no_watch: bool,

    /// Namespace tag stamped onto indexed records
    #[arg(long, env = "CTX_NAMESPACE")]
    namespace: Option<String>,

    /// Tenant tag stamped onto indexed records
    #[arg(long, env = "CTX_TENANT")]
    tenant: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one indexing pass and exit
    Index {
        /// Rebuild from scratch instead of reusing unchanged files
        #[arg(long)]
        full: bool,
    },
}

fn build_config(cli: &Cli) -> Config {
    let root = cli
        .root
        .clone()
        .unwrap_or_else(|| std::env::current_dir().expect("cannot determine current directory"));
    let root = root.canonicalize().unwrap_or(root);
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| root.join(".codectx"));
    let _ = std::fs::create_dir_all(&data_dir);
    let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

    let mut config = Config::new(root, data_dir);
    config.graph_db = cli.graph_db.clone();
    config.engine_url = cli.engine_url.clone();
    config.engine_cmd = cli.engine_cmd.clone();
    config.rerank_url = cli.rerank_url.clone();
    config.ann_url = cli.ann_url.clone();
    config.http_port = cli.port;
    config.fast_start = cli.fast_start
        || std::env::var("MCP_FAST_START").map(|v| v == "1").unwrap_or(false);
    config.namespace = cli.namespace.clone();
    config.tenant = cli.tenant.clone();
    config
}

async fn shutdown_signal(state: Arc<ServerState>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = state.shutdown.notified() => info!("shutdown requested via RPC"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down"),
            _ = state.shutdown.notified() => info!("shutdown requested via RPC"),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Diagnostics must stay off stdout when the stdio framing is active.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codectx=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = build_config(&cli);

    // Index-only invocation.
    if let Some(Commands::Index { full }) = &cli.command {
        let mut config = config;
        config.mode = if *full { IndexMode::Full } else { IndexMode::Incremental };
        let graph = match GraphStore::open(&config.graph_db_path()) {
            Ok(g) => g,
            Err(e) => {
                error!(error = %e, "cannot open graph store");
                std::process::exit(1);
            }
        };
        match tokio::task::spawn_blocking(move || codectx::indexer::run_index(&config, Some(&graph)))
            .await
            .expect("index task")
        {
            Ok(report) => {
                info!(files = report.files, entries = report.entries, "index complete");
                return;
            }
            Err(e) => {
                error!(error = %e, "index pass failed");
                std::process::exit(1);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Server launch
    // ---------------------------------------------------------------------

    let graph = match GraphStore::open(&config.graph_db_path()) {
        Ok(g) => Some(Arc::new(g)),
        Err(e) => {
            // Unrecoverable corruption at startup is fatal.
            error!(error = %e, db = %config.graph_db_path().display(), "cannot open graph store");
            std::process::exit(1);
        }
    };

    // First index pass: blocking by default, background with fast start.
    let index_config = config.clone();
    let index_graph = graph.clone();
    let first_pass = move || {
        if let Err(e) = codectx::indexer::run_index(&index_config, index_graph.as_deref()) {
            warn!(error = %e, "index pass failed");
        }
    };
    if config.fast_start {
        info!("fast start: indexing in the background");
        tokio::task::spawn_blocking(first_pass);
    } else {
        tokio::task::spawn_blocking(first_pass).await.expect("index task");
    }

    let entries = codectx::manifest::load_entries(&config.data_dir);
    let engine = EngineClient::start(&config, entries).await;
    let weights = WeightManager::load(&config.data_dir);
    let telemetry = Telemetry::open(config.log_dir());

    let state = Arc::new(ServerState::new(config.clone(), graph.clone(), engine, weights, telemetry));

    // Watcher -> debounce -> single-flight index job (direct or via queue).
    let mut watch_handle = None;
    if !cli.no_watch {
        let job_config = {
            let mut c = config.clone();
            c.mode = IndexMode::Incremental;
            c
        };
        let job_graph = graph.clone();
        let runner = SingleFlight::new(move || {
            if let Err(e) = codectx::indexer::run_index(&job_config, job_graph.as_deref()) {
                warn!(error = %e, "watch-triggered index failed");
            }
        });

        if cli.durable_queue {
            match DurableQueue::open(&config.data_dir).map(Arc::new) {
                Ok(queue) => {
                    let worker_runner = Arc::clone(&runner);
                    let _worker = codectx::queue::spawn_worker(Arc::clone(&queue), move |_job| {
                        worker_runner.submit();
                    });
                    let enqueue_root = config.root.clone();
                    watch_handle = codectx::watch::start(&config.root, move || {
                        let job =
                            IndexJob { root: enqueue_root.clone(), mode: "incremental".into() };
                        if let Err(e) = queue.enqueue(&job) {
                            warn!(error = %e, "enqueue failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "durable queue unavailable"),
            }
        } else {
            watch_handle = codectx::watch::start(&config.root, move || runner.submit());
        }
    }

    // HTTP transport.
    let app = codectx::mcp_http::router(Arc::clone(&state));
    let addr = format!("127.0.0.1:{}", config.http_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = addr.as_str(), error = %e, "could not bind MCP HTTP port");
            std::process::exit(1);
        }
    };
    info!(addr = addr.as_str(), "MCP HTTP transport at /mcp");

    // Optional stdio transport alongside HTTP.
    if cli.stdio {
        let stdio_state = Arc::clone(&state);
        tokio::spawn(async move {
            codectx::mcp::run_stdio(stdio_state).await;
        });
    }

    let serve_state = Arc::clone(&state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(serve_state))
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    // Shutdown: stop the watcher, stop the engine child, exit cleanly.
    if let Some(handle) = watch_handle.take() {
        handle.stop();
    }
    state.engine.stop();
    info!("bye");
}
