//! WhereSpace server process entry point
//!
//! Loads configuration, wires every component into `AppState`, brings up
//! the Postgres/pgvector schema, and serves the HTTP facade until
//! `SIGINT`/Ctrl-C.
//!
//! Grounded on the teacher's `bin/agency-daemon.rs` for its logging setup
//! and `tokio::select!` graceful-shutdown shape, with daemonization and
//! PID-file handling dropped since this process is expected to run under
//! a supervisor (systemd, a container runtime) rather than fork itself.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wherespace::config::Config;
use wherespace::http::AppState;
use wherespace::vector_store::VectorStoreAdapter;

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,wherespace=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// Allow a forced schema reset via `WHERESPACE_ALLOW_SCHEMA_RESET=1`, for
/// operators who've intentionally changed the configured embedding
/// dimension and want the documents table rebuilt rather than refused
fn allow_schema_reset() -> bool {
    std::env::var("WHERESPACE_ALLOW_SCHEMA_RESET")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

async fn run(config: Config) -> wherespace::Result<()> {
    info!(
        host = %config.http.http_host,
        port = config.http.http_port,
        "connecting to vector store"
    );
    let store = VectorStoreAdapter::connect(&config.store, config.model_server.embedding_dim).await?;
    store.init_schema(allow_schema_reset()).await?;

    let bind_addr = format!("{}:{}", config.http.http_host, config.http.http_port);
    let state = AppState::new(config, store);
    let router = wherespace::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "wherespace-server listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received");
        shutdown_tx.send(()).ok();
    });

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                return Err(wherespace::WhereSpaceError::Internal(e.to_string()));
            }
        }
        _ = &mut shutdown_rx => {
            info!("graceful shutdown initiated");
        }
    }

    Ok(())
}

fn main() -> std::process::ExitCode {
    setup_logging();
    info!("wherespace-server v{}", wherespace::VERSION);

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return std::process::ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return std::process::ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => std::process::ExitCode::from(130),
        Err(e) => {
            error!(error = %e, "wherespace-server exited with error");
            std::process::ExitCode::from(1)
        }
    }
}
