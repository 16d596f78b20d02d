//! `planctl`: boots the Plan Execution Engine and serves its HTTP surface.
//!
//! Usage:
//!   planctl serve
//!   planctl serve --addr 0.0.0.0:9000 --policy-file policy.toml

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use plan_bus::EventBus;
use plan_client::{ClientConfig, ToolAgentClient};
use plan_engine::{Engine, EngineConfig};
use plan_http::{router, AppState, EchoPlanner, EchoToolAgent};
use plan_policy::TomlPolicyGate;
use plan_queue::InProcessBroker;
use plan_store::PlanStateStore;

#[derive(Parser)]
#[command(name = "planctl", about = "Plan Execution Engine control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the engine and serve the HTTP surface until interrupted.
    Serve {
        #[arg(long, env = "PLAN_HTTP_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,
        #[arg(long, env = "POLICY_FILE", default_value = "policy.toml")]
        policy_file: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let Command::Serve { addr, policy_file } = cli.command;

    let config = EngineConfig::from_env()?;
    info!(state_path = %config.state_path.display(), "engine config loaded");

    let store = PlanStateStore::open(config.state_path.clone())?;
    let queue = Arc::new(InProcessBroker::new());
    let policy = Arc::new(TomlPolicyGate::from_file(&policy_file)?);
    let tool_executor = Arc::new(ToolAgentClient::new(
        EchoToolAgent,
        ClientConfig {
            retry_max: config.tool_client_retry_max,
            retry_base_delay_ms: config.tool_client_retry_base_delay_ms,
            default_timeout_seconds: config.tool_client_default_timeout_seconds,
        },
    ));
    let bus = EventBus::new();

    let engine = Engine::new(store, queue, policy, tool_executor, bus, config);
    let handles = engine.start().await?;

    let state = AppState::new(engine, Arc::new(EchoPlanner));
    let app = router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let socket_addr: SocketAddr = addr.parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    info!(%addr, "planctl listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handles.shutdown.trigger();
    let _ = handles.step_consumer.await;
    let _ = handles.completion_consumer.await;
    handles.purger.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
