//! Plan Execution Engine — Reference Runtime Demo CLI
//!
//! Runs one or all of the six end-to-end lifecycle scenarios from the
//! engine spec, wiring real engine components (state store, queue
//! adapter, policy gate, event bus) together with deterministic
//! stand-in tool agents so every run is reproducible.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- happy-path
//!   cargo run -p demo -- rejection
//!   cargo run -p demo -- retry-then-success
//!   cargo run -p demo -- dead-letter
//!   cargo run -p demo -- crash-recovery
//!   cargo run -p demo -- broker-enqueue-failure

mod scenarios;
mod support;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Plan Execution Engine — reference runtime demo.
///
/// Each subcommand runs one or all of the six lifecycle scenarios,
/// demonstrating admission, dispatch, retry, dead-letter, crash recovery,
/// and broker-failure handling.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Plan execution engine reference runtime demo",
    long_about = "Runs plan execution engine demo scenarios showing admission, dispatch,\n\
                  retry/dead-letter handling, approval resolution, and crash recovery.\n\n\
                  Scenarios:\n\
                  1. Happy path             — auto step + approval-gated step, both complete\n\
                  2. Rejection              — approval-gated step rejected by a human\n\
                  3. Retry then success     — one transient failure, then completion\n\
                  4. Dead-letter            — retries exhausted, step dead-lettered\n\
                  5. Crash recovery         — mid-flight restart, broker redelivery\n\
                  6. Broker enqueue failure — publish rejected outright, step fails"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all six scenarios in sequence.
    RunAll,
    /// Scenario 1: Happy path (auto step + approval-gated step).
    HappyPath,
    /// Scenario 2: Rejection (approval-gated step rejected).
    Rejection,
    /// Scenario 3: Retry then success (transient failure, then completion).
    RetryThenSuccess,
    /// Scenario 4: Dead-letter (retries exhausted).
    DeadLetter,
    /// Scenario 5: Crash recovery (mid-flight restart).
    CrashRecovery,
    /// Scenario 6: Broker enqueue failure (publish rejected outright).
    BrokerEnqueueFailure,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let runtime = tokio::runtime::Runtime::new().expect("start async runtime");
    let result = runtime.block_on(dispatch(cli.command));

    match result {
        Ok(()) => println!("All selected scenarios completed successfully."),
        Err(e) => {
            eprintln!("Demo error: {e}");
            std::process::exit(1);
        }
    }
}

async fn dispatch(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::RunAll => {
            scenarios::happy_path::run().await?;
            scenarios::rejection::run().await?;
            scenarios::retry_then_success::run().await?;
            scenarios::dead_letter::run().await?;
            scenarios::crash_recovery::run().await?;
            scenarios::broker_enqueue_failure::run().await?;
            Ok(())
        }
        Command::HappyPath => scenarios::happy_path::run().await,
        Command::Rejection => scenarios::rejection::run().await,
        Command::RetryThenSuccess => scenarios::retry_then_success::run().await,
        Command::DeadLetter => scenarios::dead_letter::run().await,
        Command::CrashRecovery => scenarios::crash_recovery::run().await,
        Command::BrokerEnqueueFailure => scenarios::broker_enqueue_failure::run().await,
    }
}

fn print_banner() {
    println!();
    println!("Plan Execution Engine — Reference Runtime Demo");
    println!("===============================================");
    println!();
    println!("Per-step enforcement pipeline:");
    println!("  [1] Policy gate evaluates (subject, action) -> allow / deny / require-approval");
    println!("  [2] Step record persisted to the durable state store");
    println!("  [3] Step dispatched through the broker-backed queue to a tool agent");
    println!("  [4] Lifecycle transitions published to the event bus as they occur");
    println!("  [5] Retryable failures are retried with backoff, then dead-lettered");
    println!();
}
