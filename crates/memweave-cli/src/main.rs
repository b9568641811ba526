//! memweave CLI entry point.
//!
//! Binary name: `memweave`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;

use memweave_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::Commands;
use cli::run::RunArgs;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Set up tracing based on verbosity
    let directive = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,memweave=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        enable_otel: cli.otel,
        default_directive: directive.to_string(),
        json: false,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mut state = AppState::init(cli.config.as_deref()).await;

    let outcome = match &cli.command {
        Commands::Run {
            input,
            output,
            progress,
            workers,
            mode,
            limit,
        } => {
            let args = RunArgs {
                input,
                output,
                progress,
                workers: *workers,
                mode: *mode,
                limit: *limit,
            };
            cli::run::run_pipeline(&mut state, args, cli.json, cli.quiet).await
        }
        Commands::Search { user, query, top_k } => {
            cli::memory::search_memories(&state, user, query, *top_k, cli.json).await
        }
        Commands::Count { user } => cli::memory::count_memories(&state, user, cli.json).await,
        Commands::Clear { user } => cli::memory::clear_memories(&state, user, cli.json).await,
        Commands::Drop { force } => cli::memory::drop_collection(&state, *force, cli.json).await,
    };

    shutdown_tracing();
    outcome
}
