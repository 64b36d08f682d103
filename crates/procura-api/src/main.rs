//! Procura CLI and REST API entry point.
//!
//! Binary name: `procura`
//!
//! Parses CLI arguments, loads `config.toml`, opens the database and
//! dispatches to the appropriate command handler or starts the REST API
//! server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use procura_infra::config::{load_engine_config, resolve_data_dir};
use procura_observe::{TracingOptions, init_tracing, shutdown_tracing};

use cli::instance::Output;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "procura", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(resolve_data_dir);
    let config = load_engine_config(&data_dir).await;

    let verbosity = match cli.verbose {
        0 if matches!(cli.command, Commands::Serve { .. }) => 1,
        v => v,
    };
    init_tracing(&TracingOptions {
        otel: config.telemetry.otel,
        verbosity,
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli, data_dir, config).await;
    shutdown_tracing();
    result
}

async fn run(
    cli: Cli,
    data_dir: std::path::PathBuf,
    config: procura_types::config::EngineConfig,
) -> anyhow::Result<()> {
    let state = AppState::init(data_dir, config).await?;
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Start {
            workflow_type,
            id,
            payload,
            payload_file,
        } => {
            cli::instance::start(
                &state,
                workflow_type,
                id,
                payload,
                payload_file.as_deref(),
                out,
            )
            .await?;
        }

        Commands::Resume { id, input } => {
            cli::instance::resume(&state, &id, &input, out).await?;
        }

        Commands::ApproveCentral { id, decision } => {
            cli::instance::approve_central(&state, &id, &decision, out).await?;
        }

        Commands::Decide {
            id,
            branch,
            decision,
        } => {
            cli::instance::decide_department(&state, &id, &branch, &decision, out).await?;
        }

        Commands::ApprovePo { id, decision } => {
            cli::instance::approve_po(&state, &id, &decision, out).await?;
        }

        Commands::Status { id } => cli::instance::status(&state, &id, out).await?,
        Commands::History { id } => cli::instance::history(&state, &id, out).await?,
        Commands::Checkpoints { id } => cli::instance::checkpoints(&state, &id, out).await?,
        Commands::Checkpoint { id, sequence } => {
            cli::instance::checkpoint(&state, &id, sequence, out).await?;
        }
        Commands::Reconcile { id } => cli::instance::reconcile(&state, &id, out).await?,

        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            tracing::info!(%addr, "REST API listening");
            if !cli.quiet {
                println!(
                    "  {} Procura API listening on {}",
                    console::style("*").green().bold(),
                    console::style(format!("http://{addr}/api/v1")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
