//! Chatline CLI and chat server entry point.
//!
//! Binary name: `chatline`
//!
//! Parses CLI arguments, loads configuration, initializes tracing, then
//! starts the server or dispatches to the terminal client.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use chatline_infra::config::{load_config, resolve_data_dir};
use chatline_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use chatline_types::config::LogFormat;

use cli::chat::loop_runner::{ChatOptions, run_chat_loop};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or tracing
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "chatline", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    let config = load_config(cli.config.as_deref(), &data_dir).await;

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,chatline=debug",
        _ => "trace",
    };
    init_tracing(
        &TracingOptions::new(filter)
            .json(config.logging.format == LogFormat::Json)
            .otel(config.logging.otel),
    )
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            serve(&config, &data_dir, &host, port).await
        }

        Commands::Chat {
            session,
            server,
            connection,
            timezone,
        } => {
            run_chat_loop(ChatOptions {
                server,
                session_id: session,
                connection_id: connection,
                timezone,
            })
            .await
        }

        Commands::Transcript { session_id } => {
            cli::transcript::show_transcript(&config, &data_dir, &session_id, cli.json).await
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}

/// Run the HTTP server until Ctrl+C or SIGTERM.
async fn serve(
    config: &chatline_types::config::ChatlineConfig,
    data_dir: &std::path::Path,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let state = AppState::init(config, data_dir).await?;

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} Chatline listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());
    tracing::info!(%addr, finalize = ?config.policy.finalize, "Server started");

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {err}");
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
}
