use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mimic::{
    client::MimicClient,
    config::{ClientConfig, ServerConfig},
    logging,
    server::Server,
};
use tokio::sync::broadcast;

/// Mimic traffic-obfuscation tunnel
#[derive(Parser)]
#[command(name = "mimic")]
#[command(about = "A tunnel that disguises one session as rotating traffic to public domains")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mimic client
    Client {
        /// Path to the client configuration file
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Run the mimic server
    Server {
        /// Port to listen on (overrides the config file)
        #[arg(long, default_value_t = 443)]
        port: u16,

        /// Path to the server configuration file
        #[arg(long, default_value = "server.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { port, config } => {
            let config = ServerConfig::load(&config, port).await?;
            logging::init(
                &config.log_level,
                config.log_to_file,
                config.log_file_path.as_deref(),
            )?;

            let (shutdown_tx, _) = broadcast::channel(1);
            spawn_signal_handler(shutdown_tx.clone());

            let server = Arc::new(Server::new(config));
            server.run(shutdown_tx.subscribe()).await?;
        }
        Commands::Client { config } => {
            let config = ClientConfig::load(&config).await?;
            logging::init(&config.log_level, false, None)?;

            let (shutdown_tx, _) = broadcast::channel(1);
            spawn_signal_handler(shutdown_tx.clone());

            let client = MimicClient::new(config)?;
            client.run(shutdown_tx).await?;
        }
    }

    Ok(())
}

/// Broadcast shutdown on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(err) => {
                        tracing::error!("signal handler error: {err}");
                        return;
                    }
                };
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        tracing::error!("signal handler error: {err}");
                        return;
                    }
                }
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("signal handler error: {err}");
            return;
        }

        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });
}
