use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cimut::broker::AgentBroker;
use cimut::config::Config;
use cimut::gateway::GatewayServer;

#[derive(Parser, Debug)]
#[command(name = "cimut", version, about = "Command broker for remote fault-injection agents")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, env = "CIMUT_LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent gateway (default).
    Serve {
        /// Override the bind host.
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port.
        #[arg(long)]
        port: Option<u16>,

        /// Override the default command timeout, in seconds.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        command_timeout_secs: Option<u64>,
    },

    /// Print the effective configuration and exit.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    init_tracing(cli.log_json);

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
        command_timeout_secs: None,
    }) {
        Command::Serve {
            host,
            port,
            command_timeout_secs,
        } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(secs) = command_timeout_secs {
                config.broker.command_timeout = std::time::Duration::from_secs(secs);
            }
            serve(config).await
        }
        Command::Config => {
            println!("gateway.addr            {}:{}", config.gateway.host, config.gateway.port);
            println!("gateway.cors_permissive {}", config.gateway.cors_permissive);
            println!(
                "broker.command_timeout  {}s",
                config.broker.command_timeout.as_secs()
            );
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.gateway.addr()?;
    let broker = Arc::new(AgentBroker::new(&config.broker));

    let mut server = GatewayServer::new(addr, config.gateway.cors_permissive, Arc::clone(&broker));
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        agents_online = broker.online_count(),
        commands_pending = broker.pending_count(),
        "Received shutdown signal"
    );

    server.shutdown().await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cimut=info,tower_http=info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
