use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

mod chat;
mod error;
mod servers;

use chat::run_chat;
use error::CliError;
use servers::run_servers_command;

#[derive(Parser, Debug)]
#[command(name = "canary", version)]
#[command(about = "Canary - MCP tool-server orchestration for streaming, tool-using chat")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "json", global = true)]
    log_format: LogFormat,

    /// Registry file (overrides CANARY_SERVERS_FILE)
    #[arg(long, global = true)]
    servers_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Listen address (overrides CANARY_BIND_ADDR)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Manage the tool-server registry
    Servers {
        #[command(subcommand)]
        servers_command: ServersCommands,
    },
    /// Ask one question and print the answer
    Chat {
        /// The question
        message: String,
        /// Seconds to wait for tool servers to connect
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,
    },
}

#[derive(Subcommand, Debug)]
enum ServersCommands {
    /// List registered servers
    List,
    /// Add or replace a server definition
    Add {
        /// Server id
        id: String,
        /// Program to launch (process transport)
        #[arg(long, conflicts_with = "base_url")]
        command: Option<String>,
        /// Program argument; repeat for several
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable as KEY=VALUE; repeat for several
        #[arg(long = "env")]
        env: Vec<String>,
        /// Server URL (network transport)
        #[arg(long)]
        base_url: Option<String>,
        /// Event path under the base URL
        #[arg(long, requires = "base_url")]
        sse_path: Option<String>,
    },
    /// Remove a server definition
    Remove {
        /// Server id
        id: String,
    },
}

fn init_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let env_filter = match "info".parse() {
        Ok(directive) => env_filter.add_directive(directive),
        Err(_) => env_filter,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}

fn config(cli_servers_file: Option<PathBuf>) -> Result<canary_http::AppConfigBuilder, CliError> {
    let builder = canary_http::AppConfigBuilder::from_env()?;
    Ok(match cli_servers_file {
        Some(path) => builder.servers_file(path),
        None => builder,
    })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let builder = config(cli.servers_file)?;

    match cli.command {
        Commands::Serve { bind } => {
            let builder = match bind {
                Some(addr) => builder.bind_addr(addr),
                None => builder,
            };
            let report = canary_http::serve(builder.build()?).await?;
            if !report.is_clean() {
                tracing::warn!(
                    failures = report.failures.len(),
                    "Shutdown finished with close failures"
                );
            }
            Ok(())
        }
        Commands::Servers { servers_command } => {
            let config = builder.build()?;
            run_servers_command(servers_command, &config.servers_file)
        }
        Commands::Chat {
            message,
            connect_timeout,
        } => {
            let config = builder.build()?;
            run_chat(&config, message, std::time::Duration::from_secs(connect_timeout)).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Command failed");
        eprintln!("❌ Error: {e}");
        std::process::exit(1);
    }
}
