//! Ramen CLI - push scripts to a live-link server, or run one locally.

mod colors;
mod send;
mod serve;
mod socket_types;
mod watch;
mod watcher;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ramen_core::LiveLinkClient;
use ramen_core::protocol::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "ramen")]
#[command(about = "Live-link scripting for a running host application")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a script to the live-link server and print the result
    Send {
        /// Path to the script, or `-` to read it from stdin
        script: String,

        /// Server host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Seconds the server is allowed to spend on the script
        #[arg(long, default_value_t = 5.0)]
        timeout: f64,
    },

    /// Send a script, then send it again every time it changes
    Watch {
        /// Path to the script
        script: String,

        /// Server host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Server port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Seconds the server is allowed to spend on the script
        #[arg(long, default_value_t = 5.0)]
        timeout: f64,

        /// Clear screen before each send
        #[arg(long)]
        clear: bool,
    },

    /// Run a live-link server backed by a local interpreter
    Serve {
        /// Host to bind to
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Interpreter that receives each script on stdin (default: python3 -)
        #[arg(long)]
        interpreter: Option<String>,

        /// Seconds a connection waits for its script to finish
        #[arg(long, default_value_t = 5.0)]
        timeout: f64,
    },

    /// List the socket types found in a node dump
    SocketTypes {
        /// Path to the node dump JSON
        #[arg(default_value = "blender_nodes_dump.json")]
        dump: PathBuf,

        /// Write the report to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Send {
            script,
            host,
            port,
            timeout,
        } => {
            let client = client(&host, port, timeout)?;
            send::execute(&script, &client).map_err(with_hint)?;
        }

        Commands::Watch {
            script,
            host,
            port,
            timeout,
            clear,
        } => {
            let client = client(&host, port, timeout)?;
            watch::execute(&script, client, clear)
                .await
                .map_err(with_hint)?;
        }

        Commands::Serve {
            host,
            port,
            interpreter,
            timeout,
        } => {
            serve::execute(&host, port, interpreter.as_deref(), timeout)
                .await
                .map_err(with_hint)?;
        }

        Commands::SocketTypes { dump, output } => {
            socket_types::execute(&dump, output.as_deref()).map_err(with_hint)?;
        }
    }

    Ok(())
}

/// Build a client that waits long enough for a server using `timeout_secs`.
fn client(host: &str, port: u16, timeout_secs: f64) -> anyhow::Result<LiveLinkClient> {
    let timeout = parse_timeout(timeout_secs)?;
    Ok(LiveLinkClient::new(format!("{host}:{port}")).with_execution_timeout(timeout))
}

pub(crate) fn parse_timeout(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| anyhow::anyhow!("Invalid timeout: {}", secs))
}

/// Replace ramen-core errors with their message plus a recovery hint.
pub(crate) fn with_hint(err: anyhow::Error) -> anyhow::Error {
    if let Some(core_err) = err.downcast_ref::<ramen_core::Error>() {
        anyhow::anyhow!("{}", core_err.with_hint())
    } else {
        err
    }
}
