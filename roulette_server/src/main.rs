//! Command-line entry point for the pairing server

use clap::Parser;
use roulette_server::config::DEFAULT_ADDR;
use roulette_server::{PairingPolicy, SelectionPolicy, ServerConfig};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roulette-server", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "ROULETTE_ADDR", default_value = DEFAULT_ADDR)]
    addr: SocketAddr,

    /// Origin allowed to connect; repeat or comma-separate. Any origin if unset.
    #[arg(long = "allowed-origin", env = "ROULETTE_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Seconds between janitor sweeps
    #[arg(long, env = "ROULETTE_JANITOR_INTERVAL_SECS", default_value_t = 10)]
    janitor_interval_secs: u64,

    /// Seconds between keep-alive pings
    #[arg(long, env = "ROULETTE_PING_INTERVAL_SECS", default_value_t = 25)]
    ping_interval_secs: u64,

    /// Seconds of client silence before the connection is closed
    #[arg(long, env = "ROULETTE_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    idle_timeout_secs: u64,

    /// How to pick among waiting candidates: fifo or random
    #[arg(long, env = "ROULETTE_SELECTION", default_value_t = SelectionPolicy::Fifo)]
    selection: SelectionPolicy,

    /// Let the janitor pair waiters that are still unmatched
    #[arg(long, env = "ROULETTE_FORCE_MATCH")]
    force_match: bool,

    /// Don't put the ex-partner back in the queue on next-partner
    #[arg(long, env = "ROULETTE_NO_REQUEUE_ON_NEXT")]
    no_requeue_on_next: bool,

    /// Log as JSON lines
    #[arg(long, env = "ROULETTE_LOG_JSON")]
    log_json: bool,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        ServerConfig {
            addr: cli.addr,
            allowed_origins: cli.allowed_origins,
            janitor_interval: Duration::from_secs(cli.janitor_interval_secs),
            ping_interval: Duration::from_secs(cli.ping_interval_secs),
            idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
            pairing: PairingPolicy {
                selection: cli.selection,
                force_match: cli.force_match,
                requeue_partner_on_next: !cli.no_requeue_on_next,
            },
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match roulette_server::run(cli.into()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server failed");
            ExitCode::FAILURE
        }
    }
}
