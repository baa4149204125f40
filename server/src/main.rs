use clap::Parser;
use server::network::{Server, ServerConfig};
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, then runs the relay's dispatch loop and
/// inactivity monitor until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = shared::SERVER_PORT)]
        port: u16,
        /// Source port that authorizes kick requests
        #[clap(long, default_value_t = shared::ADMIN_PORT)]
        admin_port: u16,
        /// Maximum number of registered clients
        #[clap(long, default_value_t = shared::MAX_CLIENTS)]
        max_clients: usize,
        /// Number of broadcast messages replayed to new joiners
        #[clap(long, default_value_t = shared::HISTORY_CAPACITY)]
        history_capacity: usize,
        /// Seconds between inactivity monitor cycles
        #[clap(long, default_value_t = 10)]
        monitor_interval_secs: u64,
        /// Idle seconds before a client is probed
        #[clap(long, default_value_t = 60)]
        idle_threshold_secs: u64,
        /// Seconds an unanswered probe stands before eviction
        #[clap(long, default_value_t = 10)]
        probe_timeout_secs: u64,
    }

    env_logger::init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        admin_port: args.admin_port,
        max_clients: args.max_clients,
        history_capacity: args.history_capacity,
        monitor_interval: Duration::from_secs(args.monitor_interval_secs),
        idle_threshold: Duration::from_secs(args.idle_threshold_secs),
        probe_timeout: Duration::from_secs(args.probe_timeout_secs),
    };

    // Binding the socket is the only fatal error; after this the server
    // degrades per request instead of exiting.
    let server = Server::new(config).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
            Ok(())
        }
    }
}
