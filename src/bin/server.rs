//! Sonic Canvas room/session coordinator server.
//!
//! Owns all shared multi-client state: room membership, per-user stats,
//! contest life-cycle, chat, and idle room reclamation.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 3000
//! ```

use clap::Parser;
use sonic_canvas::{
    common::logger::setup_logger,
    server::{CoordinatorConfig, run_server},
};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Sonic Canvas room coordinator server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "3001")]
    port: u16,

    /// Seconds a memberless room may stay idle before it is reaped
    #[arg(long, default_value = "300")]
    idle_grace_secs: u64,

    /// Minimum interval between accepted chat messages, in milliseconds
    #[arg(long, default_value = "800")]
    chat_interval_ms: i64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    let config = CoordinatorConfig {
        idle_grace_ms: (args.idle_grace_secs as i64) * 1_000,
        chat_interval_ms: args.chat_interval_ms,
        ..CoordinatorConfig::default()
    };

    if let Err(e) = run_server(args.host, args.port, config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
