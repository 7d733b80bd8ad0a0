//! estima-relay - WebSocket publish/subscribe relay for estima rooms
//!
//! Usage:
//!   estima-relay
//!   estima-relay --bind 0.0.0.0:9090 --capacity 512
//!
//! Set `RUST_LOG=debug` for per-frame logging.

use clap::Parser;
use estima_collab::server::{RelayConfig, RelayServer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:9090")]
    bind: String,

    /// Frames buffered per subscriber before a slow client starts losing them
    #[arg(short, long, default_value_t = 256)]
    capacity: usize,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RelayConfig {
        bind_addr: args.bind,
        broadcast_capacity: args.capacity,
    };

    let server = RelayServer::new(config);
    if let Err(e) = server.run().await {
        log::error!("Relay on {} stopped: {e}", server.bind_addr());
        std::process::exit(1);
    }
}
