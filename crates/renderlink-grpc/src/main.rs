//! Stub renderer server
//!
//! Serves the renderlink contract without a real renderer, for developing
//! and testing plugins against the proxy and callback plumbing.

use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use renderlink_grpc::StubServer;

/// Stub renderer - answers renderlink calls and re-broadcasts emitted events
#[derive(Parser, Debug)]
#[command(name = "renderlink-stub")]
#[command(about = "gRPC stub renderer for plugin development")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:51022")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let server = StubServer::new(args.addr);
    server.run().await?;

    Ok(())
}
