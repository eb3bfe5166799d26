//! veil-grpc-web: gRPC-Web ゲートウェイのデモサーバー
//!
//! ```text
//! veil-grpc-web --listen 127.0.0.1:8080 --config gateway.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ftlog::info;

use veil_grpc_web::server::{self, echo::EchoService};
use veil_grpc_web::{Gateway, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "veil-grpc-web", version, about = "gRPC-Web gateway in front of an echo service")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Gateway config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = ftlog::builder()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logger: {}", e))?;

    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    info!(
        "[server] max_message_size={} text_chunk_size={} cors={}",
        config.max_message_size,
        config.text_chunk_size,
        config.cors.is_some()
    );

    let gateway = Gateway::new(EchoService::new(), config)?;
    server::run(args.listen, gateway).with_context(|| format!("server on {} failed", args.listen))
}
