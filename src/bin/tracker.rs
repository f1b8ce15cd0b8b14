//! `trackerd`: the singleton coordinator peers register with.

use clap::Parser;
use meshd::tracker::{janitor, TrackerService};
use meshd::{server, Address};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "trackerd", about = "meshd tracker: peer directory and owned-file registry")]
struct Args {
    /// Address to bind the TCP listener on.
    #[arg(long, default_value = "0.0.0.0:7420")]
    bind: String,

    /// Seconds a peer can go without a heartbeat before the janitor evicts it.
    #[arg(long, default_value_t = meshd::tracker::registry::STALENESS_SECS)]
    peer_timeout: u64,

    /// How often the janitor sweeps for stale peers.
    #[arg(long, default_value_t = janitor::DEFAULT_SWEEP_INTERVAL.as_secs())]
    janitor_interval: u64,

    /// Directory holding the owned-file directory's persisted state.
    #[arg(long, default_value = "./data/tracker")]
    data_dir: std::path::PathBuf,

    /// Maximum number of concurrent inbound connections.
    #[arg(long, default_value_t = server::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let bind_address = parse_address(&args.bind)?;

    std::fs::create_dir_all(&args.data_dir)?;
    let persist_path = args.data_dir.join("owned_files.json");
    let service = Arc::new(TrackerService::new(persist_path)?);

    let shutdown = Arc::new(AtomicBool::new(false));
    let _janitor = janitor::spawn(
        service.registry.clone(),
        shutdown.clone(),
        Duration::from_secs(args.janitor_interval),
        args.peer_timeout,
    );

    tracing::info!(bind = %bind_address, "trackerd starting");
    let dispatch = {
        let service = service.clone();
        move |request, _peer_addr: Option<std::net::SocketAddr>| service.dispatch(request)
    };
    server::serve(&bind_address, args.max_connections, dispatch, shutdown)?;
    Ok(())
}

fn parse_address(raw: &str) -> anyhow::Result<Address> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got {raw:?}"))?;
    let port: u16 = port.parse()?;
    Ok(Address::new(host.to_string(), port))
}
