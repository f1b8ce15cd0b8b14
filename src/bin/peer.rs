//! `peerd`: a single mesh node — compute execution, key/value memory, file
//! storage, and the OS-simulation substrate underneath all three.

use clap::Parser;
use meshd::os::allocator::AllocStrategy;
use meshd::peer_server::PeerConfig;
use meshd::quota::QuotaPolicy;
use meshd::wire::Request;
use meshd::{dispatch_client, heartbeat, identity, server, Address, PeerServer, SchedulerDiscipline};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "peerd", about = "meshd peer: compute, memory, and file storage node")]
struct Args {
    /// Address this peer listens on and advertises to the tracker.
    #[arg(long, default_value = "0.0.0.0:0")]
    bind: String,

    /// Tracker address to register with.
    #[arg(long)]
    tracker: String,

    /// Directory for this peer's identity file, local files, and owned storage.
    #[arg(long, default_value = "./data/peer")]
    data_dir: std::path::PathBuf,

    /// Compute task dispatch discipline.
    #[arg(long, default_value = "fcfs")]
    scheduler: SchedulerDiscipline,

    /// Submission rate ceiling: max CPU_TASK submissions per sliding window.
    #[arg(long, default_value_t = QuotaPolicy::default().max_submissions_per_window)]
    max_cpu_tasks: usize,

    /// Max cumulative key count across memory and file storage.
    #[arg(long, default_value_t = QuotaPolicy::default().max_keys)]
    max_memory_keys: u64,

    /// Max cumulative bytes across memory and file storage.
    #[arg(long, default_value_t = QuotaPolicy::default().max_bytes)]
    max_storage_bytes: u64,

    /// Total bytes in this peer's simulated block-allocator arena.
    #[arg(long, default_value_t = 1024 * 1024)]
    arena_bytes: u64,

    /// Block allocator placement strategy.
    #[arg(long, default_value = "first_fit")]
    alloc_strategy: AllocStrategy,

    /// Seconds between heartbeats to the tracker.
    #[arg(long, default_value_t = heartbeat::DEFAULT_INTERVAL.as_secs())]
    heartbeat_interval: u64,

    /// Maximum number of concurrent inbound connections.
    #[arg(long, default_value_t = server::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let tracker = parse_address(&args.tracker)?;

    std::fs::create_dir_all(&args.data_dir)?;
    let identity = identity::load_or_generate(identity::default_identity_path(args.data_dir.clone()))?;

    // Bind once to let the OS assign a port (when `--bind` ends in :0), then
    // drop and let `server::serve` rebind the now-concrete address.
    let listener = std::net::TcpListener::bind(parse_address(&args.bind)?.to_socket_string())?;
    let bound_port = listener.local_addr()?.port();
    let advertised_host = args.bind.rsplit_once(':').map(|(h, _)| h).unwrap_or("0.0.0.0");
    let address = Address::new(advertised_host.to_string(), bound_port);
    drop(listener);

    tracing::info!(%identity, %address, %tracker, "peerd starting");

    dispatch_client::call_with_retry(
        &tracker,
        &Request::Register { identity, address: address.clone(), load: 0.0 },
        2,
    )?;

    let config = PeerConfig {
        identity,
        address: address.clone(),
        tracker: tracker.clone(),
        local_files_dir: args.data_dir.join("files"),
        owned_files_dir: args.data_dir.join("owned"),
        memory_bytes: args.arena_bytes,
        alloc_strategy: args.alloc_strategy,
        scheduler_discipline: args.scheduler,
        quota_policy: QuotaPolicy {
            max_submissions_per_window: args.max_cpu_tasks,
            max_keys: args.max_memory_keys,
            max_bytes: args.max_storage_bytes,
            ..QuotaPolicy::default()
        },
    };
    let peer = PeerServer::new(config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let current_address = Arc::new(Mutex::new(address.clone()));
    let _heartbeat = {
        let peer = peer.clone();
        heartbeat::spawn(
            tracker,
            identity,
            current_address,
            move || peer.scheduler.ready_len() as f64,
            shutdown.clone(),
            Duration::from_secs(args.heartbeat_interval),
        )
    };

    let dispatch = {
        let peer = peer.clone();
        move |request, peer_addr| peer.dispatch(request, peer_addr)
    };
    server::serve(&address, args.max_connections, dispatch, shutdown)?;
    Ok(())
}

fn parse_address(raw: &str) -> anyhow::Result<Address> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("expected host:port, got {raw:?}"))?;
    let port: u16 = port.parse()?;
    Ok(Address::new(host.to_string(), port))
}
