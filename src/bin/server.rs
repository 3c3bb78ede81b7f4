//! BlockVault Server Binary
//!
//! Opens a store and serves it over TCP.

use std::net::IpAddr;
use std::sync::Arc;

use blockvault::auth::{AllowAll, Authorizer, ReadOnly, WriterAcl};
use blockvault::backend::{Backend, Limit, Registry, Verify};
use blockvault::network::{Server, Service};
use blockvault::Config;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// BlockVault Server
#[derive(Parser, Debug)]
#[command(name = "blockvault-server")]
#[command(about = "Content-addressable block store server")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, env = "BLOCKVAULT_DATA_DIR", default_value = "./blockvault_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, env = "BLOCKVAULT_LISTEN", default_value = "127.0.0.1:7070")]
    listen: String,

    /// Block size in bytes (fixed when the store is created)
    #[arg(short, long, env = "BLOCKVAULT_BLOCK_SIZE", default_value = "65536")]
    block_size: usize,

    /// Maximum number of stored blocks
    #[arg(short = 'n', long, env = "BLOCKVAULT_CAPACITY", default_value = "1000000")]
    capacity: u32,

    /// Address bytes used as directory levels
    #[arg(long, env = "BLOCKVAULT_DEPTH", default_value = "1")]
    depth: u8,

    /// Address bytes merged into each bucket file name
    #[arg(long, env = "BLOCKVAULT_WIDTH", default_value = "0")]
    width: u8,

    /// Each bucket file holds 2^N slots
    #[arg(long, env = "BLOCKVAULT_SLOTS_LOG2", default_value = "16")]
    slots_log2: u8,

    /// Serve reads only
    #[arg(long, env = "BLOCKVAULT_READ_ONLY")]
    read_only: bool,

    /// Only these addresses may put or remove (repeatable)
    #[arg(long = "writer", value_name = "IP")]
    writers: Vec<IpAddr>,

    /// Re-hash every block served
    #[arg(long, env = "BLOCKVAULT_VERIFY")]
    verify: bool,

    /// Refuse new blocks beyond this count
    #[arg(long, env = "BLOCKVAULT_MAX_BLOCKS")]
    max_blocks: Option<u64>,

    /// Connections queued for a worker before new ones are refused
    #[arg(short, long, env = "BLOCKVAULT_MAX_CONNECTIONS", default_value = "1024")]
    max_connections: usize,

    /// Worker threads
    #[arg(short, long, env = "BLOCKVAULT_WORKERS", default_value = "8")]
    workers: usize,

    /// Name the store is registered under
    #[arg(long, env = "BLOCKVAULT_BACKEND", default_value = "default")]
    backend: String,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blockvault=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("BlockVault Server v{}", blockvault::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .block_size(args.block_size)
        .num_total(args.capacity)
        .depth(args.depth)
        .width(args.width)
        .max_slots_log2(args.slots_log2)
        .read_only(args.read_only)
        .max_connections(args.max_connections)
        .workers(args.workers)
        .build();

    if let Err(e) = run(args, config) {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args, config: Config) -> blockvault::Result<()> {
    let registry = Registry::new();
    let mut backend = registry.open_engine(&args.backend, config.clone())?;
    tracing::info!("Engine {:?} initialized successfully", args.backend);

    if let Some(max_blocks) = args.max_blocks {
        backend = Arc::new(Limit::new(backend, max_blocks));
    }
    if args.verify {
        backend = Arc::new(Verify::new(backend));
    }
    let stat = backend.stat()?;
    tracing::info!("{} of {} blocks in use", stat.used, stat.total);

    let authorizer: Arc<dyn Authorizer> = if args.read_only {
        Arc::new(ReadOnly)
    } else if !args.writers.is_empty() {
        tracing::info!("Writes restricted to {:?}", args.writers);
        Arc::new(WriterAcl::new(args.writers))
    } else {
        Arc::new(AllowAll)
    };

    let service = Arc::new(Service::new(backend, authorizer));
    let server = Server::bind(&config, service)?;
    server.run()
}
