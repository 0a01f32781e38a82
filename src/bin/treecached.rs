//! Coherency daemon: one server per participating host.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use treecache::config::Config;
use treecache::{CoherencyEngine, CoherencyServer, MemoryStore, TcpTransport, telemetry};

#[derive(Parser, Debug)]
#[command(name = "treecached", about = "tree cache coherency daemon")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "treecache.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config load failed: {err}");
            std::process::exit(1);
        }
    };
    telemetry::init(&config.logging, args.verbose);

    if let Err(err) = run(config) {
        tracing::error!("treecached failed: {err}");
        std::process::exit(1);
    }
}

fn run(config: Config) -> treecache::Result<()> {
    let this_peer = config.coherency.this_peer;
    let peers = config.coherency.peer_table()?;

    let store = Arc::new(MemoryStore::new(this_peer));
    let transport = Arc::new(TcpTransport::new(this_peer, peers, config.limits.clone()));
    transport.set_enabled(config.coherency.enabled);
    let engine = Arc::new(CoherencyEngine::new(
        store,
        transport,
        config.limits.clone(),
    ));

    let server = CoherencyServer::bind(&config.coherency.listen_addr, config.limits)?;
    tracing::info!(
        addr = %server.local_addr(),
        peer = %this_peer,
        "coherency server listening"
    );
    let handle = server.start(engine)?;
    handle.join();
    Ok(())
}
