//! GoS simulator CLI
//!
//! Run a path of active nodes losing and recovering GoS packets.
//!
//! # Example
//!
//! ```bash
//! # five nodes, 10% loss on every link, level 3 traffic
//! gos-sim --nodes 5 --packets 1000 --loss 10% --level 3 --cache 64KB
//!
//! # same run with the retransmission details
//! RUST_LOG=warn,gos=debug gos-sim --nodes 5 --loss 10% --seed 42
//! ```

use anyhow::Result;
use clap::Parser;
use gos::{CacheCapacity, GosLevel, LinkLoss, SimulationBuilder};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// GoS simulator
///
/// Runs a deterministic simulation of a single LSP crossing a chain of
/// active nodes. Reproducible when the same seed is used.
#[derive(Parser, Debug)]
#[command(name = "gos-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of active nodes on the path, ingress and egress included
    #[arg(short = 'n', long, default_value = "4")]
    nodes: usize,

    /// Number of packets to inject
    #[arg(short = 'p', long, default_value = "100")]
    packets: usize,

    /// Retransmission cache capacity of every node (e.g. `1KB`, `2MB`)
    #[arg(short = 'c', long, default_value = "1KB")]
    cache: CacheCapacity,

    /// GoS level of the traffic (`0` to `3`, e.g. `3+backup`)
    #[arg(short = 'l', long, default_value = "3")]
    level: GosLevel,

    /// Loss rate of every link (e.g. `5%`)
    #[arg(long, default_value = "0%")]
    loss: LinkLoss,

    /// Random seed for reproducible results
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Simulated time units elapsing at every step
    #[arg(long, default_value = "1000")]
    tick: u64,

    /// Number of flows sharing the LSP
    #[arg(long, default_value = "1")]
    flows: usize,

    /// Payload size of every packet, in bytes
    #[arg(long, default_value = "64")]
    payload: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,gos=info")),
        )
        .init();

    let args = Args::parse();

    info!(
        nodes = args.nodes,
        packets = args.packets,
        cache = %args.cache,
        level = %args.level,
        loss = %args.loss,
        seed = args.seed,
        "configuration"
    );

    let report = SimulationBuilder::new()
        .set_nodes(args.nodes)
        .set_cache_capacity(args.cache)
        .set_gos_level(args.level)
        .set_link_loss(args.loss)
        .set_seed(args.seed)
        .set_tick(args.tick)
        .set_flows(args.flows)
        .set_payload(args.payload)
        .build()?
        .run(args.packets)?;

    print!("{report}");

    Ok(())
}
