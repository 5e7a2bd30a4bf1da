//! Peak FMA Throughput
//!
//! Runs chains of 256-bit fused multiply-adds on independent accumulators,
//! decoupled from memory, to measure the core's arithmetic ceiling.

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use memhier_bench::fma::{ACCUMULATORS, FLOPS_PER_ITERATION, fma_peak};
use memhier_bench::platform::{HostPlatform, pin_execution};

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "fma_peak", about = "Peak single-core FMA throughput")]
struct Args {
    /// Loop iterations; each one issues one FMA per accumulator
    iterations: u64,

    /// CPU core to pin the measurement to
    #[arg(default_value_t = 0)]
    core: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    pin_execution(&HostPlatform, Some(args.core));

    info!(
        "{} accumulators, {} FLOPs per iteration",
        ACCUMULATORS, FLOPS_PER_ITERATION
    );
    let report = fma_peak(args.iterations);
    if !report.vectorized {
        warn!("AVX2/FMA not detected; measured the portable path");
    }

    println!(
        "iters={} time={:.6} s GFLOPS={:.2} (core={})",
        report.iterations, report.elapsed_secs, report.gflops, args.core
    );
    Ok(())
}
