//! Kernel Throughput vs. Memory Level
//!
//! Sizes SAXPY, dot, multiply and stencil working sets against a level of the
//! memory hierarchy (or sweeps across all of them) and writes one CSV row per
//! timed run.
//!
//! Usage: `kernel_sweep [VARIANT] TYPE LEVEL [flags]`. The optional leading
//! variant label (e.g. the build flavor) only ends up in the default output
//! file name.

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use memhier_bench::config::CacheBudgets;
use memhier_bench::driver::{execute_plan, sweep_plan};
use memhier_bench::output::{CsvSink, default_output_name};
use memhier_bench::platform::{HostPlatform, Platform, pin_execution};
use memhier_bench::{BenchmarkConfig, ElementType, HarnessMode, MemoryLevel, PatternSpec};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "kernel_sweep", about = "Kernel throughput across the memory hierarchy")]
struct Args {
    /// Optional variant label, then the element type (f32, f64 or i32) and
    /// the working-set target (l1small, l1large, l2, l3, dram or sweep)
    #[arg(value_name = "ARGS", required = true)]
    targets: Vec<String>,

    /// Cache-line align every array (default)
    #[arg(long, overrides_with = "misaligned")]
    aligned: bool,

    /// Offset every array by one element instead of cache-line aligning it
    #[arg(long, overrides_with = "aligned")]
    misaligned: bool,

    /// Append tail elements so N is not a multiple of the vector width
    #[arg(long, overrides_with = "no_tail")]
    tail: bool,

    #[arg(long, overrides_with = "tail")]
    no_tail: bool,

    /// Contiguous access (default)
    #[arg(long, conflicts_with_all = ["stride", "gather"])]
    unit_stride: bool,

    /// Strided access with the given stride
    #[arg(long, conflicts_with = "gather")]
    stride: Option<usize>,

    /// Gather access through an (i * stride) mod N index table
    #[arg(long)]
    gather: Option<usize>,

    /// Timed runs per kernel
    #[arg(long, default_value_t = 10)]
    runs: usize,

    /// Arrays the memory-level budget is divided between
    #[arg(long, default_value_t = 2)]
    arrays: usize,

    /// Evict caches before every timed run
    #[arg(long)]
    flush: bool,

    /// Back working sets with large pages
    #[arg(long)]
    large_pages: bool,

    /// CPU core to pin the measurement to
    #[arg(long, default_value_t = 0)]
    core: usize,

    /// Seed for the working-set fill
    #[arg(long, default_value_t = memhier_bench::config::DEFAULT_SEED)]
    seed: u64,

    /// CSV destination (default: arguments joined with '_')
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    l1_small_kib: Option<usize>,
    #[arg(long)]
    l1_full_kib: Option<usize>,
    #[arg(long)]
    l2_kib: Option<usize>,
    #[arg(long)]
    l3_kib: Option<usize>,
    #[arg(long)]
    dram_mib: Option<usize>,
}

impl Args {
    fn budgets(&self) -> CacheBudgets {
        let defaults = CacheBudgets::default();
        CacheBudgets {
            l1_small: self.l1_small_kib.map_or(defaults.l1_small, |k| k * 1024),
            l1_full: self.l1_full_kib.map_or(defaults.l1_full, |k| k * 1024),
            l2: self.l2_kib.map_or(defaults.l2, |k| k * 1024),
            l3: self.l3_kib.map_or(defaults.l3, |k| k * 1024),
            dram: self.dram_mib.map_or(defaults.dram, |m| m * 1024 * 1024),
        }
    }

    /// Split the positionals into (variant, element type, level)
    fn targets(&self) -> Result<(Option<&str>, ElementType, MemoryLevel)> {
        let (variant, element_type, level) = match self.targets.as_slice() {
            [variant, element_type, level] => (Some(variant.as_str()), element_type, level),
            [element_type, level] => (None, element_type, level),
            other => bail!("expected [VARIANT] TYPE LEVEL, got {} argument(s)", other.len()),
        };
        Ok((variant, element_type.parse()?, level.parse()?))
    }

    fn config(&self) -> Result<BenchmarkConfig> {
        let (_, element_type, level) = self.targets()?;
        let pattern = match (self.unit_stride, self.stride, self.gather) {
            (true, _, _) => PatternSpec::unit_stride(),
            (false, Some(stride), _) => PatternSpec::strided(stride),
            (false, None, Some(stride)) => PatternSpec::gather(stride),
            (false, None, None) => PatternSpec::unit_stride(),
        };
        Ok(BenchmarkConfig {
            aligned: self.aligned || !self.misaligned,
            tail: self.tail && !self.no_tail,
            pattern,
            array_count: self.arrays,
            repetitions: self.runs,
            mode: HarnessMode {
                flush: self.flush,
                ..HarnessMode::sweep()
            },
            large_pages: self.large_pages,
            budgets: self.budgets(),
            seed: self.seed,
            ..BenchmarkConfig::new(element_type, level)
        })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cmdline: Vec<String> = std::env::args().collect();
    let args = Args::parse();
    let config = args.config()?;
    config.validate()?;
    if let (Some(variant), _, _) = args.targets()? {
        info!("Variant: {variant}");
    }

    let platform = HostPlatform;
    pin_execution(&platform, Some(args.core));
    if config.large_pages {
        if let Err(e) = platform.acquire_lock_pages_privilege() {
            warn!("Large-page privilege unavailable, large-page allocations may fail: {e}");
        }
    }

    let plan = sweep_plan(&config)?;
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(default_output_name(&cmdline)));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut sink = CsvSink::new(BufWriter::new(file))?;

    info!(
        "Running {} configuration(s): {} {} {}, stride {}",
        plan.len(),
        config.element_type,
        config.memory_level,
        config.pattern.kind,
        config.pattern.stride
    );
    let summary = execute_plan(&config, &plan, &platform, &mut sink)?;
    info!(
        "Wrote {} records from {} configuration(s) to {} ({} skipped)",
        summary.records,
        summary.configurations,
        path.display(),
        summary.skipped
    );
    Ok(())
}
