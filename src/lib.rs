//! Single-core micro-benchmarks of memory-hierarchy and FMA throughput.
pub mod config;
pub mod driver;
pub mod element;
pub mod error;
pub mod fma;
pub mod kernels;
pub mod memory;
pub mod output;
pub mod pattern;
pub mod platform;
pub mod runner;
pub mod sizer;

pub use config::{BenchmarkConfig, ElementType, HarnessMode, MemoryLevel, PatternKind, PatternSpec};
pub use error::{BenchError, Result};

/// Binary units, largest first
const UNITS: [(u64, &str); 3] = [(1 << 30, "GiB"), (1 << 20, "MiB"), (1 << 10, "KiB")];

fn unit_of(bytes: u64) -> (u64, &'static str) {
    UNITS
        .iter()
        .copied()
        .find(|&(scale, _)| bytes >= scale)
        .unwrap_or((1, "B"))
}

/// Convert number of bytes to formatted string
pub fn format_bytes(bytes: u64) -> String {
    match unit_of(bytes) {
        (1, unit) => format!("{bytes} {unit}"),
        (scale, unit) => format!("{:.2} {unit}", bytes as f64 / scale as f64),
    }
}

/// Whole units in a 4-wide column, for console tables
pub fn format_bytes_fixed(bytes: u64) -> String {
    let (scale, unit) = unit_of(bytes);
    format!("{:>4} {unit}", bytes / scale)
}
