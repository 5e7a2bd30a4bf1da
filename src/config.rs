//! # Config
//!
//! Immutable description of one benchmark run. Every component receives the
//! pieces of [`BenchmarkConfig`] it needs as arguments; nothing is read from
//! process-wide state.
use crate::error::{BenchError, Result};
use std::fmt;
use std::str::FromStr;

/// Seed used for working-set fills unless overridden
pub const DEFAULT_SEED: u64 = 42;

/// Element type of the working-set arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    I32,
}

impl ElementType {
    /// Short code used on the command line and in output rows
    pub fn code(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::F32 => std::mem::size_of::<f32>(),
            ElementType::F64 => std::mem::size_of::<f64>(),
            ElementType::I32 => std::mem::size_of::<i32>(),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ElementType {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f32" | "float32" => Ok(ElementType::F32),
            "f64" | "float64" => Ok(ElementType::F64),
            "i32" | "int32" => Ok(ElementType::I32),
            other => Err(BenchError::config(format!(
                "unknown element type '{other}' (expected f32, f64 or i32)"
            ))),
        }
    }
}

/// Symbolic memory-hierarchy target a working set is sized against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLevel {
    L1Small,
    L1Full,
    L2,
    L3,
    Dram,
    /// Fixed ladder of element counts spanning every level
    Sweep,
}

impl MemoryLevel {
    pub const SIZED: [MemoryLevel; 5] = [
        MemoryLevel::L1Small,
        MemoryLevel::L1Full,
        MemoryLevel::L2,
        MemoryLevel::L3,
        MemoryLevel::Dram,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MemoryLevel::L1Small => "l1small",
            MemoryLevel::L1Full => "l1large",
            MemoryLevel::L2 => "l2",
            MemoryLevel::L3 => "l3",
            MemoryLevel::Dram => "dram",
            MemoryLevel::Sweep => "sweep",
        }
    }
}

impl fmt::Display for MemoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MemoryLevel {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l1small" | "l1" => Ok(MemoryLevel::L1Small),
            "l1large" | "l1full" => Ok(MemoryLevel::L1Full),
            "l2" => Ok(MemoryLevel::L2),
            "l3" => Ok(MemoryLevel::L3),
            "dram" => Ok(MemoryLevel::Dram),
            "sweep" => Ok(MemoryLevel::Sweep),
            other => Err(BenchError::config(format!(
                "unknown memory level '{other}' (expected l1small, l1large, l2, l3, dram or sweep)"
            ))),
        }
    }
}

/// Byte budget per memory level. Defaults describe a 6-core desktop part;
/// adjust per target hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudgets {
    pub l1_small: usize,
    pub l1_full: usize,
    pub l2: usize,
    pub l3: usize,
    pub dram: usize,
}

impl CacheBudgets {
    /// Flush region is this many times the last-level budget
    const FLUSH_FACTOR: usize = 4;

    /// Budget for a level, `None` for [`MemoryLevel::Sweep`]
    pub fn budget(&self, level: MemoryLevel) -> Option<usize> {
        match level {
            MemoryLevel::L1Small => Some(self.l1_small),
            MemoryLevel::L1Full => Some(self.l1_full),
            MemoryLevel::L2 => Some(self.l2),
            MemoryLevel::L3 => Some(self.l3),
            MemoryLevel::Dram => Some(self.dram),
            MemoryLevel::Sweep => None,
        }
    }

    /// Size of the region touched to evict the benchmark's data from every cache level
    pub fn flush_bytes(&self) -> usize {
        self.l3.saturating_mul(Self::FLUSH_FACTOR)
    }
}

impl Default for CacheBudgets {
    fn default() -> Self {
        CacheBudgets {
            l1_small: 32 * 1024,
            l1_full: 192 * 1024,
            l2: 512 * 1024,
            l3: 8 * 1024 * 1024,
            dram: 1 << 30,
        }
    }
}

/// Access-pattern family, without the generated index table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PatternKind {
    UnitStride,
    Strided,
    Gather,
    /// Seeded random permutation, visited every `stride` positions
    Shuffled,
}

impl PatternKind {
    pub fn label(self) -> &'static str {
        match self {
            PatternKind::UnitStride => "unit-stride",
            PatternKind::Strided => "strided",
            PatternKind::Gather => "gather",
            PatternKind::Shuffled => "shuffled",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pattern selection as requested by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub stride: usize,
}

impl PatternSpec {
    pub fn unit_stride() -> Self {
        PatternSpec {
            kind: PatternKind::UnitStride,
            stride: 1,
        }
    }

    pub fn strided(stride: usize) -> Self {
        PatternSpec {
            kind: PatternKind::Strided,
            stride,
        }
    }

    pub fn gather(stride: usize) -> Self {
        PatternSpec {
            kind: PatternKind::Gather,
            stride,
        }
    }

    pub fn shuffled(stride: usize) -> Self {
        PatternSpec {
            kind: PatternKind::Shuffled,
            stride,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(BenchError::config(format!(
                "{} pattern requires a positive stride",
                self.kind
            )));
        }
        Ok(())
    }
}

impl Default for PatternSpec {
    fn default() -> Self {
        PatternSpec::unit_stride()
    }
}

/// Pre-conditions applied around every timed kernel call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessMode {
    /// Run the kernel once untimed before the timed call
    pub warm_up: bool,
    /// Evict cached state right before the timed call
    pub flush: bool,
}

impl HarnessMode {
    /// Cache-level sweep: every run is timed, including the first
    pub fn sweep() -> Self {
        HarnessMode {
            warm_up: false,
            flush: false,
        }
    }

    /// Cache-miss / TLB study: warm up, flush, then time a cold access
    pub fn cache_miss() -> Self {
        HarnessMode {
            warm_up: true,
            flush: true,
        }
    }
}

impl Default for HarnessMode {
    fn default() -> Self {
        HarnessMode::sweep()
    }
}

/// Full description of a benchmark run
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
    pub element_type: ElementType,
    /// Cache-line aligned arrays, otherwise views offset by one element
    pub aligned: bool,
    /// Append [`crate::sizer::TAIL_ELEMENTS`] to every sized element count
    pub tail: bool,
    pub pattern: PatternSpec,
    pub memory_level: MemoryLevel,
    /// Number of co-resident arrays the sizer divides the budget between
    pub array_count: usize,
    pub repetitions: usize,
    pub mode: HarnessMode,
    pub large_pages: bool,
    pub budgets: CacheBudgets,
    pub seed: u64,
}

impl BenchmarkConfig {
    pub fn new(element_type: ElementType, memory_level: MemoryLevel) -> Self {
        BenchmarkConfig {
            element_type,
            aligned: true,
            tail: false,
            pattern: PatternSpec::default(),
            memory_level,
            array_count: 2,
            repetitions: 10,
            mode: HarnessMode::default(),
            large_pages: false,
            budgets: CacheBudgets::default(),
            seed: DEFAULT_SEED,
        }
    }

    /// Reject configurations that cannot produce a single measurement
    pub fn validate(&self) -> Result<()> {
        if self.repetitions == 0 {
            return Err(BenchError::config("repetitions must be at least 1"));
        }
        if self.array_count == 0 {
            return Err(BenchError::config("array count must be at least 1"));
        }
        self.pattern.validate()
    }
}
