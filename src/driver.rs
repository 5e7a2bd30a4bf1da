//! # Driver
//!
//! Builds measurement plans and executes them. A plan is an ordered list of
//! [`Configuration`]s; each one gets a freshly allocated and seeded working
//! set, one access pattern shared by all of its kernels, and a
//! [`TrialRunner`] pass per kernel.
//!
//! Configurations whose resources are unavailable (large pages unsupported,
//! not reserved, mapping refused) are skipped with a warning. Any other error
//! aborts the plan.
use crate::config::{BenchmarkConfig, ElementType, PatternSpec};
use crate::element::Element;
use crate::error::Result;
use crate::format_bytes;
use crate::kernels::Kernel;
use crate::memory::WorkingSet;
use crate::output::RecordSink;
use crate::platform::Platform;
use crate::runner::{RecordContext, RunRecord, TrialRunner};
use crate::sizer::{size_for, with_tail};
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Per-array sizes probed by the cache-miss study
pub const CACHE_MISS_BYTES: [usize; 8] = [
    1024,
    4 * 1024,
    16 * 1024,
    64 * 1024,
    256 * 1024,
    1024 * 1024,
    4 * 1024 * 1024,
    16 * 1024 * 1024,
];
pub const CACHE_MISS_STRIDES: [usize; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Per-array sizes of the regular-page TLB configurations
pub const TLB_REGULAR_BYTES: [usize; 6] = [
    4 * 1024,
    8 * 1024,
    32 * 1024,
    64 * 1024,
    256 * 1024,
    1024 * 1024,
];
/// Large-page TLB configurations, in multiples of the large-page size
pub const TLB_LARGE_PAGE_MULTIPLES: [usize; 6] = [1, 2, 4, 8, 16, 32];
/// Stand-in page size when the platform reports no large-page support
pub const NOMINAL_LARGE_PAGE: usize = 2 * 1024 * 1024;

/// One working-set instantiation and the kernels run over it
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// Elements per array, tail included
    pub n: usize,
    pub pattern: PatternSpec,
    pub large_pages: bool,
    pub memory_level: String,
    pub kernels: Vec<Kernel>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub configurations: usize,
    pub records: usize,
    pub skipped: usize,
}

/// Cache-level sweep: every kernel over each element count the memory level sizes to
pub fn sweep_plan(config: &BenchmarkConfig) -> Result<Vec<Configuration>> {
    config.validate()?;
    let counts = size_for(
        config.memory_level,
        config.element_type.size_bytes(),
        config.array_count,
        &config.budgets,
    )?;
    Ok(counts
        .into_iter()
        .map(|n| Configuration {
            n: with_tail(n, config.tail),
            pattern: config.pattern,
            large_pages: config.large_pages,
            memory_level: config.memory_level.label().to_string(),
            kernels: Kernel::ALL.to_vec(),
        })
        .collect())
}

/// SAXPY over every (size, stride, sequential/shuffled) combination
pub fn cache_miss_plan(config: &BenchmarkConfig) -> Vec<Configuration> {
    let element_size = config.element_type.size_bytes();
    let mut plan = Vec::with_capacity(CACHE_MISS_BYTES.len() * CACHE_MISS_STRIDES.len() * 2);
    for bytes in CACHE_MISS_BYTES {
        for stride in CACHE_MISS_STRIDES {
            for shuffled in [false, true] {
                let pattern = match (shuffled, stride) {
                    (true, _) => PatternSpec::shuffled(stride),
                    (false, 1) => PatternSpec::unit_stride(),
                    (false, _) => PatternSpec::strided(stride),
                };
                plan.push(Configuration {
                    n: with_tail(bytes / element_size, config.tail),
                    pattern,
                    large_pages: false,
                    memory_level: "cache-miss".to_string(),
                    kernels: vec![Kernel::Saxpy],
                });
            }
        }
    }
    plan
}

/// Unit-stride SAXPY on regular pages, then on large pages.
///
/// Large-page configurations are planned even when `large_page_size` is
/// `None`; they are skipped at allocation time.
pub fn tlb_plan(config: &BenchmarkConfig, large_page_size: Option<usize>) -> Vec<Configuration> {
    let element_size = config.element_type.size_bytes();
    let page = large_page_size.unwrap_or(NOMINAL_LARGE_PAGE);

    let regular = TLB_REGULAR_BYTES.iter().map(|&bytes| (bytes, false));
    let large = TLB_LARGE_PAGE_MULTIPLES.iter().map(|&m| (m * page, true));
    regular
        .chain(large)
        .map(|(bytes, large_pages)| Configuration {
            n: with_tail(bytes / element_size, config.tail),
            pattern: PatternSpec::unit_stride(),
            large_pages,
            memory_level: if large_pages { "tlb-large" } else { "tlb-regular" }.to_string(),
            kernels: vec![Kernel::Saxpy],
        })
        .collect()
}

/// Randomize execution order so slow drift doesn't correlate with size
pub fn shuffle_plan(plan: &mut [Configuration], seed: u64) {
    plan.shuffle(&mut StdRng::seed_from_u64(seed));
}

/// Run every configuration of `plan`, handing records to `sink` as each configuration completes
pub fn execute_plan<P, S>(
    config: &BenchmarkConfig,
    plan: &[Configuration],
    platform: &P,
    sink: &mut S,
) -> Result<RunSummary>
where
    P: Platform + ?Sized,
    S: RecordSink + ?Sized,
{
    config.validate()?;
    match config.element_type {
        ElementType::F32 => execute_typed::<f32, P, S>(config, plan, platform, sink),
        ElementType::F64 => execute_typed::<f64, P, S>(config, plan, platform, sink),
        ElementType::I32 => execute_typed::<i32, P, S>(config, plan, platform, sink),
    }
}

fn execute_typed<T, P, S>(
    config: &BenchmarkConfig,
    plan: &[Configuration],
    platform: &P,
    sink: &mut S,
) -> Result<RunSummary>
where
    T: Element,
    P: Platform + ?Sized,
    S: RecordSink + ?Sized,
{
    let mut runner = TrialRunner::new(config.mode, config.budgets.flush_bytes())?;
    if config.mode.flush {
        let bytes = config.budgets.flush_bytes() as u64;
        info!("Flushing {} before every timed run", format_bytes(bytes));
    }

    let mut summary = RunSummary::default();
    for configuration in plan {
        match run_configuration::<T, P>(config, configuration, platform, &mut runner) {
            Ok(records) => {
                summary.configurations += 1;
                summary.records += records.len();
                for record in records {
                    sink.append(record)?;
                }
            }
            Err(e) if e.is_recoverable() => {
                warn!(
                    "Skipping {} configuration with N = {}: {e}",
                    configuration.memory_level, configuration.n
                );
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    sink.finish()?;
    Ok(summary)
}

fn run_configuration<T, P>(
    config: &BenchmarkConfig,
    configuration: &Configuration,
    platform: &P,
    runner: &mut TrialRunner,
) -> Result<Vec<RunRecord>>
where
    T: Element,
    P: Platform + ?Sized,
{
    let n = configuration.n;
    info!(
        "Array size N = {n} ({} per array, {}{})",
        format_bytes((n * std::mem::size_of::<T>()) as u64),
        configuration.pattern.kind,
        if configuration.large_pages { ", large pages" } else { "" }
    );

    let pattern = configuration.pattern.generate(n)?;
    let mut ws = WorkingSet::<T>::allocate_for(
        platform,
        n,
        config.aligned,
        configuration.large_pages,
        &configuration.kernels,
    )?;
    ws.fill(config.seed);

    let ctx = RecordContext {
        n,
        element_type: T::TYPE,
        aligned: config.aligned,
        tail: config.tail,
        access: pattern.kind(),
        stride: pattern.stride(),
        memory_level: configuration.memory_level.clone(),
    };

    let mut records = Vec::with_capacity(configuration.kernels.len() * config.repetitions);
    for &kernel in &configuration.kernels {
        records.extend(runner.run(kernel, &mut ws, &pattern, config.repetitions, &ctx)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryLevel, PatternKind};
    use crate::pattern::AccessPattern;
    use crate::sizer::{SWEEP_ELEMENT_COUNTS, TAIL_ELEMENTS};

    #[test]
    fn sweep_plan_uses_sizer() {
        let mut config = BenchmarkConfig::new(ElementType::F64, MemoryLevel::L2);
        config.tail = true;
        let plan = sweep_plan(&config).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].n, 512 * 1024 / 16 + TAIL_ELEMENTS);
        assert_eq!(plan[0].kernels, Kernel::ALL.to_vec());
        assert_eq!(plan[0].memory_level, "l2");

        config.memory_level = MemoryLevel::Sweep;
        config.tail = false;
        let counts: Vec<usize> = sweep_plan(&config).unwrap().iter().map(|c| c.n).collect();
        assert_eq!(counts, SWEEP_ELEMENT_COUNTS.to_vec());
    }

    #[test]
    fn cache_miss_plan_covers_every_combination() {
        let config = BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small);
        let plan = cache_miss_plan(&config);
        assert_eq!(plan.len(), 8 * 7 * 2);
        assert_eq!(plan[0].n, 256);
        assert_eq!(plan[0].pattern, PatternSpec::unit_stride());
        assert_eq!(plan[1].pattern, PatternSpec::shuffled(1));
        assert_eq!(plan[2].pattern, PatternSpec::strided(2));
        assert!(plan.iter().all(|c| !c.large_pages && c.kernels == vec![Kernel::Saxpy]));
        assert_eq!(
            plan.iter().filter(|c| c.pattern.kind == PatternKind::Shuffled).count(),
            8 * 7
        );
    }

    #[test]
    fn cache_miss_random_half_is_not_a_strided_walk() {
        let config = BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small);
        for c in cache_miss_plan(&config)
            .iter()
            .filter(|c| c.pattern.kind == PatternKind::Shuffled && c.n == 4096)
        {
            let stride = c.pattern.stride;
            let pattern = c.pattern.generate(c.n).unwrap();
            assert_eq!(pattern.visits(c.n), c.n / stride);
            let AccessPattern::Gather(table) = &pattern else {
                panic!("expected a table, got {pattern:?}");
            };
            let mut distinct = table.indices().to_vec();
            distinct.sort_unstable();
            distinct.dedup();
            assert_eq!(distinct.len(), c.n / stride);
            assert!(table.indices().windows(2).any(|w| w[0] > w[1]));
        }
    }

    #[test]
    fn tlb_plan_falls_back_to_nominal_page() {
        let config = BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small);
        let plan = tlb_plan(&config, None);
        assert_eq!(plan.len(), 12);
        let large: Vec<usize> = plan.iter().filter(|c| c.large_pages).map(|c| c.n).collect();
        assert_eq!(large[0], NOMINAL_LARGE_PAGE / 4);
        assert_eq!(large[5], 32 * NOMINAL_LARGE_PAGE / 4);

        let plan = tlb_plan(&config, Some(1 << 30));
        assert_eq!(plan.iter().find(|c| c.large_pages).unwrap().n, (1 << 30) / 4);
    }

    #[test]
    fn shuffle_is_seeded() {
        let config = BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small);
        let mut a = cache_miss_plan(&config);
        let mut b = cache_miss_plan(&config);
        shuffle_plan(&mut a, 9);
        shuffle_plan(&mut b, 9);
        assert_eq!(a, b);
        assert_ne!(a, cache_miss_plan(&config));
    }
}
