use memhier_bench::driver::{Configuration, execute_plan, sweep_plan, tlb_plan};
use memhier_bench::kernels::Kernel;
use memhier_bench::output::CsvSink;
use memhier_bench::platform::{PageRegion, Platform};
use memhier_bench::runner::RunRecord;
use memhier_bench::sizer::TAIL_ELEMENTS;
use memhier_bench::{
    BenchError, BenchmarkConfig, ElementType, HarnessMode, MemoryLevel, PatternKind, PatternSpec,
};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::cell::Cell;
use std::ptr::NonNull;

const PAGE: usize = 4096;

/// Platform without large-page support
struct NoLargePages;

impl Platform for NoLargePages {
    fn pin_to_core(&self, _core: usize) -> memhier_bench::Result<()> {
        Ok(())
    }

    fn raise_priority(&self) -> memhier_bench::Result<()> {
        Ok(())
    }

    fn large_page_size(&self) -> Option<usize> {
        None
    }

    fn acquire_lock_pages_privilege(&self) -> memhier_bench::Result<()> {
        Err(BenchError::unavailable("no privilege"))
    }

    fn allocate_pages(&self, _bytes: usize) -> memhier_bench::Result<PageRegion> {
        panic!("must not map pages when the size query reports unsupported");
    }
}

/// Platform whose "large pages" are page-aligned heap blocks
struct HeapPages {
    mapped: Cell<usize>,
}

unsafe fn release_heap_pages(ptr: NonNull<u8>, len: usize) {
    unsafe { dealloc(ptr.as_ptr(), Layout::from_size_align_unchecked(len, PAGE)) }
}

impl Platform for HeapPages {
    fn pin_to_core(&self, _core: usize) -> memhier_bench::Result<()> {
        Ok(())
    }

    fn raise_priority(&self) -> memhier_bench::Result<()> {
        Ok(())
    }

    fn large_page_size(&self) -> Option<usize> {
        Some(PAGE)
    }

    fn acquire_lock_pages_privilege(&self) -> memhier_bench::Result<()> {
        Ok(())
    }

    fn allocate_pages(&self, bytes: usize) -> memhier_bench::Result<PageRegion> {
        assert_eq!(bytes % PAGE, 0, "requests are rounded to whole pages");
        let layout = Layout::from_size_align(bytes, PAGE).unwrap();
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).unwrap();
        self.mapped.set(self.mapped.get() + 1);
        Ok(unsafe { PageRegion::from_raw_parts(ptr, bytes, release_heap_pages) })
    }
}

fn configuration(n: usize, pattern: PatternSpec, large_pages: bool) -> Configuration {
    Configuration {
        n,
        pattern,
        large_pages,
        memory_level: "test".to_string(),
        kernels: Kernel::ALL.to_vec(),
    }
}

#[test]
fn l1_small_float_saxpy_scenario() {
    let config = BenchmarkConfig {
        repetitions: 2,
        ..BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small)
    };
    let plan = sweep_plan(&config).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].n, 4096);

    let mut records: Vec<RunRecord> = Vec::new();
    let summary = execute_plan(&config, &plan, &NoLargePages, &mut records).unwrap();
    assert_eq!(summary.configurations, 1);
    assert_eq!(summary.records, 4 * 2);
    assert_eq!(summary.skipped, 0);

    let saxpy: Vec<&RunRecord> = records.iter().filter(|r| r.kernel == "SAXPY").collect();
    assert_eq!(saxpy.len(), 2);
    for (i, r) in saxpy.iter().enumerate() {
        assert_eq!(r.run, i);
        assert_eq!(r.n, 4096);
        assert_eq!(r.access, PatternKind::UnitStride);
        assert_eq!(r.access.label(), "unit-stride");
        assert_eq!(r.stride, 1);
        assert_eq!(r.element_type, ElementType::F32);
        assert_eq!(r.memory_level, "l1small");
        assert!(r.aligned && !r.tail);
    }
}

#[test]
fn records_round_trip_their_throughput() {
    let config = BenchmarkConfig {
        repetitions: 3,
        aligned: false,
        tail: true,
        pattern: PatternSpec::strided(4),
        ..BenchmarkConfig::new(ElementType::F64, MemoryLevel::L1Small)
    };
    let plan = sweep_plan(&config).unwrap();
    let mut records: Vec<RunRecord> = Vec::new();
    execute_plan(&config, &plan, &NoLargePages, &mut records).unwrap();

    assert_eq!(records.len(), 4 * 3);
    for r in &records {
        let flops = Kernel::ALL
            .iter()
            .find(|k| k.name() == r.kernel)
            .unwrap()
            .flops_per_element();
        let expected = flops * r.n as f64 / r.elapsed_secs / 1e9;
        assert!(r.gflops.is_finite());
        assert!((r.gflops - expected).abs() <= 1e-9 * expected.max(1.0));
        assert_eq!(r.n, 32 * 1024 / 16 + TAIL_ELEMENTS);
        assert_eq!((r.access, r.stride), (PatternKind::Strided, 4));
        assert!(!r.aligned && r.tail);
    }
}

#[test]
fn unsupported_large_pages_skip_only_their_configuration() {
    let config = BenchmarkConfig {
        repetitions: 1,
        ..BenchmarkConfig::new(ElementType::I32, MemoryLevel::L1Small)
    };
    let plan = vec![
        configuration(512, PatternSpec::unit_stride(), false),
        configuration(512, PatternSpec::unit_stride(), true),
        configuration(300, PatternSpec::gather(3), false),
    ];

    let mut records: Vec<RunRecord> = Vec::new();
    let summary = execute_plan(&config, &plan, &NoLargePages, &mut records).unwrap();
    assert_eq!(summary.configurations, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(records.len(), 2 * 4);
    assert!(records.iter().any(|r| r.n == 300 && r.access == PatternKind::Gather));
}

#[test]
fn tlb_plan_runs_with_large_pages_when_available() {
    let config = BenchmarkConfig {
        repetitions: 1,
        mode: HarnessMode::cache_miss(),
        ..BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small)
    };
    let platform = HeapPages {
        mapped: Cell::new(0),
    };
    let plan = tlb_plan(&config, platform.large_page_size());

    let mut records: Vec<RunRecord> = Vec::new();
    let summary = execute_plan(&config, &plan, &platform, &mut records).unwrap();
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.configurations, 12);
    // SAXPY needs only x and y per large-page configuration
    assert_eq!(platform.mapped.get(), 6 * 2);
    assert!(records.iter().all(|r| r.kernel == "SAXPY"));
    assert_eq!(records.iter().filter(|r| r.memory_level == "tlb-large").count(), 6);
}

#[test]
fn tlb_plan_skips_large_pages_when_unsupported() {
    let config = BenchmarkConfig {
        repetitions: 1,
        mode: HarnessMode::cache_miss(),
        ..BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small)
    };
    let plan = tlb_plan(&config, NoLargePages.large_page_size());
    let mut records: Vec<RunRecord> = Vec::new();
    let summary = execute_plan(&config, &plan, &NoLargePages, &mut records).unwrap();
    assert_eq!(summary.skipped, 6);
    assert_eq!(summary.configurations, 6);
    assert!(records.iter().all(|r| r.memory_level == "tlb-regular"));
}

#[test]
fn zero_stride_aborts_the_plan() {
    let config = BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small);
    let plan = vec![
        configuration(64, PatternSpec::unit_stride(), false),
        configuration(64, PatternSpec::strided(0), false),
    ];
    let mut records: Vec<RunRecord> = Vec::new();
    let result = execute_plan(&config, &plan, &NoLargePages, &mut records);
    assert!(matches!(result, Err(BenchError::Configuration(_))));

    let invalid = BenchmarkConfig {
        repetitions: 0,
        ..config
    };
    assert!(matches!(
        execute_plan(&invalid, &plan, &NoLargePages, &mut records),
        Err(BenchError::Configuration(_))
    ));
}

#[test]
fn csv_stream_has_one_header() {
    let config = BenchmarkConfig {
        repetitions: 2,
        pattern: PatternSpec::gather(5),
        ..BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small)
    };
    let plan = sweep_plan(&config).unwrap();
    let mut sink = CsvSink::new(Vec::new()).unwrap();
    execute_plan(&config, &plan, &NoLargePages, &mut sink).unwrap();

    let text = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1 + 4 * 2);
    assert_eq!(lines.iter().filter(|l| l.starts_with("kernel,")).count(), 1);
    assert!(lines[1..].iter().all(|l| l.ends_with(",f32,1,0,gather,5,l1small")));
}

#[test]
fn sweep_with_multiply_maps_three_arrays() {
    let config = BenchmarkConfig {
        repetitions: 1,
        large_pages: true,
        ..BenchmarkConfig::new(ElementType::F32, MemoryLevel::L1Small)
    };
    let platform = HeapPages {
        mapped: Cell::new(0),
    };
    let plan = sweep_plan(&config).unwrap();
    let summary = execute_plan(&config, &plan, &platform, &mut Vec::<RunRecord>::new()).unwrap();
    assert_eq!(summary.skipped, 0);
    assert_eq!(platform.mapped.get(), 3);
}
