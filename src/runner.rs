//! # Trial runner
//!
//! Times one kernel over a working set for a fixed number of repetitions.
//!
//! Per repetition: optional untimed warm-up, optional cache flush, then the
//! timed call bracketed by two monotonic timestamps. The kernel's output is
//! handed to [`std::hint::black_box`] after the end timestamp so the
//! optimizer must compute it without the consumption being measured.
//!
//! Raw per-repetition records are the deliverable; no mean or variance is
//! computed here.
use crate::config::{ElementType, HarnessMode, PatternKind};
use crate::element::Element;
use crate::error::Result;
use crate::kernels::Kernel;
use crate::memory::{CacheFlusher, WorkingSet};
use crate::pattern::AccessPattern;
use log::{debug, info};
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Elapsed time used when a trial measures as exactly zero (timer resolution).
/// Throughput computed from it is only an upper bound.
pub const MIN_ELAPSED_SECS: f64 = 1e-9;

/// Replace a zero (or negative) elapsed time by [`MIN_ELAPSED_SECS`]
pub fn floor_elapsed(elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        elapsed_secs
    } else {
        MIN_ELAPSED_SECS
    }
}

/// Billions of floating-point operations per second
pub fn throughput_gflops(flops_per_element: f64, n: usize, elapsed_secs: f64) -> f64 {
    flops_per_element * n as f64 / floor_elapsed(elapsed_secs) / 1e9
}

/// One measured elapsed time, already floored
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialSample {
    elapsed_secs: f64,
}

impl TrialSample {
    pub fn from_secs(elapsed_secs: f64) -> Self {
        TrialSample {
            elapsed_secs: floor_elapsed(elapsed_secs),
        }
    }

    pub fn from_duration(elapsed: Duration) -> Self {
        Self::from_secs(elapsed.as_secs_f64())
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_secs
    }

    pub fn gflops(&self, flops_per_element: f64, n: usize) -> f64 {
        throughput_gflops(flops_per_element, n, self.elapsed_secs)
    }
}

/// Fields shared by every record of one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RecordContext {
    pub n: usize,
    pub element_type: ElementType,
    pub aligned: bool,
    pub tail: bool,
    pub access: PatternKind,
    pub stride: usize,
    pub memory_level: String,
}

/// One output row; created once per timed trial and never modified
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub kernel: &'static str,
    pub run: usize,
    pub elapsed_secs: f64,
    pub gflops: f64,
    pub n: usize,
    pub element_type: ElementType,
    pub aligned: bool,
    pub tail: bool,
    pub access: PatternKind,
    pub stride: usize,
    pub memory_level: String,
}

impl RunRecord {
    pub fn new(kernel: Kernel, run: usize, sample: TrialSample, ctx: &RecordContext) -> Self {
        RunRecord {
            kernel: kernel.name(),
            run,
            elapsed_secs: sample.elapsed_secs(),
            gflops: sample.gflops(kernel.flops_per_element(), ctx.n),
            n: ctx.n,
            element_type: ctx.element_type,
            aligned: ctx.aligned,
            tail: ctx.tail,
            access: ctx.access,
            stride: ctx.stride,
            memory_level: ctx.memory_level.clone(),
        }
    }
}

/// Executes kernels under the pre-conditions of one [`HarnessMode`]
pub struct TrialRunner {
    mode: HarnessMode,
    flusher: Option<CacheFlusher>,
}

impl TrialRunner {
    /// `flush_bytes` sizes the eviction region; only allocated when the mode flushes
    pub fn new(mode: HarnessMode, flush_bytes: usize) -> Result<Self> {
        let flusher = if mode.flush {
            Some(CacheFlusher::new(flush_bytes)?)
        } else {
            None
        };
        Ok(TrialRunner { mode, flusher })
    }

    pub fn mode(&self) -> HarnessMode {
        self.mode
    }

    /// Time `kernel` `repetitions` times, one record per repetition
    pub fn run<T: Element>(
        &mut self,
        kernel: Kernel,
        ws: &mut WorkingSet<T>,
        pattern: &AccessPattern,
        repetitions: usize,
        ctx: &RecordContext,
    ) -> Result<Vec<RunRecord>> {
        // a mismatched pattern fails here rather than mid-measurement
        pattern.check_len(ws.len())?;
        info!("Timing kernel {} over {} runs (N = {})", kernel.name(), repetitions, ws.len());

        let mut records = Vec::with_capacity(repetitions);
        for run in 0..repetitions {
            if self.mode.warm_up {
                consume(ws.execute(kernel, pattern)?, ws.output(kernel));
            }
            if let Some(flusher) = self.flusher.as_mut() {
                flusher.flush();
            }

            let start = Instant::now();
            let result = ws.execute(kernel, pattern);
            let elapsed = start.elapsed();

            consume(result?, ws.output(kernel));

            let sample = TrialSample::from_duration(elapsed);
            debug!(
                "{} run {run}: {:.3e} s ({:.3} GFLOP/s)",
                kernel.name(),
                sample.elapsed_secs(),
                sample.gflops(kernel.flops_per_element(), ctx.n)
            );
            records.push(RunRecord::new(kernel, run, sample, ctx));
        }
        Ok(records)
    }
}

/// Make the kernel's result observable to the optimizer
#[inline(never)]
fn consume<T: Element>(accumulator: T, output: &[T]) {
    black_box(accumulator);
    black_box(output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HostPlatform;

    fn context(n: usize) -> RecordContext {
        RecordContext {
            n,
            element_type: ElementType::F32,
            aligned: true,
            tail: false,
            access: PatternKind::UnitStride,
            stride: 1,
            memory_level: "l1small".to_string(),
        }
    }

    #[test]
    fn zero_elapsed_is_floored() {
        let sample = TrialSample::from_secs(0.0);
        assert_eq!(sample.elapsed_secs(), MIN_ELAPSED_SECS);
        let gflops = sample.gflops(2.0, 4096);
        assert!(gflops.is_finite());
        assert!((gflops - 2.0 * 4096.0 / MIN_ELAPSED_SECS / 1e9).abs() < 1e-6);
        assert!(throughput_gflops(5.0, 1 << 20, 0.0).is_finite());
        assert!(!throughput_gflops(5.0, 0, 0.0).is_nan());
    }

    #[test]
    fn nonzero_elapsed_is_kept() {
        assert_eq!(floor_elapsed(0.25), 0.25);
        assert_eq!(TrialSample::from_duration(Duration::from_millis(2)).elapsed_secs(), 0.002);
    }

    #[test]
    fn records_reproduce_their_throughput() {
        let mut ws = WorkingSet::<f32>::allocate(&HostPlatform, 4096, true, false).unwrap();
        ws.fill(42);
        let mut runner = TrialRunner::new(HarnessMode::sweep(), 0).unwrap();
        for kernel in Kernel::ALL {
            let records = runner
                .run(kernel, &mut ws, &AccessPattern::UnitStride, 3, &context(4096))
                .unwrap();
            assert_eq!(records.len(), 3);
            for (i, record) in records.iter().enumerate() {
                assert_eq!(record.run, i);
                assert_eq!(record.kernel, kernel.name());
                assert!(record.elapsed_secs > 0.0);
                let recomputed =
                    kernel.flops_per_element() * record.n as f64 / record.elapsed_secs / 1e9;
                assert!((record.gflops - recomputed).abs() <= 1e-9 * recomputed.max(1.0));
            }
        }
    }

    #[test]
    fn cache_miss_mode_flushes_and_warms() {
        let mut ws = WorkingSet::<f64>::allocate(&HostPlatform, 512, false, false).unwrap();
        ws.fill(42);
        let mut runner = TrialRunner::new(HarnessMode::cache_miss(), 64 * 1024).unwrap();
        assert!(runner.flusher.is_some());
        let before = ws.y().to_vec();
        let records = runner
            .run(Kernel::Saxpy, &mut ws, &AccessPattern::UnitStride, 2, &context(512))
            .unwrap();
        assert_eq!(records.len(), 2);
        // two repetitions of warm-up plus timed call: SAXPY applied four times
        let x = ws.x().to_vec();
        let mut expected = before;
        for _ in 0..4 {
            for (e, xi) in expected.iter_mut().zip(&x) {
                *e = 3.0 * xi + *e;
            }
        }
        assert_eq!(ws.y(), expected.as_slice());
    }

    #[test]
    fn sweep_mode_times_every_run_without_warm_up() {
        let mut ws = WorkingSet::<f64>::allocate(&HostPlatform, 512, true, false).unwrap();
        ws.fill(42);
        let mut runner = TrialRunner::new(HarnessMode::sweep(), 0).unwrap();
        let before = ws.y().to_vec();
        let records = runner
            .run(Kernel::Saxpy, &mut ws, &AccessPattern::UnitStride, 3, &context(512))
            .unwrap();
        assert_eq!(records.len(), 3);
        // one timed call per repetition, no untimed pass
        let x = ws.x().to_vec();
        let mut expected = before;
        for _ in 0..3 {
            for (e, xi) in expected.iter_mut().zip(&x) {
                *e = 3.0 * xi + *e;
            }
        }
        assert_eq!(ws.y(), expected.as_slice());
    }

    #[test]
    fn sweep_mode_allocates_no_flusher() {
        let runner = TrialRunner::new(HarnessMode::sweep(), usize::MAX).unwrap();
        assert!(runner.flusher.is_none());
        assert_eq!(runner.mode(), HarnessMode::sweep());
    }
}
