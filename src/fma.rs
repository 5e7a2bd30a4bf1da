//! # Peak FMA throughput
//!
//! Chains of fused multiply-adds over independent accumulators, touching no
//! memory beyond a few registers' worth of state. Enough accumulators are
//! kept live to cover FMA latency on two issue ports, so the loop is bound by
//! throughput rather than by the dependency chain.
//!
//! Each accumulator iterates `acc = acc * 0.9999 + 0.0001`, which converges
//! towards 1.0 and never overflows or goes subnormal.
use std::hint::black_box;
use std::time::Instant;

/// Independent accumulator vectors
pub const ACCUMULATORS: usize = 8;
/// f32 lanes per 256-bit vector
pub const LANES: usize = 8;
/// One FMA is two floating-point operations per lane
pub const FLOPS_PER_ITERATION: u64 = (ACCUMULATORS * LANES * 2) as u64;

const MULTIPLIER: f32 = 0.9999;
const ADDEND: f32 = 0.0001;

/// Result of one timed FMA chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FmaReport {
    pub iterations: u64,
    pub elapsed_secs: f64,
    pub gflops: f64,
    /// Whether the AVX2/FMA path ran instead of the portable one
    pub vectorized: bool,
    /// Sum of every accumulator lane, consumed to keep the chain alive
    pub checksum: f32,
}

/// Portable chain; `f32::mul_add` lowers to a hardware FMA where available
#[inline(never)]
pub fn fma_chain_portable(iterations: u64) -> f32 {
    let mut acc = [[1.0f32; LANES]; ACCUMULATORS];
    for _ in 0..iterations {
        for vector in acc.iter_mut() {
            for lane in vector.iter_mut() {
                *lane = lane.mul_add(MULTIPLIER, ADDEND);
            }
        }
    }
    acc.iter().flatten().sum()
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline(never)]
unsafe fn fma_chain_avx2(iterations: u64) -> f32 {
    use std::arch::x86_64::*;

    let multiplier = _mm256_set1_ps(MULTIPLIER);
    let addend = _mm256_set1_ps(ADDEND);
    let mut acc = [_mm256_set1_ps(1.0); ACCUMULATORS];

    for _ in 0..iterations {
        for vector in acc.iter_mut() {
            *vector = _mm256_fmadd_ps(*vector, multiplier, addend);
        }
    }

    let mut total = acc[0];
    for vector in &acc[1..] {
        total = _mm256_add_ps(total, *vector);
    }
    let mut lanes = [0.0f32; LANES];
    // SAFETY: `lanes` holds exactly one 256-bit vector; storeu has no alignment requirement
    unsafe { _mm256_storeu_ps(lanes.as_mut_ptr(), total) };
    lanes.iter().sum()
}

fn fma_chain(iterations: u64) -> (f32, bool) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            // SAFETY: both target features were detected at runtime
            return (unsafe { fma_chain_avx2(iterations) }, true);
        }
    }
    (fma_chain_portable(iterations), false)
}

/// Time `iterations` rounds of the FMA chain.
///
/// The checksum is consumed after the end timestamp, outside the timed interval.
pub fn fma_peak(iterations: u64) -> FmaReport {
    let iterations = black_box(iterations);

    let start = Instant::now();
    let (checksum, vectorized) = fma_chain(iterations);
    let elapsed = start.elapsed();

    let checksum = black_box(checksum);
    let elapsed_secs = crate::runner::floor_elapsed(elapsed.as_secs_f64());
    let total_flops = iterations as f64 * FLOPS_PER_ITERATION as f64;

    FmaReport {
        iterations,
        elapsed_secs,
        gflops: total_flops / elapsed_secs / 1e9,
        vectorized,
        checksum,
    }
}
