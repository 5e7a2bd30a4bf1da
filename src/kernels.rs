//! # Kernels
//!
//! Streaming numeric kernels, generic over element type and dispatched over
//! [`AccessPattern`] once per call so each loop body stays monomorphic.
//!
//! Every kernel checks its inputs before the first element is touched; the
//! loops themselves do not fail.
use crate::element::Element;
use crate::error::{BenchError, Result};
use crate::pattern::AccessPattern;

/// SAXPY scale factor
pub const SAXPY_A: f32 = 3.0;

/// Fixed set of memory-bound kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Saxpy,
    Dot,
    Multiply,
    Stencil,
}

impl Kernel {
    pub const ALL: [Kernel; 4] = [Kernel::Saxpy, Kernel::Dot, Kernel::Multiply, Kernel::Stencil];

    pub fn name(self) -> &'static str {
        match self {
            Kernel::Saxpy => "SAXPY",
            Kernel::Dot => "DOT",
            Kernel::Multiply => "MUL",
            Kernel::Stencil => "STENCIL",
        }
    }

    pub fn flops_per_element(self) -> f64 {
        match self {
            Kernel::Saxpy | Kernel::Dot => 2.0,
            Kernel::Multiply => 1.0,
            Kernel::Stencil => 5.0,
        }
    }

    /// Arrays the kernel reads or writes
    pub fn array_count(self) -> usize {
        match self {
            Kernel::Multiply => 3,
            _ => 2,
        }
    }
}

/// Three-point stencil weights for `x[i-1]`, `x[i]`, `x[i+1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StencilCoefficients<T> {
    pub a: T,
    pub b: T,
    pub c: T,
}

impl<T: Element> Default for StencilCoefficients<T> {
    fn default() -> Self {
        StencilCoefficients {
            a: T::from_f32(1.0),
            b: T::from_f32(2.0),
            c: T::from_f32(3.0),
        }
    }
}

fn check_lengths(n: usize, others: &[usize], pattern: &AccessPattern) -> Result<()> {
    if let Some(len) = others.iter().find(|&&len| len != n) {
        return Err(BenchError::config(format!(
            "kernel operands differ in length ({n} vs {len})"
        )));
    }
    pattern.check_len(n)
}

/// `y[i] = a * x[i] + y[i]`
pub fn saxpy<T: Element>(y: &mut [T], x: &[T], a: T, pattern: &AccessPattern) -> Result<()> {
    let n = y.len();
    check_lengths(n, &[x.len()], pattern)?;

    match pattern {
        AccessPattern::UnitStride => {
            for (yi, &xi) in y.iter_mut().zip(x) {
                *yi = a.mul(xi).add(*yi);
            }
        }
        AccessPattern::Strided { stride } => {
            for i in (0..n).step_by(stride.get()) {
                y[i] = a.mul(x[i]).add(y[i]);
            }
        }
        AccessPattern::Gather(table) => {
            for &i in table.indices() {
                y[i] = a.mul(x[i]).add(y[i]);
            }
        }
    }
    Ok(())
}

/// `sum(x[i] * y[i])`; the caller must consume the returned accumulator
pub fn dot<T: Element>(x: &[T], y: &[T], pattern: &AccessPattern) -> Result<T> {
    let n = x.len();
    check_lengths(n, &[y.len()], pattern)?;

    let mut sum = T::default();
    match pattern {
        AccessPattern::UnitStride => {
            for (&xi, &yi) in x.iter().zip(y) {
                sum = sum.add(xi.mul(yi));
            }
        }
        AccessPattern::Strided { stride } => {
            for i in (0..n).step_by(stride.get()) {
                sum = sum.add(x[i].mul(y[i]));
            }
        }
        AccessPattern::Gather(table) => {
            for &i in table.indices() {
                sum = sum.add(x[i].mul(y[i]));
            }
        }
    }
    Ok(sum)
}

/// `z[i] = x[i] * y[i]`
pub fn multiply<T: Element>(z: &mut [T], x: &[T], y: &[T], pattern: &AccessPattern) -> Result<()> {
    let n = z.len();
    check_lengths(n, &[x.len(), y.len()], pattern)?;

    match pattern {
        AccessPattern::UnitStride => {
            for ((zi, &xi), &yi) in z.iter_mut().zip(x).zip(y) {
                *zi = xi.mul(yi);
            }
        }
        AccessPattern::Strided { stride } => {
            for i in (0..n).step_by(stride.get()) {
                z[i] = x[i].mul(y[i]);
            }
        }
        AccessPattern::Gather(table) => {
            for &i in table.indices() {
                z[i] = x[i].mul(y[i]);
            }
        }
    }
    Ok(())
}

#[inline(always)]
fn stencil_point<T: Element>(x: &[T], i: usize, k: &StencilCoefficients<T>) -> T {
    k.a.mul(x[i - 1]).add(k.b.mul(x[i])).add(k.c.mul(x[i + 1]))
}

/// `y[i] = a * x[i-1] + b * x[i] + c * x[i+1]` for interior `i` only.
///
/// Index 0 and index N-1 are never written under any pattern.
pub fn stencil<T: Element>(
    y: &mut [T],
    x: &[T],
    k: &StencilCoefficients<T>,
    pattern: &AccessPattern,
) -> Result<()> {
    let n = y.len();
    check_lengths(n, &[x.len()], pattern)?;
    if n < 3 {
        return Ok(());
    }

    match pattern {
        AccessPattern::UnitStride => {
            for (yi, w) in y[1..n - 1].iter_mut().zip(x.windows(3)) {
                *yi = k.a.mul(w[0]).add(k.b.mul(w[1])).add(k.c.mul(w[2]));
            }
        }
        AccessPattern::Strided { stride } => {
            for i in (0..n).step_by(stride.get()) {
                if i > 0 && i + 1 < n {
                    y[i] = stencil_point(x, i, k);
                }
            }
        }
        AccessPattern::Gather(table) => {
            // gather order is not monotonic, so every index is re-checked
            for &i in table.indices() {
                if i > 0 && i + 1 < n {
                    y[i] = stencil_point(x, i, k);
                }
            }
        }
    }
    Ok(())
}
