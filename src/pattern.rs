//! # Access patterns
//!
//! Generates the order in which a kernel visits a working set of N elements.
//!
//! The gather table is `(i * stride) mod N`. It is deterministic and cheap to
//! rebuild, and approximates a pseudo-random reuse distance. It is not a
//! shuffle: when `gcd(stride, N) > 1` the table wraps early and repeats a
//! subset of indices (N = 8, stride = 4 visits only 0 and 4). Measurements
//! depend on this exact order, so it must stay as is.
//!
//! The shuffled table is a random permutation of `0..N` drawn from a
//! generator seeded with [`SHUFFLE_SEED`], then visited at positions
//! `0, stride, 2 * stride, ...`. It is what the cache-miss study compares
//! against sequential access.
use crate::config::{PatternKind, PatternSpec};
use crate::error::{BenchError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::num::NonZeroUsize;

/// Seed of the permutation behind [`PatternKind::Shuffled`]
pub const SHUFFLE_SEED: u64 = 42;

/// Precomputed indirect visiting order over a working set of `domain` elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherTable {
    indices: Vec<usize>,
    domain: usize,
    stride: usize,
    kind: PatternKind,
}

impl GatherTable {
    fn modular(n: usize, stride: NonZeroUsize) -> Self {
        let mut indices = Vec::with_capacity(n);
        if n > 0 {
            // (i * stride) mod n, built incrementally so large N * stride can't overflow
            let step = stride.get() % n;
            let mut idx = 0usize;
            for _ in 0..n {
                indices.push(idx);
                idx += step;
                if idx >= n {
                    idx -= n;
                }
            }
        }
        GatherTable {
            indices,
            domain: n,
            stride: stride.get(),
            kind: PatternKind::Gather,
        }
    }

    fn shuffled(n: usize, stride: NonZeroUsize, seed: u64) -> Self {
        let mut permutation: Vec<usize> = (0..n).collect();
        permutation.shuffle(&mut StdRng::seed_from_u64(seed));
        let indices = if stride.get() == 1 {
            permutation
        } else {
            permutation.into_iter().step_by(stride.get()).collect()
        };
        GatherTable {
            indices,
            domain: n,
            stride: stride.get(),
            kind: PatternKind::Shuffled,
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Number of visits, one per entry
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Working-set size the table was built for
    pub fn domain(&self) -> usize {
        self.domain
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }
}

/// Visiting order a kernel applies over its working set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPattern {
    UnitStride,
    Strided { stride: NonZeroUsize },
    /// Indirect order, either [`PatternKind::Gather`] or [`PatternKind::Shuffled`]
    Gather(GatherTable),
}

impl AccessPattern {
    pub fn kind(&self) -> PatternKind {
        match self {
            AccessPattern::UnitStride => PatternKind::UnitStride,
            AccessPattern::Strided { .. } => PatternKind::Strided,
            AccessPattern::Gather(table) => table.kind(),
        }
    }

    pub fn stride(&self) -> usize {
        match self {
            AccessPattern::UnitStride => 1,
            AccessPattern::Strided { stride } => stride.get(),
            AccessPattern::Gather(table) => table.stride(),
        }
    }

    /// Number of index visits a kernel performs over `n` elements
    pub fn visits(&self, n: usize) -> usize {
        match self {
            AccessPattern::UnitStride => n,
            AccessPattern::Strided { stride } => n.div_ceil(stride.get()),
            AccessPattern::Gather(table) => table.len(),
        }
    }

    /// Check that this pattern was generated for a working set of `n` elements
    pub fn check_len(&self, n: usize) -> Result<()> {
        match self {
            AccessPattern::Gather(table) if table.domain() != n => {
                Err(BenchError::config(format!(
                    "{} table built for {} elements applied to a working set of {n}",
                    table.kind(),
                    table.domain()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Build the access pattern for `n` elements.
///
/// Unit-stride and strided patterns carry no table; gather and shuffled
/// build their table here, once, so every kernel sharing `n` sees the same
/// order.
pub fn generate(kind: PatternKind, n: usize, stride: usize) -> Result<AccessPattern> {
    if kind == PatternKind::UnitStride {
        return Ok(AccessPattern::UnitStride);
    }
    let stride = NonZeroUsize::new(stride)
        .ok_or_else(|| BenchError::config(format!("{kind} pattern requires a positive stride")))?;
    Ok(match kind {
        PatternKind::UnitStride => AccessPattern::UnitStride,
        PatternKind::Strided => AccessPattern::Strided { stride },
        PatternKind::Gather => AccessPattern::Gather(GatherTable::modular(n, stride)),
        PatternKind::Shuffled => {
            AccessPattern::Gather(GatherTable::shuffled(n, stride, SHUFFLE_SEED))
        }
    })
}

impl PatternSpec {
    pub fn generate(&self, n: usize) -> Result<AccessPattern> {
        generate(self.kind, n, self.stride)
    }
}
