//! Working-set sizing against the memory hierarchy.
use crate::config::{CacheBudgets, MemoryLevel};
use crate::error::{BenchError, Result};

/// Extra elements appended when the tail flag is set, chosen so the run
/// length is not a multiple of any vector width
pub const TAIL_ELEMENTS: usize = 3;

/// Element counts sampled by [`MemoryLevel::Sweep`], sub-L1 to multi-L3
pub const SWEEP_ELEMENT_COUNTS: [usize; 9] = [
    1024,
    4 * 1024,
    16 * 1024,
    32 * 1024,
    192 * 1024,
    512 * 1024,
    2 * 1024 * 1024,
    8 * 1024 * 1024,
    32 * 1024 * 1024,
];

/// Element counts for `level`.
///
/// A sized level yields exactly one count: the largest N such that
/// `N * element_size * array_count` fits the level's budget. Sweep yields the
/// fixed ascending ladder regardless of the budget table.
pub fn size_for(
    level: MemoryLevel,
    element_size: usize,
    array_count: usize,
    budgets: &CacheBudgets,
) -> Result<Vec<usize>> {
    if element_size == 0 || array_count == 0 {
        return Err(BenchError::config(format!(
            "cannot size a working set of {array_count} arrays of {element_size}-byte elements"
        )));
    }

    let Some(budget) = budgets.budget(level) else {
        return Ok(SWEEP_ELEMENT_COUNTS.to_vec());
    };

    let bytes_per_index = element_size
        .checked_mul(array_count)
        .ok_or_else(|| BenchError::config("element size times array count overflows"))?;
    let n = budget / bytes_per_index;
    if n == 0 {
        return Err(BenchError::config(format!(
            "{level} budget of {budget} bytes holds no element across {array_count} arrays"
        )));
    }
    Ok(vec![n])
}

/// Element count after the optional tail adjustment
pub fn with_tail(n: usize, tail: bool) -> usize {
    if tail { n + TAIL_ELEMENTS } else { n }
}
