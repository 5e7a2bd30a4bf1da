//! # Memory
//!
//! Working-set storage and cache state control.
//!
//! Buffers are zero-initialized and cache-line aligned, either from the
//! global allocator or from a large-page mapping provided by the
//! [`Platform`]. A deliberately misaligned working set allocates one extra
//! element per array and exposes views starting at element 1.
use crate::element::Element;
use crate::error::{BenchError, Result};
use crate::kernels::{self, Kernel, SAXPY_A, StencilCoefficients};
use crate::pattern::AccessPattern;
use crate::platform::{PageRegion, Platform};
use log::debug;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::hint::black_box;
use std::ops::Range;
use std::ptr::NonNull;

pub const CACHE_LINE_SIZE: usize = 64;

enum Backing {
    Heap(Layout),
    /// Unmapped when dropped
    Pages { _region: PageRegion },
}

/// Owned, zero-initialized, cache-line aligned array of `T`
pub struct Buffer<T: Element> {
    ptr: NonNull<T>,
    len: usize,
    backing: Backing,
}

impl<T: Element> Buffer<T> {
    /// Allocate `len` elements, from large pages when `large_pages` is set.
    ///
    /// Large-page problems (unsupported, not reserved, mapping refused) are
    /// [`BenchError::ResourceUnavailable`]; a failing global allocator is the
    /// fatal [`BenchError::Allocation`].
    pub fn allocate<P: Platform + ?Sized>(platform: &P, len: usize, large_pages: bool) -> Result<Self> {
        let bytes = len
            .max(1)
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| BenchError::config(format!("{len} elements overflow the address space")))?;

        if large_pages {
            Self::allocate_pages(platform, len, bytes)
        } else {
            Self::allocate_heap(len, bytes)
        }
    }

    fn allocate_heap(len: usize, bytes: usize) -> Result<Self> {
        let layout = Layout::from_size_align(bytes, CACHE_LINE_SIZE)
            .map_err(|e| BenchError::config(format!("bad layout for {bytes} bytes: {e}")))?;
        // SAFETY: layout size is non-zero
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or(BenchError::Allocation { bytes })?;
        Ok(Buffer {
            ptr,
            len,
            backing: Backing::Heap(layout),
        })
    }

    fn allocate_pages<P: Platform + ?Sized>(platform: &P, len: usize, bytes: usize) -> Result<Self> {
        let page = platform
            .large_page_size()
            .ok_or_else(|| BenchError::unavailable("large pages are not supported"))?;
        let rounded = bytes
            .div_ceil(page)
            .checked_mul(page)
            .ok_or_else(|| BenchError::config(format!("{bytes} bytes overflow when rounded to {page}-byte pages")))?;

        let region = platform.allocate_pages(rounded)?;
        if region.len() < bytes || region.as_ptr().as_ptr() as usize % CACHE_LINE_SIZE != 0 {
            return Err(BenchError::unavailable(format!(
                "large-page region of {} bytes cannot hold {bytes} aligned bytes",
                region.len()
            )));
        }
        debug!("Mapped {rounded} bytes of {page}-byte pages for {bytes} bytes");
        Ok(Buffer {
            ptr: region.as_ptr().cast::<T>(),
            len,
            backing: Backing::Pages { _region: region },
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_large_pages(&self) -> bool {
        matches!(self.backing, Backing::Pages { .. })
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: `ptr` is valid, aligned and zero-initialized for `len` elements,
        // and all-zero bits are a valid `T`
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Element> Drop for Buffer<T> {
    fn drop(&mut self) {
        if let Backing::Heap(layout) = self.backing {
            // SAFETY: allocated in `allocate_heap` with this exact layout
            unsafe { dealloc(self.ptr.as_ptr().cast(), layout) };
        }
        // page-backed regions release themselves
    }
}

/// The x, y and z arrays one configuration runs its kernels over.
///
/// `z` is only allocated when one of the planned kernels writes it.
pub struct WorkingSet<T: Element> {
    x: Buffer<T>,
    y: Buffer<T>,
    z: Option<Buffer<T>>,
    offset: usize,
    len: usize,
}

impl<T: Element> WorkingSet<T> {
    /// Allocate x, y and z for every kernel
    pub fn allocate<P: Platform + ?Sized>(
        platform: &P,
        len: usize,
        aligned: bool,
        large_pages: bool,
    ) -> Result<Self> {
        Self::allocate_for(platform, len, aligned, large_pages, &Kernel::ALL)
    }

    /// Allocate only the arrays `kernels` touch
    pub fn allocate_for<P: Platform + ?Sized>(
        platform: &P,
        len: usize,
        aligned: bool,
        large_pages: bool,
        kernels: &[Kernel],
    ) -> Result<Self> {
        if len == 0 {
            return Err(BenchError::config("working set must hold at least one element"));
        }
        let offset = usize::from(!aligned);
        let capacity = len + offset;
        let x = Buffer::allocate(platform, capacity, large_pages)?;
        let y = Buffer::allocate(platform, capacity, large_pages)?;
        let z = if kernels.iter().any(|k| k.array_count() > 2) {
            Some(Buffer::allocate(platform, capacity, large_pages)?)
        } else {
            None
        };
        Ok(WorkingSet {
            x,
            y,
            z,
            offset,
            len,
        })
    }

    /// Refill all arrays from a generator seeded with `seed`, index-interleaved.
    ///
    /// A z sample is drawn per index even without z, so x and y don't depend
    /// on which kernels were planned.
    pub fn fill(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let range = self.range();
        let x = &mut self.x.as_mut_slice()[range.clone()];
        let y = &mut self.y.as_mut_slice()[range.clone()];
        let mut z = self.z.as_mut().map(|z| &mut z.as_mut_slice()[range]);
        for (i, (xi, yi)) in x.iter_mut().zip(y.iter_mut()).enumerate() {
            *xi = T::sample(&mut rng);
            *yi = T::sample(&mut rng);
            let zi = T::sample(&mut rng);
            if let Some(z) = z.as_deref_mut() {
                z[i] = zi;
            }
        }
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_aligned(&self) -> bool {
        self.offset == 0
    }

    pub fn is_large_pages(&self) -> bool {
        self.x.is_large_pages()
    }

    pub fn x(&self) -> &[T] {
        &self.x.as_slice()[self.range()]
    }

    pub fn y(&self) -> &[T] {
        &self.y.as_slice()[self.range()]
    }

    /// Empty when z wasn't allocated
    pub fn z(&self) -> &[T] {
        match &self.z {
            Some(z) => &z.as_slice()[self.range()],
            None => &[],
        }
    }

    pub fn has_z(&self) -> bool {
        self.z.is_some()
    }

    /// Run `kernel` once; returns the dot accumulator, `T::default()` otherwise
    #[inline(never)]
    pub fn execute(&mut self, kernel: Kernel, pattern: &AccessPattern) -> Result<T> {
        let range = self.range();
        match kernel {
            Kernel::Saxpy => {
                let x = &self.x.as_slice()[range.clone()];
                let y = &mut self.y.as_mut_slice()[range];
                kernels::saxpy(y, x, T::from_f32(SAXPY_A), pattern)?;
                Ok(T::default())
            }
            Kernel::Dot => {
                let x = &self.x.as_slice()[range.clone()];
                let y = &self.y.as_slice()[range];
                kernels::dot(x, y, pattern)
            }
            Kernel::Multiply => {
                let z = self
                    .z
                    .as_mut()
                    .ok_or_else(|| BenchError::config("working set was allocated without z"))?;
                let z = &mut z.as_mut_slice()[range.clone()];
                let x = &self.x.as_slice()[range.clone()];
                let y = &self.y.as_slice()[range];
                kernels::multiply(z, x, y, pattern)?;
                Ok(T::default())
            }
            Kernel::Stencil => {
                let x = &self.x.as_slice()[range.clone()];
                let y = &mut self.y.as_mut_slice()[range];
                kernels::stencil(y, x, &StencilCoefficients::default(), pattern)?;
                Ok(T::default())
            }
        }
    }

    /// Array the kernel writes (x for the read-only dot kernel)
    pub fn output(&self, kernel: Kernel) -> &[T] {
        match kernel {
            Kernel::Saxpy | Kernel::Stencil => self.y(),
            Kernel::Multiply => self.z(),
            Kernel::Dot => self.x(),
        }
    }
}

/// Evicts the benchmark's data by sweeping a region larger than the last-level cache
pub struct CacheFlusher {
    region: Vec<u64>,
    epoch: u64,
}

impl CacheFlusher {
    const WORDS_PER_LINE: usize = CACHE_LINE_SIZE / std::mem::size_of::<u64>();

    pub fn new(bytes: usize) -> Result<Self> {
        let words = bytes.div_ceil(std::mem::size_of::<u64>()).max(Self::WORDS_PER_LINE);
        let mut region = Vec::new();
        region
            .try_reserve_exact(words)
            .map_err(|_| BenchError::Allocation { bytes })?;
        region.resize(words, 0);
        Ok(CacheFlusher { region, epoch: 0 })
    }

    pub fn bytes(&self) -> usize {
        self.region.len() * std::mem::size_of::<u64>()
    }

    /// Read-modify-write one word of every cache line in the region
    #[inline(never)]
    pub fn flush(&mut self) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        let mut acc = 0u64;
        for word in self.region.iter_mut().step_by(Self::WORDS_PER_LINE) {
            *word = word.wrapping_add(self.epoch);
            acc = acc.wrapping_add(*word);
        }
        black_box(acc)
    }
}
