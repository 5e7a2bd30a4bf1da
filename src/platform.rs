//! # Platform
//!
//! The handful of OS services the measurement engine needs: pinning,
//! scheduling priority, and large-page memory. The engine only depends on
//! the [`Platform`] trait; [`HostPlatform`] is the implementation for the
//! machine the binaries run on.
use crate::error::{BenchError, Result};
use log::{info, warn};
use std::ptr::NonNull;

/// Large-page backed memory region, released through the platform that mapped it.
///
/// The region is zero-initialized and aligned to at least a cache line.
pub struct PageRegion {
    ptr: NonNull<u8>,
    len: usize,
    release: unsafe fn(NonNull<u8>, usize),
}

impl PageRegion {
    /// Wrap a mapped region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes, zero-filled,
    /// aligned to at least 64 bytes, and exclusively owned by the returned
    /// value until `release(ptr, len)` runs on drop.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        len: usize,
        release: unsafe fn(NonNull<u8>, usize),
    ) -> Self {
        PageRegion { ptr, len, release }
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for PageRegion {
    fn drop(&mut self) {
        // SAFETY: `from_raw_parts` contract, `release` matches the mapping
        unsafe { (self.release)(self.ptr, self.len) }
    }
}

/// OS capabilities consumed by the measurement engine
pub trait Platform {
    /// Bind the calling thread to one logical core
    fn pin_to_core(&self, core: usize) -> Result<()>;

    /// Raise the calling thread to the highest scheduling priority.
    /// Best effort; callers treat failure as a warning
    fn raise_priority(&self) -> Result<()>;

    /// Minimum large-page size in bytes, `None` when large pages are unsupported
    fn large_page_size(&self) -> Option<usize>;

    /// Acquire whatever the OS requires before large pages can be mapped
    fn acquire_lock_pages_privilege(&self) -> Result<()>;

    /// Map `bytes` (a multiple of [`Platform::large_page_size`]) of large-page memory
    fn allocate_pages(&self, bytes: usize) -> Result<PageRegion>;
}

/// Pin to `core` and raise priority, warning on anything that fails.
///
/// Returns whether the thread ended up pinned.
pub fn pin_execution<P: Platform + ?Sized>(platform: &P, core: Option<usize>) -> bool {
    let pinned = match core {
        Some(core) => match platform.pin_to_core(core) {
            Ok(()) => {
                info!("Pinned measurement thread to CPU core {core}");
                true
            }
            Err(e) => {
                warn!("Couldn't pin measurement thread to CPU core {core}: {e} (NOTE: this is expected on macOS)");
                false
            }
        },
        None => {
            warn!("No CPU core requested; measurements may migrate between cores");
            false
        }
    };

    if let Err(e) = platform.raise_priority() {
        warn!("Couldn't set measurement thread to maximum priority: {e}");
    }
    pinned
}

/// The machine the process runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn pin_to_core(&self, core: usize) -> Result<()> {
        if core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
            Ok(())
        } else {
            Err(BenchError::unavailable(format!(
                "affinity to core {core} was refused"
            )))
        }
    }

    fn raise_priority(&self) -> Result<()> {
        thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max)
            .map_err(|e| BenchError::unavailable(format!("{e:?}")))
    }

    fn large_page_size(&self) -> Option<usize> {
        sys::large_page_size()
    }

    fn acquire_lock_pages_privilege(&self) -> Result<()> {
        sys::acquire_lock_pages_privilege()
    }

    fn allocate_pages(&self, bytes: usize) -> Result<PageRegion> {
        sys::allocate_pages(bytes)
    }
}

/// Value in KiB of a `/proc/meminfo` field such as `Hugepagesize:       2048 kB`
pub fn parse_meminfo_field(meminfo: &str, key: &str) -> Option<usize> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

#[cfg(target_os = "linux")]
mod sys {
    use super::{PageRegion, parse_meminfo_field};
    use crate::error::{BenchError, Result};
    use log::warn;
    use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};
    use std::num::NonZeroUsize;
    use std::os::fd::BorrowedFd;
    use std::ptr::NonNull;

    fn meminfo() -> Option<String> {
        std::fs::read_to_string("/proc/meminfo").ok()
    }

    pub fn large_page_size() -> Option<usize> {
        let kib = parse_meminfo_field(&meminfo()?, "Hugepagesize")?;
        (kib > 0).then_some(kib * 1024)
    }

    /// Linux has no per-process privilege for hugetlb mappings; what gates
    /// them is a reserved pool (`vm.nr_hugepages`).
    pub fn acquire_lock_pages_privilege() -> Result<()> {
        let info = meminfo().ok_or_else(|| BenchError::unavailable("/proc/meminfo unreadable"))?;
        match parse_meminfo_field(&info, "HugePages_Total") {
            Some(0) | None => Err(BenchError::unavailable(
                "no huge pages reserved (raise vm.nr_hugepages)",
            )),
            Some(_) => Ok(()),
        }
    }

    unsafe fn unmap(ptr: NonNull<u8>, len: usize) {
        // SAFETY: called once per mapping created in `allocate_pages`
        if let Err(e) = unsafe { munmap(ptr.as_ptr().cast(), len) } {
            warn!("munmap of {len} byte large-page region failed: {e}");
        }
    }

    pub fn allocate_pages(bytes: usize) -> Result<PageRegion> {
        let len = NonZeroUsize::new(bytes)
            .ok_or_else(|| BenchError::config("cannot map an empty large-page region"))?;
        // SAFETY: anonymous private mapping at a kernel-chosen address
        let addr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_HUGETLB,
                None::<BorrowedFd<'_>>,
                0,
            )
        }
        .map_err(|e| BenchError::unavailable(format!("hugetlb mmap of {bytes} bytes failed: {e}")))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| BenchError::unavailable("hugetlb mmap returned null"))?;
        // SAFETY: fresh anonymous mapping is zero-filled and page aligned
        Ok(unsafe { PageRegion::from_raw_parts(ptr, bytes, unmap) })
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::PageRegion;
    use crate::error::{BenchError, Result};

    pub fn large_page_size() -> Option<usize> {
        None
    }

    pub fn acquire_lock_pages_privilege() -> Result<()> {
        Err(BenchError::unavailable(
            "large pages are not supported on this platform",
        ))
    }

    pub fn allocate_pages(bytes: usize) -> Result<PageRegion> {
        Err(BenchError::unavailable(format!(
            "cannot map {bytes} bytes of large pages on this platform"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const MEMINFO: &str = "MemTotal:       32718516 kB\n\
                           HugePages_Total:       0\n\
                           HugePages_Free:        0\n\
                           Hugepagesize:       2048 kB\n";

    #[test]
    fn meminfo_fields() {
        assert_eq!(parse_meminfo_field(MEMINFO, "Hugepagesize"), Some(2048));
        assert_eq!(parse_meminfo_field(MEMINFO, "HugePages_Total"), Some(0));
        assert_eq!(parse_meminfo_field(MEMINFO, "HugePages"), None);
        assert_eq!(parse_meminfo_field(MEMINFO, "Missing"), None);
    }

    struct Refusing {
        priority_calls: Cell<usize>,
    }

    impl Platform for Refusing {
        fn pin_to_core(&self, core: usize) -> Result<()> {
            Err(BenchError::unavailable(format!("core {core}")))
        }

        fn raise_priority(&self) -> Result<()> {
            self.priority_calls.set(self.priority_calls.get() + 1);
            Err(BenchError::unavailable("denied"))
        }

        fn large_page_size(&self) -> Option<usize> {
            None
        }

        fn acquire_lock_pages_privilege(&self) -> Result<()> {
            Err(BenchError::unavailable("denied"))
        }

        fn allocate_pages(&self, _bytes: usize) -> Result<PageRegion> {
            Err(BenchError::unavailable("denied"))
        }
    }

    #[test]
    fn pinning_failures_are_not_fatal() {
        let platform = Refusing {
            priority_calls: Cell::new(0),
        };
        assert!(!pin_execution(&platform, Some(3)));
        assert!(!pin_execution(&platform, None));
        assert_eq!(platform.priority_calls.get(), 2);
    }
}
