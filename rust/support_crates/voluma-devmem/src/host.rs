//! Host-side allocation with a plain and a page-locked strategy.
//!
//! [`HostBlock`] is the RAII owner for the host endpoint of a dual-location
//! buffer. The plain strategy is a zeroed global-allocator allocation at the
//! caller's alignment; the pinned strategy goes through the platform module
//! ([`crate::pinned`]) and yields page-aligned, page-locked memory that can
//! serve as the host side of an asynchronous device transfer.

use std::alloc::{Layout, alloc_zeroed};

/// An owned, zero-initialized host allocation.
///
/// The block tracks its byte capacity and the strategy it was allocated
/// with; the logical length of the data stored in it is the caller's
/// concern. Zero-size blocks hold a dangling (aligned, never dereferenced
/// beyond length 0) pointer and perform no allocator traffic.
pub struct HostBlock {
    /// Start of the region; dangling when `capacity == 0`.
    ptr: *mut u8,
    /// Allocated capacity in bytes. Pinned blocks round up to the page size.
    capacity: usize,
    /// Allocation alignment; the page size for pinned blocks.
    alignment: usize,
    /// Whether this block was allocated with the page-locked strategy.
    pinned: bool,
}

impl HostBlock {
    /// Allocates `size` zeroed bytes at `alignment` with the plain strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout is invalid (alignment not a power of
    /// two, or size overflow) or the allocator is out of memory.
    pub fn allocate(size: usize, alignment: usize) -> std::io::Result<HostBlock> {
        if size == 0 {
            return Ok(Self::empty(alignment, false));
        }
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "Failed to allocate memory",
            ));
        }
        Ok(HostBlock {
            ptr,
            capacity: size,
            alignment,
            pinned: false,
        })
    }

    /// Allocates at least `size` zeroed bytes with the page-locked strategy.
    ///
    /// The capacity rounds up to the next page boundary and the pointer is
    /// page-aligned. See [`crate::pinned::allocate`] for the locking
    /// behavior on the current platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform allocation fails.
    pub fn allocate_pinned(size: usize) -> std::io::Result<HostBlock> {
        let page_size = crate::pinned::get_page_size();
        if size == 0 {
            return Ok(Self::empty(page_size, true));
        }
        let (ptr, capacity) = crate::pinned::allocate(size)?;
        assert!((ptr as usize).is_multiple_of(page_size));
        Ok(HostBlock {
            ptr: ptr as _,
            capacity,
            alignment: page_size,
            pinned: true,
        })
    }

    fn empty(alignment: usize, pinned: bool) -> HostBlock {
        assert!(alignment.is_power_of_two());
        HostBlock {
            ptr: std::ptr::without_provenance_mut(alignment),
            capacity: 0,
            alignment,
            pinned,
        }
    }

    /// Returns the allocated capacity in bytes.
    ///
    /// For pinned blocks this may exceed the requested size due to page
    /// rounding.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the allocation alignment in bytes.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns `true` if this block was allocated with the page-locked
    /// strategy.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Returns a raw pointer to the beginning of the region.
    ///
    /// # Safety
    ///
    /// The pointer must not be used after the `HostBlock` is dropped, and
    /// access must stay within `0..capacity`.
    #[inline]
    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Returns the whole capacity as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.capacity) }
    }

    /// Returns the whole capacity as a mutable byte slice.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.capacity) }
    }
}

impl Drop for HostBlock {
    fn drop(&mut self) {
        if self.capacity != 0 {
            if self.pinned {
                let _ = unsafe { crate::pinned::free(self.ptr as _, self.capacity) };
            } else {
                // SAFETY: the same size/alignment pair was validated when the
                // block was allocated.
                let layout =
                    unsafe { Layout::from_size_align_unchecked(self.capacity, self.alignment) };
                unsafe { std::alloc::dealloc(self.ptr, layout) };
            }
        }
    }
}

// SAFETY: HostBlock exclusively owns its region and releases it on drop, so
// moving it to another thread moves the sole handle to the memory.
unsafe impl Send for HostBlock {}

// SAFETY: shared references only hand out read access to the region; writers
// go through &mut.
unsafe impl Sync for HostBlock {}

impl std::fmt::Debug for HostBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBlock")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .field("pinned", &self.pinned)
            .finish()
    }
}
