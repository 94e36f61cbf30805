use std::alloc::{Layout, alloc_zeroed, dealloc};

/// Device support is compiled in.
pub const AVAILABLE: bool = true;

/// Allocation granule of the device heap in bytes.
///
/// Device allocators hand out memory in coarse, power-of-two granules; 256
/// bytes matches the allocation granularity common across accelerator
/// runtimes, so sizes and pointers observed through this module behave the
/// way a real device heap would.
pub const ALLOC_GRANULE: usize = 256;

/// Allocates `size` bytes of zeroed device memory.
///
/// This is the emulated device heap: a host-side arena whose allocations are
/// aligned to [`ALLOC_GRANULE`] and whose capacity is rounded up to the next
/// granule. The returned pointer stands in for an accelerator address and
/// must only be touched through the functions of this module.
///
/// # Returns
///
/// `Ok((ptr, capacity))` with the granule-aligned pointer and rounded
/// capacity, or an out-of-memory error.
///
/// # Safety
///
/// The returned pointer must be released with [`free`], passing the same
/// capacity value.
pub fn allocate(size: usize) -> std::io::Result<(*mut u8, usize)> {
    let capacity = (size.max(1) + ALLOC_GRANULE - 1) & !(ALLOC_GRANULE - 1);
    let layout = Layout::from_size_align(capacity, ALLOC_GRANULE)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate device memory",
        ));
    }
    Ok((ptr, capacity))
}

/// Frees device memory that was allocated with [`allocate`].
///
/// # Safety
///
/// `ptr` must come from a previous [`allocate`] call that has not been freed
/// yet and `size` must match the returned capacity.
pub unsafe fn free(ptr: *mut u8, size: usize) -> std::io::Result<()> {
    assert!(size.is_multiple_of(ALLOC_GRANULE));
    // SAFETY: layout parameters were validated when the region was allocated.
    let layout = unsafe { Layout::from_size_align_unchecked(size, ALLOC_GRANULE) };
    unsafe {
        dealloc(ptr, layout);
    }
    Ok(())
}

/// Sets `bytes` bytes of device memory at `dst` to `value`.
///
/// # Safety
///
/// `dst` must point into a live device allocation with at least `bytes`
/// bytes available, and no other access to that range may overlap this call.
pub unsafe fn fill(dst: *mut u8, value: u8, bytes: usize) {
    unsafe { std::ptr::write_bytes(dst, value, bytes) }
}

/// Copies `bytes` bytes from host memory at `src` into device memory at
/// `dst`.
///
/// # Safety
///
/// `src` must be valid for `bytes` reads, `dst` must point into a live
/// device allocation with at least `bytes` bytes available, and the two
/// ranges must not overlap.
pub unsafe fn copy_in(dst: *mut u8, src: *const u8, bytes: usize) {
    unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) }
}

/// Copies `bytes` bytes from device memory at `src` into host memory at
/// `dst`.
///
/// # Safety
///
/// `src` must point into a live device allocation with at least `bytes`
/// bytes available, `dst` must be valid for `bytes` writes, and the two
/// ranges must not overlap.
pub unsafe fn copy_out(dst: *mut u8, src: *const u8, bytes: usize) {
    unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) }
}

/// Copies `bytes` bytes between two distinct device allocations.
///
/// # Safety
///
/// Both pointers must point into live device allocations with at least
/// `bytes` bytes available, and the two ranges must not overlap.
pub unsafe fn copy_within(dst: *mut u8, src: *const u8, bytes: usize) {
    unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) }
}
