use std::sync::OnceLock;

/// Allocates page-locked host memory via anonymous `mmap` plus `mlock`.
///
/// The allocation is rounded up to the next page boundary and is readable,
/// writable and zero-filled. `mlock` keeps the pages resident so the region
/// can serve as the host endpoint of an asynchronous device transfer without
/// the OS paging it out mid-copy.
///
/// # Arguments
///
/// * `size` - The number of bytes to allocate. The actual allocation will be
///   rounded up to the nearest page boundary.
///
/// # Returns
///
/// `Ok((ptr, capacity))` with a page-aligned pointer and the rounded capacity
/// in bytes, or the `mmap` error.
///
/// # Locking
///
/// A failed `mlock` does not fail the allocation: `RLIMIT_MEMLOCK` is often
/// a few hundred kilobytes on unprivileged accounts, and an unlocked region
/// is still correct, merely not transfer-optimized. Raise the limit
/// (`ulimit -l`) to make locking effective.
///
/// # Safety
///
/// The returned pointer must be released with [`free`], passing the same
/// capacity value.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = (size.max(1) + page_size - 1) & !(page_size - 1);
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        let err = std::io::Error::last_os_error();
        return Err(err);
    }
    // Best effort: see the locking note above.
    if unsafe { libc::mlock(ptr, capacity) } != 0 {
        log::debug!(
            "mlock of {capacity} bytes failed ({}), continuing unlocked",
            std::io::Error::last_os_error()
        );
    }
    Ok((ptr, capacity))
}

/// Frees memory that was allocated with [`allocate`].
///
/// `size` must be the capacity **returned** by the allocation call, not the
/// originally requested byte count.
///
/// # Safety
///
/// `ptr` must come from a previous [`allocate`] call that has not been freed
/// yet, `size` must match the returned capacity, and no references into the
/// region may outlive this call.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    // munlock before unmapping; unlocked pages unlock as a no-op.
    let _ = unsafe { libc::munlock(ptr, size) };
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Gets the system's standard page size in bytes.
///
/// The value is read once through `sysconf(_SC_PAGESIZE)` and cached; most
/// systems report 4KB. Falls back to 4KB when the call fails.
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&size) = SIZE.get() {
        size
    } else {
        match read_page_size() {
            Ok(size) => {
                let _ = SIZE.set(size);
                size
            }
            Err(_) => 4 * 1024,
        }
    }
}

/// Reads the standard page size using `sysconf(_SC_PAGESIZE)`.
fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
