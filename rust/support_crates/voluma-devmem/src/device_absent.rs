/// Device support is not compiled in.
pub const AVAILABLE: bool = false;

/// Allocation granule the device heap would use; kept so size arithmetic
/// type-checks identically in both configurations.
pub const ALLOC_GRANULE: usize = 256;

/// Always fails: this build carries no device heap.
///
/// Build with the `device` cargo feature to get the real backend.
pub fn allocate(_size: usize) -> std::io::Result<(*mut u8, usize)> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "device heap is not compiled in (enable the `device` feature)",
    ))
}

/// Counterpart of the device-heap `free`; unreachable because [`allocate`]
/// never succeeds in this configuration.
///
/// # Safety
///
/// Never callable with a live device pointer.
pub unsafe fn free(_ptr: *mut u8, _size: usize) -> std::io::Result<()> {
    unreachable!("no device allocation can exist without device support")
}

/// Unreachable; see [`free`].
///
/// # Safety
///
/// Never callable with a live device pointer.
pub unsafe fn fill(_dst: *mut u8, _value: u8, _bytes: usize) {
    unreachable!("no device allocation can exist without device support")
}

/// Unreachable; see [`free`].
///
/// # Safety
///
/// Never callable with a live device pointer.
pub unsafe fn copy_in(_dst: *mut u8, _src: *const u8, _bytes: usize) {
    unreachable!("no device allocation can exist without device support")
}

/// Unreachable; see [`free`].
///
/// # Safety
///
/// Never callable with a live device pointer.
pub unsafe fn copy_out(_dst: *mut u8, _src: *const u8, _bytes: usize) {
    unreachable!("no device allocation can exist without device support")
}

/// Unreachable; see [`free`].
///
/// # Safety
///
/// Never callable with a live device pointer.
pub unsafe fn copy_within(_dst: *mut u8, _src: *const u8, _bytes: usize) {
    unreachable!("no device allocation can exist without device support")
}
