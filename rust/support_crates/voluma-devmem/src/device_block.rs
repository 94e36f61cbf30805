//! RAII owner for a device heap allocation.
//!
//! Device memory cannot be read or written directly by the host; the
//! [`DeviceBlock`] methods are the only synchronous entry points, and
//! [`DevicePtr`] is deliberately opaque so a device address cannot leak into
//! ordinary pointer code. Asynchronous traffic goes through
//! [`crate::stream::CopyStream`], which accepts `DevicePtr` endpoints.

use crate::device;

/// An opaque device address.
///
/// Obtainable only from a live [`DeviceBlock`]; there is no way to
/// dereference it on the host. The inner representation matches a raw
/// pointer so it can be handed to a transfer backend unchanged.
#[derive(Clone, Copy)]
pub struct DevicePtr(pub(crate) *mut u8);

impl std::fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DevicePtr({:p})", self.0)
    }
}

// SAFETY: a DevicePtr is an address, not an access path; every dereference
// happens inside the device backend under that call's own safety contract.
unsafe impl Send for DevicePtr {}

/// An owned, zero-initialized device heap allocation.
///
/// Dropping the block returns the memory to the device heap. Zero-size
/// blocks hold a dangling granule-aligned address and perform no heap
/// traffic, but allocation still fails without compiled device support so
/// the capability error surfaces even for empty buffers.
pub struct DeviceBlock {
    ptr: *mut u8,
    capacity: usize,
}

impl DeviceBlock {
    /// Allocates `size` zeroed bytes on the device heap.
    ///
    /// # Errors
    ///
    /// Fails with [`std::io::ErrorKind::Unsupported`] when the crate was
    /// built without the `device` feature, or with the heap's own error when
    /// the allocation cannot be served.
    pub fn allocate(size: usize) -> std::io::Result<DeviceBlock> {
        if !device::AVAILABLE {
            // Matches the absent backend's failure; kept here so the
            // zero-size shortcut below cannot mask a missing capability.
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "device heap is not compiled in (enable the `device` feature)",
            ));
        }
        if size == 0 {
            return Ok(DeviceBlock {
                ptr: std::ptr::without_provenance_mut(device::ALLOC_GRANULE),
                capacity: 0,
            });
        }
        let (ptr, capacity) = device::allocate(size)?;
        assert!((ptr as usize).is_multiple_of(device::ALLOC_GRANULE));
        Ok(DeviceBlock { ptr, capacity })
    }

    /// Returns the allocated capacity in bytes (a multiple of the heap
    /// granule, possibly larger than the requested size).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the opaque address of the allocation for use as a transfer
    /// endpoint.
    #[inline]
    pub fn device_ptr(&self) -> DevicePtr {
        DevicePtr(self.ptr)
    }

    /// Sets the first `bytes` bytes of the allocation to `value`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds the capacity.
    pub fn fill(&mut self, value: u8, bytes: usize) {
        assert!(bytes <= self.capacity, "fill beyond device capacity");
        // SAFETY: dst is owned by self and bounds were checked above.
        unsafe { device::fill(self.ptr, value, bytes) }
    }

    /// Copies `src` into the beginning of the allocation (host to device).
    ///
    /// # Panics
    ///
    /// Panics if `src` is longer than the capacity.
    pub fn write_from(&mut self, src: &[u8]) {
        assert!(src.len() <= self.capacity, "write beyond device capacity");
        // SAFETY: dst is owned by self, bounds were checked, and a &mut
        // receiver plus a host slice cannot overlap a device allocation.
        unsafe { device::copy_in(self.ptr, src.as_ptr(), src.len()) }
    }

    /// Copies the beginning of the allocation into `dst` (device to host).
    ///
    /// # Panics
    ///
    /// Panics if `dst` is longer than the capacity.
    pub fn read_into(&self, dst: &mut [u8]) {
        self.read_at(0, dst);
    }

    /// Copies `dst.len()` bytes starting at byte `offset` of the allocation
    /// into `dst` (device to host).
    ///
    /// # Panics
    ///
    /// Panics if `offset + dst.len()` exceeds the capacity.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) {
        assert!(
            offset.checked_add(dst.len()).is_some_and(|end| end <= self.capacity),
            "read beyond device capacity"
        );
        // SAFETY: src range is owned by self and bounds were checked; a host
        // slice cannot overlap a device allocation.
        unsafe { device::copy_out(dst.as_mut_ptr(), self.ptr.add(offset), dst.len()) }
    }

    /// Copies `bytes` bytes from the beginning of `src` into the beginning
    /// of this allocation (device to device).
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds either capacity.
    pub fn copy_from(&mut self, src: &DeviceBlock, bytes: usize) {
        assert!(bytes <= self.capacity, "copy beyond device capacity");
        assert!(bytes <= src.capacity, "copy beyond source capacity");
        // SAFETY: bounds were checked, and &mut self alongside &src
        // guarantees two distinct allocations, so the ranges are disjoint.
        unsafe { device::copy_within(self.ptr, src.ptr, bytes) }
    }
}

impl Drop for DeviceBlock {
    fn drop(&mut self) {
        if self.capacity != 0 {
            let _ = unsafe { device::free(self.ptr, self.capacity) };
        }
    }
}

// SAFETY: DeviceBlock exclusively owns its device allocation and releases it
// on drop, so moving it to another thread moves the sole handle.
unsafe impl Send for DeviceBlock {}

// SAFETY: shared references expose read-only transfers; mutation requires
// &mut.
unsafe impl Sync for DeviceBlock {}

impl std::fmt::Debug for DeviceBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBlock")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .finish()
    }
}
