//! The unchecked dual-location block and its supporting vocabulary types.

use std::marker::PhantomData;

use bytemuck::{AnyBitPattern, NoUninit};

use voluma_common::{Result, error::Error, verify_arg};
use voluma_devmem::device;
use voluma_devmem::device_block::{DeviceBlock, DevicePtr};
use voluma_devmem::host::HostBlock;
use voluma_devmem::stream::CopyStream;

/// One of the two locations a block's data can live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Host,
    Device,
}

impl Side {
    /// Returns the other side.
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Host => Side::Device,
            Side::Device => Side::Host,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Side::Host => "host",
            Side::Device => "device",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of sides a block owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Host memory only.
    HostOnly,
    /// Device memory only.
    DeviceOnly,
    /// Both locations at once, as two independent copies.
    Both,
}

impl Placement {
    /// Returns `true` if this placement includes the host side.
    #[inline]
    pub fn wants_host(self) -> bool {
        matches!(self, Placement::HostOnly | Placement::Both)
    }

    /// Returns `true` if this placement includes the device side.
    #[inline]
    pub fn wants_device(self) -> bool {
        matches!(self, Placement::DeviceOnly | Placement::Both)
    }

    /// Returns `true` if this placement includes `side`.
    #[inline]
    pub fn includes(self, side: Side) -> bool {
        match side {
            Side::Host => self.wants_host(),
            Side::Device => self.wants_device(),
        }
    }
}

/// Source and destination sides of a block-to-block copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyDirection {
    HostToHost,
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

impl CopyDirection {
    /// The side the data is read from.
    #[inline]
    pub fn source(self) -> Side {
        match self {
            CopyDirection::HostToHost | CopyDirection::HostToDevice => Side::Host,
            CopyDirection::DeviceToHost | CopyDirection::DeviceToDevice => Side::Device,
        }
    }

    /// The side the data is written to.
    #[inline]
    pub fn destination(self) -> Side {
        match self {
            CopyDirection::HostToHost | CopyDirection::DeviceToHost => Side::Host,
            CopyDirection::HostToDevice | CopyDirection::DeviceToDevice => Side::Device,
        }
    }

    /// Returns `true` if either endpoint is the device side.
    #[inline]
    pub fn touches_device(self) -> bool {
        self.source() == Side::Device || self.destination() == Side::Device
    }
}

impl std::fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.source(), self.destination())
    }
}

/// How the host side of a block was allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostStrategy {
    /// A regular global-allocator allocation.
    Plain,
    /// Page-locked memory suitable for asynchronous device transfers.
    Pinned,
}

/// The owned allocations of a block, at most one per side.
enum Sides {
    None,
    Host(HostBlock),
    Device(DeviceBlock),
    Both { host: HostBlock, device: DeviceBlock },
}

impl Sides {
    fn from_parts(host: Option<HostBlock>, device: Option<DeviceBlock>) -> Sides {
        match (host, device) {
            (None, None) => Sides::None,
            (Some(host), None) => Sides::Host(host),
            (None, Some(device)) => Sides::Device(device),
            (Some(host), Some(device)) => Sides::Both { host, device },
        }
    }

    fn host(&self) -> Option<&HostBlock> {
        match self {
            Sides::Host(host) | Sides::Both { host, .. } => Some(host),
            _ => None,
        }
    }

    fn host_mut(&mut self) -> Option<&mut HostBlock> {
        match self {
            Sides::Host(host) | Sides::Both { host, .. } => Some(host),
            _ => None,
        }
    }

    fn device(&self) -> Option<&DeviceBlock> {
        match self {
            Sides::Device(device) | Sides::Both { device, .. } => Some(device),
            _ => None,
        }
    }

    fn device_mut(&mut self) -> Option<&mut DeviceBlock> {
        match self {
            Sides::Device(device) | Sides::Both { device, .. } => Some(device),
            _ => None,
        }
    }

    fn placement(&self) -> Option<Placement> {
        match self {
            Sides::None => None,
            Sides::Host(_) => Some(Placement::HostOnly),
            Sides::Device(_) => Some(Placement::DeviceOnly),
            Sides::Both { .. } => Some(Placement::Both),
        }
    }
}

/// A typed array that can live in host memory, device memory, or both.
///
/// The element type must admit any bit pattern ([`AnyBitPattern`]) and
/// contain no padding or uninitialized bytes ([`NoUninit`]), so either side
/// can be read or overwritten as raw bytes. Every allocation starts
/// zero-filled.
///
/// The sides a block owns are chosen at construction and preserved across
/// [`resize`](Self::resize); [`release`](Self::release) and drop free them.
/// A block that owns both sides keeps two independent copies of the data;
/// moving data between them is the caller's job, through the transfer
/// operations. [`CheckedBlock`](crate::CheckedBlock) wraps this type and
/// tracks which copy is current.
pub struct MemoryBlock<T> {
    sides: Sides,
    count: usize,
    _marker: PhantomData<T>,
}

impl<T> MemoryBlock<T>
where
    T: AnyBitPattern + NoUninit,
{
    /// Allocates a zero-filled block of `count` elements on the sides named
    /// by `placement`.
    ///
    /// When `placement` is [`Placement::Both`], the host side uses the
    /// pinned (page-locked) strategy so device transfers can run
    /// asynchronously; see [`with_pinning`](Self::with_pinning) to opt out.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::NoDeviceSupport`] if `placement` includes the
    /// device side without the `device` feature compiled in, and with
    /// [`ErrorKind::AllocFailed`] if an allocation fails. On failure nothing
    /// stays allocated.
    ///
    /// [`ErrorKind::NoDeviceSupport`]: voluma_common::error::ErrorKind::NoDeviceSupport
    /// [`ErrorKind::AllocFailed`]: voluma_common::error::ErrorKind::AllocFailed
    pub fn new(count: usize, placement: Placement) -> Result<MemoryBlock<T>> {
        Self::with_pinning(count, placement, true)
    }

    /// Like [`new`](Self::new), but with an explicit host strategy choice:
    /// when `pinned` is `false` the host side stays on the global allocator
    /// even for [`Placement::Both`].
    ///
    /// Host-only blocks always use the plain strategy; page-locking only
    /// pays off when there is a device side to transfer against.
    pub fn with_pinning(count: usize, placement: Placement, pinned: bool) -> Result<MemoryBlock<T>> {
        let bytes = Self::byte_len_for(count)?;
        let sides = Self::allocate_sides(bytes, placement, pinned, "new")?;
        Ok(MemoryBlock {
            sides,
            count,
            _marker: PhantomData,
        })
    }

    /// Resizes the block to `count` elements, keeping its placement and host
    /// strategy.
    ///
    /// The resize is destructive: both sides come back zero-filled. Resizing
    /// to the current length is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the reallocation fails; the block is left released in that
    /// case.
    pub fn resize(&mut self, count: usize) -> Result<()> {
        self.resize_with(count, true)
    }

    /// Like [`resize`](Self::resize), but when `force_reallocation` is
    /// `false` a shrink only lowers the logical length and keeps the larger
    /// allocations, contents included. Growth always reallocates.
    pub fn resize_with(&mut self, count: usize, force_reallocation: bool) -> Result<()> {
        if count == self.count {
            return Ok(());
        }
        if count > self.count || force_reallocation {
            let bytes = Self::byte_len_for(count)?;
            let placement = self.sides.placement();
            let pinned = matches!(self.host_strategy(), Some(HostStrategy::Pinned));
            // Free before reallocating so both generations never coexist.
            self.sides = Sides::None;
            if let Some(placement) = placement {
                self.sides = Self::allocate_sides(bytes, placement, pinned, "resize")?;
            }
        }
        self.count = count;
        Ok(())
    }

    /// Returns the host copy as a typed slice.
    ///
    /// # Errors
    ///
    /// Fails if the host side is not allocated.
    pub fn as_slice(&self) -> Result<&[T]> {
        let host = self.require_host("as_slice")?;
        // SAFETY: the host block holds at least `count * size_of::<T>()`
        // initialized bytes at T's alignment, and T admits any bit pattern.
        Ok(unsafe { std::slice::from_raw_parts(host.ptr() as *const T, self.count) })
    }

    /// Returns the host copy as a mutable typed slice.
    ///
    /// # Errors
    ///
    /// Fails if the host side is not allocated.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        let count = self.count;
        let host = self.require_host_mut("as_mut_slice")?;
        // SAFETY: as in `as_slice`; `&mut self` guarantees exclusive access.
        Ok(unsafe { std::slice::from_raw_parts_mut(host.ptr() as *mut T, count) })
    }

    /// Returns the opaque handle of the device allocation.
    ///
    /// The handle stays valid until the device side is freed by a resize,
    /// a release, or drop.
    ///
    /// # Errors
    ///
    /// Fails if the device side is not allocated, or with
    /// [`ErrorKind::NoDeviceSupport`] when device support is not compiled in.
    ///
    /// [`ErrorKind::NoDeviceSupport`]: voluma_common::error::ErrorKind::NoDeviceSupport
    pub fn device_ptr(&self) -> Result<DevicePtr> {
        ensure_device("device_ptr")?;
        let device = self.require_device("device_ptr")?;
        Ok(device.device_ptr())
    }

    /// Reads one element from the chosen side.
    ///
    /// A device-side read performs a single-element download, so this is a
    /// debugging aid rather than a bulk access path.
    ///
    /// # Errors
    ///
    /// Fails if `index` is out of range or the side is not allocated.
    pub fn get(&self, index: usize, side: Side) -> Result<T> {
        verify_arg!(index, index < self.count);
        match side {
            Side::Host => Ok(self.as_slice()?[index]),
            Side::Device => {
                ensure_device("get")?;
                let device = self.require_device("get")?;
                let mut value = T::zeroed();
                device.read_at(index * size_of::<T>(), bytemuck::bytes_of_mut(&mut value));
                Ok(value)
            }
        }
    }

    /// Overwrites every byte of every allocated side with `value`.
    ///
    /// On a released block this does nothing.
    pub fn fill(&mut self, value: u8) {
        self.fill_sides(value, true, true);
    }

    /// Overwrites every byte of the selected sides with `value`.
    ///
    /// A selected side that is not allocated is skipped.
    pub fn fill_sides(&mut self, value: u8, host: bool, device: bool) {
        let bytes = self.byte_len();
        if host {
            if let Some(block) = self.sides.host_mut() {
                block.as_bytes_mut()[..bytes].fill(value);
            }
        }
        if device {
            if let Some(block) = self.sides.device_mut() {
                block.fill(value, bytes);
            }
        }
    }

    /// Enqueues a fill of the device side on `stream`, skipping it when the
    /// device side is not allocated.
    ///
    /// # Safety
    ///
    /// The caller must keep `self` alive and leave the device side untouched
    /// until `stream` has been synchronized.
    pub unsafe fn fill_device_async(&mut self, value: u8, stream: &CopyStream) {
        let bytes = self.byte_len();
        if let Some(block) = self.sides.device_mut() {
            // SAFETY: liveness of the destination is forwarded to the
            // caller.
            unsafe { stream.enqueue_fill(block.device_ptr(), value, bytes) };
        }
    }

    /// Copies the host contents over the device copy.
    ///
    /// # Errors
    ///
    /// Fails unless both sides are allocated, or with
    /// [`ErrorKind::NoDeviceSupport`] when device support is not compiled in.
    ///
    /// [`ErrorKind::NoDeviceSupport`]: voluma_common::error::ErrorKind::NoDeviceSupport
    pub fn transfer_to_device(&mut self) -> Result<()> {
        ensure_device("transfer_to_device")?;
        let bytes = self.byte_len();
        let (host, device) = self.both_mut("transfer_to_device")?;
        device.write_from(&host.as_bytes()[..bytes]);
        Ok(())
    }

    /// Copies the device contents over the host copy.
    ///
    /// # Errors
    ///
    /// Same conditions as [`transfer_to_device`](Self::transfer_to_device).
    pub fn transfer_to_host(&mut self) -> Result<()> {
        ensure_device("transfer_to_host")?;
        let bytes = self.byte_len();
        let (host, device) = self.both_mut("transfer_to_host")?;
        device.read_into(&mut host.as_bytes_mut()[..bytes]);
        Ok(())
    }

    /// Enqueues a host-to-device transfer on `stream`.
    ///
    /// # Safety
    ///
    /// The caller must keep `self` alive and must not access or free either
    /// side until `stream` has been synchronized.
    pub unsafe fn transfer_to_device_async(&mut self, stream: &CopyStream) -> Result<()> {
        ensure_device("transfer_to_device_async")?;
        let bytes = self.byte_len();
        let (host, device) = self.both_mut("transfer_to_device_async")?;
        // SAFETY: endpoint liveness is forwarded to the caller.
        unsafe { stream.enqueue_host_to_device(host.ptr(), device.device_ptr(), bytes) };
        Ok(())
    }

    /// Enqueues a device-to-host transfer on `stream`.
    ///
    /// # Safety
    ///
    /// Same contract as
    /// [`transfer_to_device_async`](Self::transfer_to_device_async).
    pub unsafe fn transfer_to_host_async(&mut self, stream: &CopyStream) -> Result<()> {
        ensure_device("transfer_to_host_async")?;
        let bytes = self.byte_len();
        let (host, device) = self.both_mut("transfer_to_host_async")?;
        // SAFETY: endpoint liveness is forwarded to the caller.
        unsafe { stream.enqueue_device_to_host(device.device_ptr(), host.ptr(), bytes) };
        Ok(())
    }

    /// Copies `source`'s contents into `self` along `direction`, resizing
    /// `self` to `source.len()` first.
    ///
    /// The source side must be allocated on `source` and the destination
    /// side on `self`; the resize preserves placement, so the destination
    /// check holds before and after it.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::DirectionMismatch`] when an endpoint is
    /// missing, with [`ErrorKind::NoDeviceSupport`] when `direction` touches
    /// the device without device support compiled in, and propagates resize
    /// failures.
    ///
    /// [`ErrorKind::DirectionMismatch`]: voluma_common::error::ErrorKind::DirectionMismatch
    /// [`ErrorKind::NoDeviceSupport`]: voluma_common::error::ErrorKind::NoDeviceSupport
    pub fn copy_from(&mut self, source: &MemoryBlock<T>, direction: CopyDirection) -> Result<()> {
        const OP: &str = "copy_from";
        self.copy_prologue(source, direction, OP)?;
        let bytes = self.byte_len();
        match direction {
            CopyDirection::HostToHost => {
                let src = source.require_host(OP)?;
                let dst = self.require_host_mut(OP)?;
                dst.as_bytes_mut()[..bytes].copy_from_slice(&src.as_bytes()[..bytes]);
            }
            CopyDirection::HostToDevice => {
                let src = source.require_host(OP)?;
                let dst = self.require_device_mut(OP)?;
                dst.write_from(&src.as_bytes()[..bytes]);
            }
            CopyDirection::DeviceToHost => {
                let src = source.require_device(OP)?;
                let dst = self.require_host_mut(OP)?;
                src.read_into(&mut dst.as_bytes_mut()[..bytes]);
            }
            CopyDirection::DeviceToDevice => {
                let src = source.require_device(OP)?;
                let dst = self.require_device_mut(OP)?;
                dst.copy_from(src, bytes);
            }
        }
        Ok(())
    }

    /// Enqueues the device-touching legs of [`copy_from`](Self::copy_from)
    /// on `stream`.
    ///
    /// Host-to-device and device-to-device copies are enqueued; host-to-host
    /// and device-to-host copies have no asynchronous path and complete
    /// before this returns.
    ///
    /// # Safety
    ///
    /// The caller must keep both blocks alive and leave the involved sides
    /// untouched until `stream` has been synchronized.
    pub unsafe fn copy_from_async(
        &mut self,
        source: &MemoryBlock<T>,
        direction: CopyDirection,
        stream: &CopyStream,
    ) -> Result<()> {
        const OP: &str = "copy_from_async";
        self.copy_prologue(source, direction, OP)?;
        let bytes = self.byte_len();
        match direction {
            CopyDirection::HostToDevice => {
                let src = source.require_host(OP)?;
                let dst = self.require_device_mut(OP)?;
                // SAFETY: endpoint liveness is forwarded to the caller.
                unsafe { stream.enqueue_host_to_device(src.ptr(), dst.device_ptr(), bytes) };
            }
            CopyDirection::DeviceToDevice => {
                let src = source.require_device(OP)?;
                let dst = self.require_device_mut(OP)?;
                // SAFETY: endpoint liveness is forwarded to the caller.
                unsafe {
                    stream.enqueue_device_to_device(src.device_ptr(), dst.device_ptr(), bytes)
                };
            }
            CopyDirection::HostToHost | CopyDirection::DeviceToHost => {
                return self.copy_from(source, direction);
            }
        }
        Ok(())
    }

    fn copy_prologue(
        &mut self,
        source: &MemoryBlock<T>,
        direction: CopyDirection,
        op: &str,
    ) -> Result<()> {
        if direction.touches_device() {
            ensure_device(op)?;
        }
        if !source.has_side(direction.source()) || !self.has_side(direction.destination()) {
            return Err(Error::direction_mismatch(op, direction.to_string()));
        }
        self.resize(source.len())
    }

    fn allocate_sides(bytes: usize, placement: Placement, pinned: bool, op: &str) -> Result<Sides> {
        if placement.wants_device() && !device::AVAILABLE {
            return Err(Error::no_device_support(op));
        }
        let host = if placement.wants_host() {
            // Pinning only pays off when a device side exists to transfer
            // against.
            let pin = pinned && placement.wants_device();
            Some(Self::allocate_host(bytes, pin)?)
        } else {
            None
        };
        let device = if placement.wants_device() {
            Some(DeviceBlock::allocate(bytes).map_err(|e| Error::alloc_failed(bytes, e))?)
        } else {
            None
        };
        Ok(Sides::from_parts(host, device))
    }

    fn allocate_host(bytes: usize, pin: bool) -> Result<HostBlock> {
        let align = align_of::<T>();
        // The pinned path guarantees page alignment only; over-aligned
        // element types fall back to a plain allocation.
        let block = if pin && align <= voluma_devmem::pinned::get_page_size() {
            HostBlock::allocate_pinned(bytes)
        } else {
            HostBlock::allocate(bytes, align)
        };
        block.map_err(|e| Error::alloc_failed(bytes, e))
    }

    fn byte_len_for(count: usize) -> Result<usize> {
        count
            .checked_mul(size_of::<T>())
            .ok_or_else(|| Error::invalid_arg("count", "element count overflows the byte range"))
    }
}

impl<T> MemoryBlock<T> {
    /// Exchanges the entire contents of two blocks, allocations and logical
    /// lengths included. Constant time; no element data moves.
    pub fn swap(&mut self, other: &mut MemoryBlock<T>) {
        std::mem::swap(&mut self.sides, &mut other.sides);
        std::mem::swap(&mut self.count, &mut other.count);
    }

    /// Frees every allocated side.
    ///
    /// The logical length is kept. Calling this again, or dropping the
    /// block, is a no-op.
    pub fn release(&mut self) {
        self.sides = Sides::None;
    }

    /// Returns the logical length in elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if the logical length is zero.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns `true` if the host side is allocated.
    #[inline]
    pub fn has_host(&self) -> bool {
        self.sides.host().is_some()
    }

    /// Returns `true` if the device side is allocated.
    #[inline]
    pub fn has_device(&self) -> bool {
        self.sides.device().is_some()
    }

    /// Returns `true` if `side` is allocated.
    #[inline]
    pub fn has_side(&self, side: Side) -> bool {
        match side {
            Side::Host => self.has_host(),
            Side::Device => self.has_device(),
        }
    }

    /// Returns the sides this block currently owns, or `None` after a
    /// release.
    pub fn placement(&self) -> Option<Placement> {
        self.sides.placement()
    }

    /// Returns the strategy of the host allocation, or `None` when the host
    /// side is not allocated.
    pub fn host_strategy(&self) -> Option<HostStrategy> {
        self.sides.host().map(|host| {
            if host.is_pinned() {
                HostStrategy::Pinned
            } else {
                HostStrategy::Plain
            }
        })
    }

    fn require_host(&self, op: &str) -> Result<&HostBlock> {
        self.sides
            .host()
            .ok_or_else(|| Error::inactive_side(op, Side::Host.name()))
    }

    fn require_host_mut(&mut self, op: &str) -> Result<&mut HostBlock> {
        self.sides
            .host_mut()
            .ok_or_else(|| Error::inactive_side(op, Side::Host.name()))
    }

    fn require_device(&self, op: &str) -> Result<&DeviceBlock> {
        self.sides
            .device()
            .ok_or_else(|| Error::inactive_side(op, Side::Device.name()))
    }

    fn require_device_mut(&mut self, op: &str) -> Result<&mut DeviceBlock> {
        self.sides
            .device_mut()
            .ok_or_else(|| Error::inactive_side(op, Side::Device.name()))
    }

    fn both_mut(&mut self, op: &str) -> Result<(&mut HostBlock, &mut DeviceBlock)> {
        match &mut self.sides {
            Sides::Both { host, device } => Ok((host, device)),
            // The missing device side is reported first when both are gone.
            Sides::Host(_) | Sides::None => Err(Error::inactive_side(op, Side::Device.name())),
            Sides::Device(_) => Err(Error::inactive_side(op, Side::Host.name())),
        }
    }

    fn byte_len(&self) -> usize {
        // The multiplication was overflow-checked when `count` was set.
        self.count * size_of::<T>()
    }
}

fn ensure_device(op: &str) -> Result<()> {
    if device::AVAILABLE {
        Ok(())
    } else {
        Err(Error::no_device_support(op))
    }
}

impl<T> std::fmt::Debug for MemoryBlock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("len", &self.count)
            .field("placement", &self.placement())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use voluma_common::error::ErrorKind;

    #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Voxel {
        density: f32,
        weight: u32,
    }

    #[test]
    fn test_host_only_starts_zeroed() {
        let block = MemoryBlock::<i32>::new(16, Placement::HostOnly).unwrap();
        assert_eq!(block.len(), 16);
        assert!(!block.is_empty());
        assert_eq!(block.placement(), Some(Placement::HostOnly));
        assert!(block.has_host());
        assert!(!block.has_device());
        assert_eq!(block.host_strategy(), Some(HostStrategy::Plain));
        assert!(block.as_slice().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_host_write_and_read() {
        let mut block = MemoryBlock::<u64>::new(8, Placement::HostOnly).unwrap();
        for (i, slot) in block.as_mut_slice().unwrap().iter_mut().enumerate() {
            *slot = (i as u64) * 3;
        }
        assert_eq!(block.as_slice().unwrap()[5], 15);
        assert_eq!(block.get(7, Side::Host).unwrap(), 21);
    }

    #[test]
    fn test_device_placement_requires_support() {
        if device::AVAILABLE {
            println!("device heap compiled in, skipping");
            return;
        }
        let err = MemoryBlock::<i32>::new(4, Placement::DeviceOnly).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
        let err = MemoryBlock::<i32>::new(4, Placement::Both).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
        // A zero-length request still reports the missing capability.
        let err = MemoryBlock::<i32>::new(0, Placement::DeviceOnly).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));

        // Device operations on a host-only block report the capability, not
        // the inactive side.
        let mut block = MemoryBlock::<i32>::new(4, Placement::HostOnly).unwrap();
        let err = block.transfer_to_device().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
        let err = block.get(0, Side::Device).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
        let err = block.device_ptr().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
    }

    #[test]
    fn test_transfer_needs_both_sides() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut host_only = MemoryBlock::<i32>::new(4, Placement::HostOnly).unwrap();
        let err = host_only.transfer_to_device().unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::InactiveSide { side, .. } if side == "device"),
            "unexpected error: {err}"
        );
        let mut device_only = MemoryBlock::<i32>::new(4, Placement::DeviceOnly).unwrap();
        let err = device_only.transfer_to_host().unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::InactiveSide { side, .. } if side == "host"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_pinning_follows_placement() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let both = MemoryBlock::<f32>::new(8, Placement::Both).unwrap();
        assert_eq!(both.host_strategy(), Some(HostStrategy::Pinned));

        let both_plain = MemoryBlock::<f32>::with_pinning(8, Placement::Both, false).unwrap();
        assert_eq!(both_plain.host_strategy(), Some(HostStrategy::Plain));

        // Pinning is never applied without a device side.
        let host_only = MemoryBlock::<f32>::with_pinning(8, Placement::HostOnly, true).unwrap();
        assert_eq!(host_only.host_strategy(), Some(HostStrategy::Plain));

        let device_only = MemoryBlock::<f32>::new(8, Placement::DeviceOnly).unwrap();
        assert_eq!(device_only.host_strategy(), None);
    }

    #[test]
    fn test_transfer_roundtrip() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = MemoryBlock::<u64>::new(257, Placement::Both).unwrap();
        let expected: Vec<u64> = (0..257).map(|_| fastrand::u64(..)).collect();
        block.as_mut_slice().unwrap().copy_from_slice(&expected);

        block.transfer_to_device().unwrap();
        // Wipe the host copy to prove the data really came back from the
        // device.
        block.fill_sides(0, true, false);
        assert!(block.as_slice().unwrap().iter().all(|&v| v == 0));

        block.transfer_to_host().unwrap();
        assert_eq!(block.as_slice().unwrap(), &expected[..]);
    }

    #[test]
    fn test_get_device_element() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = MemoryBlock::<i32>::new(10, Placement::Both).unwrap();
        block.as_mut_slice().unwrap()[3] = -77;
        block.transfer_to_device().unwrap();
        assert_eq!(block.get(3, Side::Device).unwrap(), -77);
        assert_eq!(block.get(9, Side::Device).unwrap(), 0);

        let err = block.get(10, Side::Host).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_fill_covers_active_sides() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = MemoryBlock::<u32>::new(6, Placement::Both).unwrap();
        block.fill(0xAB);
        assert_eq!(block.get(0, Side::Host).unwrap(), 0xABAB_ABAB);
        assert_eq!(block.get(5, Side::Device).unwrap(), 0xABAB_ABAB);

        // A device-targeted fill leaves the host copy alone.
        block.fill_sides(0x11, false, true);
        assert_eq!(block.get(0, Side::Host).unwrap(), 0xABAB_ABAB);
        assert_eq!(block.get(0, Side::Device).unwrap(), 0x1111_1111);
    }

    #[test]
    fn test_fill_skips_inactive_sides() {
        let mut block = MemoryBlock::<u8>::new(4, Placement::HostOnly).unwrap();
        // Asking for the device side of a host-only block is a no-op.
        block.fill_sides(0x5A, true, true);
        assert_eq!(block.as_slice().unwrap(), &[0x5A; 4]);

        block.release();
        block.fill(0xFF);
        assert_eq!(block.placement(), None);
    }

    #[test]
    fn test_resize_then_release_twice() {
        let mut block = MemoryBlock::<i32>::new(4, Placement::HostOnly).unwrap();
        block
            .as_mut_slice()
            .unwrap()
            .copy_from_slice(&[10, 20, 30, 40]);

        block.resize(2).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(block.placement(), Some(Placement::HostOnly));
        // The resize is destructive, so the survivors are zeroed, not
        // preserved.
        assert_eq!(block.as_slice().unwrap(), &[0, 0]);

        block.release();
        block.release();
        assert_eq!(block.placement(), None);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_resize_preserves_placement_and_strategy() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = MemoryBlock::<f32>::new(4, Placement::Both).unwrap();
        block.resize(1024).unwrap();
        assert_eq!(block.len(), 1024);
        assert_eq!(block.placement(), Some(Placement::Both));
        assert_eq!(block.host_strategy(), Some(HostStrategy::Pinned));
        assert!(block.as_slice().unwrap().iter().all(|&v| v == 0.0));

        let mut plain = MemoryBlock::<f32>::with_pinning(4, Placement::Both, false).unwrap();
        plain.resize(16).unwrap();
        assert_eq!(plain.host_strategy(), Some(HostStrategy::Plain));
    }

    #[test]
    fn test_logical_shrink_keeps_contents() {
        let mut block = MemoryBlock::<u16>::new(8, Placement::HostOnly).unwrap();
        for (i, slot) in block.as_mut_slice().unwrap().iter_mut().enumerate() {
            *slot = i as u16;
        }

        block.resize_with(4, false).unwrap();
        assert_eq!(block.len(), 4);
        assert_eq!(block.as_slice().unwrap(), &[0, 1, 2, 3]);

        // Growing back reallocates and zeroes even through the shrink-only
        // path.
        block.resize_with(8, false).unwrap();
        assert_eq!(block.as_slice().unwrap(), &[0; 8]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut block = MemoryBlock::<u8>::new(32, Placement::HostOnly).unwrap();
        block.release();
        block.release();
        assert_eq!(block.placement(), None);
        assert!(!block.has_host());

        let err = block.as_slice().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InactiveSide { .. }));
        let err = block.get(0, Side::Host).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InactiveSide { .. }));

        // A released block can still change its logical length; it stays
        // released.
        block.resize(64).unwrap();
        assert_eq!(block.len(), 64);
        assert_eq!(block.placement(), None);
    }

    #[test]
    fn test_zero_count_sides_are_active() {
        let block = MemoryBlock::<i64>::new(0, Placement::HostOnly).unwrap();
        assert!(block.is_empty());
        assert!(block.has_host());
        assert_eq!(block.as_slice().unwrap().len(), 0);

        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping the rest");
            return;
        }
        let mut both = MemoryBlock::<i64>::new(0, Placement::Both).unwrap();
        assert!(both.has_device());
        both.fill(0xCC);
        both.transfer_to_device().unwrap();
        both.transfer_to_host().unwrap();
    }

    #[test]
    fn test_swap_exchanges_everything() {
        let mut a = MemoryBlock::<i32>::new(3, Placement::HostOnly).unwrap();
        a.as_mut_slice().unwrap().copy_from_slice(&[1, 2, 3]);
        let mut b = MemoryBlock::<i32>::new(5, Placement::HostOnly).unwrap();

        a.swap(&mut b);
        assert_eq!(a.len(), 5);
        assert_eq!(b.len(), 3);
        assert_eq!(b.as_slice().unwrap(), &[1, 2, 3]);
        assert!(a.as_slice().unwrap().iter().all(|&v| v == 0));

        // Swapping with a released block moves the allocation over.
        let mut released = MemoryBlock::<i32>::new(0, Placement::HostOnly).unwrap();
        released.release();
        b.swap(&mut released);
        assert_eq!(b.placement(), None);
        assert_eq!(released.as_slice().unwrap(), &[1, 2, 3]);

        // A second swap restores the original assignment.
        b.swap(&mut released);
        assert_eq!(b.as_slice().unwrap(), &[1, 2, 3]);
        assert_eq!(released.placement(), None);
    }

    #[test]
    fn test_copy_from_host_to_host() {
        let mut src = MemoryBlock::<u32>::new(6, Placement::HostOnly).unwrap();
        for (i, slot) in src.as_mut_slice().unwrap().iter_mut().enumerate() {
            *slot = (i as u32) + 100;
        }
        let mut dst = MemoryBlock::<u32>::new(2, Placement::HostOnly).unwrap();
        dst.copy_from(&src, CopyDirection::HostToHost).unwrap();
        assert_eq!(dst.len(), 6);
        assert_eq!(dst.as_slice().unwrap(), src.as_slice().unwrap());
    }

    #[test]
    fn test_copy_from_device_directions() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let expected: Vec<u32> = (0..300).map(|_| fastrand::u32(..)).collect();
        let mut src = MemoryBlock::<u32>::new(300, Placement::Both).unwrap();
        src.as_mut_slice().unwrap().copy_from_slice(&expected);

        // Host to device, then fetch it back through a device-to-device and
        // a device-to-host leg.
        let mut staged = MemoryBlock::<u32>::new(0, Placement::Both).unwrap();
        staged.copy_from(&src, CopyDirection::HostToDevice).unwrap();
        assert_eq!(staged.len(), 300);

        let mut mirrored = MemoryBlock::<u32>::new(1, Placement::Both).unwrap();
        mirrored
            .copy_from(&staged, CopyDirection::DeviceToDevice)
            .unwrap();

        let mut landed = MemoryBlock::<u32>::new(0, Placement::HostOnly).unwrap();
        landed
            .copy_from(&mirrored, CopyDirection::DeviceToHost)
            .unwrap();
        assert_eq!(landed.as_slice().unwrap(), &expected[..]);
    }

    #[test]
    fn test_copy_direction_mismatch() {
        let src = MemoryBlock::<u32>::new(9, Placement::HostOnly).unwrap();
        let mut dst = MemoryBlock::<u32>::new(4, Placement::HostOnly).unwrap();

        let err = dst.copy_from(&src, CopyDirection::DeviceToHost).unwrap_err();
        if device::AVAILABLE {
            assert!(matches!(err.kind(), ErrorKind::DirectionMismatch { .. }));
        } else {
            // Without device support the capability error wins.
            assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
        }

        let err = dst.copy_from(&src, CopyDirection::HostToDevice).unwrap_err();
        if device::AVAILABLE {
            assert!(matches!(err.kind(), ErrorKind::DirectionMismatch { .. }));
        } else {
            assert!(matches!(err.kind(), ErrorKind::NoDeviceSupport { .. }));
        }

        // The failed copy must not have resized the destination.
        assert_eq!(dst.len(), 4);
    }

    #[test]
    fn test_async_transfer_roundtrip() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let stream = CopyStream::new();
        let mut block = MemoryBlock::<u32>::new(1000, Placement::Both).unwrap();
        let expected: Vec<u32> = (0..1000).map(|_| fastrand::u32(..)).collect();
        block.as_mut_slice().unwrap().copy_from_slice(&expected);

        // SAFETY: the block outlives the synchronize calls below and is not
        // touched in between.
        unsafe { block.transfer_to_device_async(&stream).unwrap() };
        stream.synchronize();

        block.fill_sides(0, true, false);
        unsafe { block.transfer_to_host_async(&stream).unwrap() };
        stream.synchronize();
        assert_eq!(block.as_slice().unwrap(), &expected[..]);
    }

    #[test]
    fn test_async_fill_and_copy() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let stream = CopyStream::new();
        let mut src = MemoryBlock::<u8>::new(512, Placement::Both).unwrap();
        // SAFETY: src/dst outlive the synchronize calls and are left alone
        // while the stream works.
        unsafe { src.fill_device_async(0x3C, &stream) };
        stream.synchronize();
        assert_eq!(src.get(511, Side::Device).unwrap(), 0x3C);

        let mut dst = MemoryBlock::<u8>::new(0, Placement::Both).unwrap();
        unsafe {
            dst.copy_from_async(&src, CopyDirection::DeviceToDevice, &stream)
                .unwrap()
        };
        stream.synchronize();
        dst.transfer_to_host().unwrap();
        assert!(dst.as_slice().unwrap().iter().all(|&v| v == 0x3C));
    }

    #[test]
    fn test_struct_elements() {
        let mut block = MemoryBlock::<Voxel>::new(5, Placement::HostOnly).unwrap();
        block.as_mut_slice().unwrap()[2] = Voxel {
            density: 0.5,
            weight: 7,
        };
        let voxel = block.get(2, Side::Host).unwrap();
        assert_eq!(voxel.weight, 7);
        assert_eq!(voxel.density, 0.5);
        assert_eq!(block.get(0, Side::Host).unwrap(), Voxel::zeroed());

        block.resize(3).unwrap();
        assert_eq!(block.get(2, Side::Host).unwrap(), Voxel::zeroed());
    }

    #[test]
    fn test_count_overflow_is_rejected() {
        let err = MemoryBlock::<u64>::new(usize::MAX, Placement::HostOnly).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }
}
