//! Staleness-checked decorator over [`MemoryBlock`].
//!
//! A [`CheckedBlock`] carries one monotonic time stamp per side. Mutable
//! accessors and directed copies advance the written side's stamp; reads of
//! a side whose counterpart holds a strictly newer stamp fail with
//! [`ErrorKind::StaleSide`] instead of handing out outdated data. Transfers
//! and fills declare the two copies consistent by setting both stamps to one
//! fresh sample.
//!
//! The stamps are an ordering heuristic, not a synchronization primitive:
//! they are not updated atomically with the underlying copy, and the
//! equal-stamp state after a transfer or fill means "not provably stale"
//! rather than "bitwise identical". One thread is expected to orchestrate
//! all operations on a given block.
//!
//! [`ErrorKind::StaleSide`]: voluma_common::error::ErrorKind::StaleSide

use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{AnyBitPattern, NoUninit};

use voluma_common::{Result, error::Error};
use voluma_devmem::device_block::DevicePtr;
use voluma_devmem::stream::CopyStream;

use crate::block::{CopyDirection, HostStrategy, MemoryBlock, Placement, Side};

/// Hands out process-wide monotonic stamps. Starts at 1 so 0 can never
/// collide with a handed-out value.
fn next_stamp() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A [`MemoryBlock`] with per-side last-write stamps and stale-read
/// detection.
///
/// Construction differs from the raw block in one way: requesting the
/// device side forces the host side on as well, so there is always a host
/// copy to validate transfers against.
///
/// Staleness only applies while both sides are allocated; a single-sided
/// block cannot be stale. [`get`](Self::get) deliberately skips the check
/// and serves as the recovery path for inspecting a side that the checked
/// accessors refuse.
pub struct CheckedBlock<T> {
    inner: MemoryBlock<T>,
    host_stamp: u64,
    device_stamp: u64,
}

impl<T> CheckedBlock<T>
where
    T: AnyBitPattern + NoUninit,
{
    /// Allocates a zero-filled checked block; see [`MemoryBlock::new`].
    ///
    /// [`Placement::DeviceOnly`] is widened to [`Placement::Both`]. Both
    /// stamps start equal, so either side is readable until the first write.
    pub fn new(count: usize, placement: Placement) -> Result<CheckedBlock<T>> {
        Self::with_pinning(count, placement, true)
    }

    /// Like [`new`](Self::new) with an explicit host strategy choice; see
    /// [`MemoryBlock::with_pinning`].
    pub fn with_pinning(
        count: usize,
        placement: Placement,
        pinned: bool,
    ) -> Result<CheckedBlock<T>> {
        let placement = if placement.wants_device() {
            Placement::Both
        } else {
            placement
        };
        let inner = MemoryBlock::with_pinning(count, placement, pinned)?;
        Ok(Self::wrap(inner))
    }

    /// Resizes the block destructively; see [`MemoryBlock::resize`].
    ///
    /// The stamps survive a resize, so a side that was flagged stale stays
    /// flagged until a transfer or fill declares the copies consistent
    /// again.
    pub fn resize(&mut self, count: usize) -> Result<()> {
        self.inner.resize(count)
    }

    /// See [`MemoryBlock::resize_with`].
    pub fn resize_with(&mut self, count: usize, force_reallocation: bool) -> Result<()> {
        self.inner.resize_with(count, force_reallocation)
    }

    /// Returns the host copy as a slice after a staleness check.
    ///
    /// Read-only access does not advance the host stamp.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::StaleSide`] if the device copy holds a
    /// strictly newer stamp, or if the host side is not allocated.
    ///
    /// [`ErrorKind::StaleSide`]: voluma_common::error::ErrorKind::StaleSide
    pub fn as_slice(&self) -> Result<&[T]> {
        self.verify_fresh("as_slice", Side::Host)?;
        self.inner.as_slice()
    }

    /// Returns the host copy as a mutable slice after a staleness check,
    /// and advances the host stamp: handing out a mutable view counts as a
    /// write even if the caller never stores through it.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.verify_fresh("as_mut_slice", Side::Host)?;
        let slice = self.inner.as_mut_slice()?;
        self.host_stamp = next_stamp();
        Ok(slice)
    }

    /// Returns the device handle after a staleness check, for read-only
    /// use. The device stamp is not advanced.
    pub fn device_ptr(&self) -> Result<DevicePtr> {
        self.verify_fresh("device_ptr", Side::Device)?;
        self.inner.device_ptr()
    }

    /// Returns the device handle for writing, advancing the device stamp.
    ///
    /// Use this when the handle is about to be passed to device-side work
    /// that may store into the block.
    pub fn device_ptr_mut(&mut self) -> Result<DevicePtr> {
        self.verify_fresh("device_ptr_mut", Side::Device)?;
        let ptr = self.inner.device_ptr()?;
        self.device_stamp = next_stamp();
        Ok(ptr)
    }

    /// Reads one element from the chosen side with no staleness check; see
    /// [`MemoryBlock::get`].
    ///
    /// This is the escape hatch for inspecting a side the checked accessors
    /// refuse.
    pub fn get(&self, index: usize, side: Side) -> Result<T> {
        self.inner.get(index, side)
    }

    /// Fills every allocated side with `value`; see [`MemoryBlock::fill`].
    ///
    /// Both stamps are set to one fresh sample first, matching the transfer
    /// operations: the fill defines the block's content, so neither side
    /// can be stale afterwards.
    pub fn fill(&mut self, value: u8) {
        self.fill_sides(value, true, true);
    }

    /// Fills the selected sides; see [`MemoryBlock::fill_sides`].
    ///
    /// The stamps are equalized even when only one side is selected. A
    /// one-sided fill of a two-sided block therefore leaves the copies
    /// unequal but unflagged; this mirrors the stamp protocol's documented
    /// behavior of treating any fill as a consistency point.
    pub fn fill_sides(&mut self, value: u8, host: bool, device: bool) {
        self.synchronize_stamps();
        self.inner.fill_sides(value, host, device);
    }

    /// Enqueues a device-side fill; see [`MemoryBlock::fill_device_async`].
    /// Stamps are equalized as in [`fill_sides`](Self::fill_sides).
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryBlock::fill_device_async`].
    pub unsafe fn fill_device_async(&mut self, value: u8, stream: &CopyStream) {
        self.synchronize_stamps();
        // SAFETY: the contract is forwarded to the caller.
        unsafe { self.inner.fill_device_async(value, stream) };
    }

    /// Copies the host contents over the device copy; see
    /// [`MemoryBlock::transfer_to_device`].
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::StaleSide`] if the host copy is older than
    /// the device copy, which would overwrite newer device data; otherwise
    /// as the raw transfer. On success both stamps are set equal.
    ///
    /// [`ErrorKind::StaleSide`]: voluma_common::error::ErrorKind::StaleSide
    pub fn transfer_to_device(&mut self) -> Result<()> {
        self.verify_fresh("transfer_to_device", Side::Host)?;
        self.inner.transfer_to_device()?;
        self.synchronize_stamps();
        Ok(())
    }

    /// Copies the device contents over the host copy; see
    /// [`MemoryBlock::transfer_to_host`].
    ///
    /// The device copy must not be older than the host copy; on success
    /// both stamps are set equal.
    pub fn transfer_to_host(&mut self) -> Result<()> {
        self.verify_fresh("transfer_to_host", Side::Device)?;
        self.inner.transfer_to_host()?;
        self.synchronize_stamps();
        Ok(())
    }

    /// Enqueues a host-to-device transfer with the same stamp handling as
    /// [`transfer_to_device`](Self::transfer_to_device).
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryBlock::transfer_to_device_async`].
    pub unsafe fn transfer_to_device_async(&mut self, stream: &CopyStream) -> Result<()> {
        self.verify_fresh("transfer_to_device_async", Side::Host)?;
        // SAFETY: the contract is forwarded to the caller.
        unsafe { self.inner.transfer_to_device_async(stream)? };
        self.synchronize_stamps();
        Ok(())
    }

    /// Enqueues a device-to-host transfer with the same stamp handling as
    /// [`transfer_to_host`](Self::transfer_to_host).
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryBlock::transfer_to_host_async`].
    pub unsafe fn transfer_to_host_async(&mut self, stream: &CopyStream) -> Result<()> {
        self.verify_fresh("transfer_to_host_async", Side::Device)?;
        // SAFETY: the contract is forwarded to the caller.
        unsafe { self.inner.transfer_to_host_async(stream)? };
        self.synchronize_stamps();
        Ok(())
    }

    /// Directed copy from another checked block; see
    /// [`MemoryBlock::copy_from`]. On success the destination side's stamp
    /// advances, so the untouched counterpart reads as stale until the next
    /// consistency point.
    pub fn copy_from(&mut self, source: &CheckedBlock<T>, direction: CopyDirection) -> Result<()> {
        self.inner.copy_from(&source.inner, direction)?;
        self.stamp_destination(direction);
        Ok(())
    }

    /// Asynchronous directed copy; see [`MemoryBlock::copy_from_async`].
    /// Stamp handling matches [`copy_from`](Self::copy_from).
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryBlock::copy_from_async`].
    pub unsafe fn copy_from_async(
        &mut self,
        source: &CheckedBlock<T>,
        direction: CopyDirection,
        stream: &CopyStream,
    ) -> Result<()> {
        // SAFETY: the contract is forwarded to the caller.
        unsafe { self.inner.copy_from_async(&source.inner, direction, stream)? };
        self.stamp_destination(direction);
        Ok(())
    }

    fn stamp_destination(&mut self, direction: CopyDirection) {
        match direction.destination() {
            Side::Host => self.host_stamp = next_stamp(),
            Side::Device => self.device_stamp = next_stamp(),
        }
    }

    fn verify_fresh(&self, op: &str, side: Side) -> Result<()> {
        // Single-sided blocks cannot go stale.
        if self.inner.has_host() && self.inner.has_device() {
            let own = self.stamp(side);
            let newest = self.stamp(side.opposite());
            // Strict comparison: tied stamps are consistent.
            if own < newest {
                return Err(Error::stale_side(op, side.name(), own, newest));
            }
        }
        Ok(())
    }
}

impl<T> CheckedBlock<T> {
    /// Wraps an existing block with fresh, equal stamps.
    ///
    /// The raw block's placement is taken as-is; a device-only block stays
    /// device-only and simply never trips the staleness check.
    pub fn wrap(inner: MemoryBlock<T>) -> CheckedBlock<T> {
        let stamp = next_stamp();
        CheckedBlock {
            inner,
            host_stamp: stamp,
            device_stamp: stamp,
        }
    }

    /// Unwraps the underlying block, discarding the stamps.
    pub fn into_inner(self) -> MemoryBlock<T> {
        self.inner
    }

    /// Exchanges the underlying blocks; see [`MemoryBlock::swap`].
    ///
    /// The stamps stay with the wrapper, not the data: after a swap each
    /// wrapper keeps its own staleness verdicts, which now describe the
    /// exchanged contents. Callers that swap checked blocks should follow
    /// up with a fill or transfer to re-establish meaningful stamps.
    pub fn swap(&mut self, other: &mut CheckedBlock<T>) {
        self.inner.swap(&mut other.inner);
    }

    /// Frees every allocated side; see [`MemoryBlock::release`].
    pub fn release(&mut self) {
        self.inner.release();
    }

    /// Sets both stamps to one fresh sample, declaring the sides
    /// consistent.
    ///
    /// This is the escape hatch for out-of-band synchronization, such as a
    /// device kernel writing both copies' worth of data followed by a
    /// manual download.
    pub fn synchronize_stamps(&mut self) {
        let stamp = next_stamp();
        self.host_stamp = stamp;
        self.device_stamp = stamp;
    }

    /// Returns the given side's last-write stamp.
    pub fn stamp(&self, side: Side) -> u64 {
        match side {
            Side::Host => self.host_stamp,
            Side::Device => self.device_stamp,
        }
    }

    /// See [`MemoryBlock::len`].
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// See [`MemoryBlock::is_empty`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// See [`MemoryBlock::has_host`].
    #[inline]
    pub fn has_host(&self) -> bool {
        self.inner.has_host()
    }

    /// See [`MemoryBlock::has_device`].
    #[inline]
    pub fn has_device(&self) -> bool {
        self.inner.has_device()
    }

    /// See [`MemoryBlock::placement`].
    pub fn placement(&self) -> Option<Placement> {
        self.inner.placement()
    }

    /// See [`MemoryBlock::host_strategy`].
    pub fn host_strategy(&self) -> Option<HostStrategy> {
        self.inner.host_strategy()
    }
}

impl<T> From<MemoryBlock<T>> for CheckedBlock<T> {
    fn from(inner: MemoryBlock<T>) -> Self {
        Self::wrap(inner)
    }
}

impl<T> std::fmt::Debug for CheckedBlock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckedBlock")
            .field("inner", &self.inner)
            .field("host_stamp", &self.host_stamp)
            .field("device_stamp", &self.device_stamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voluma_common::error::ErrorKind;
    use voluma_devmem::device;

    #[test]
    fn test_fresh_block_reads_both_sides() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let block = CheckedBlock::<u32>::new(8, Placement::Both).unwrap();
        // Construction ties the stamps, and ties are never stale.
        assert_eq!(block.stamp(Side::Host), block.stamp(Side::Device));
        assert!(block.as_slice().is_ok());
        assert!(block.device_ptr().is_ok());
    }

    #[test]
    fn test_device_only_is_widened_to_both() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let block = CheckedBlock::<f32>::new(4, Placement::DeviceOnly).unwrap();
        assert_eq!(block.placement(), Some(Placement::Both));
        assert_eq!(block.host_strategy(), Some(HostStrategy::Pinned));
    }

    #[test]
    fn test_stale_device_read_is_detected() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = CheckedBlock::<i32>::new(4, Placement::Both).unwrap();
        block.as_mut_slice().unwrap().fill(11);

        let err = block.device_ptr().unwrap_err();
        match err.kind() {
            ErrorKind::StaleSide {
                op,
                side,
                stamp,
                newest,
            } => {
                assert_eq!(op, "device_ptr");
                assert_eq!(side, "device");
                assert!(stamp < newest);
            }
            other => panic!("unexpected error kind: {other:?}"),
        }

        // The host side stays readable, and the unchecked element read
        // still reaches the stale device copy.
        assert_eq!(block.as_slice().unwrap(), &[11; 4]);
        assert_eq!(block.get(0, Side::Device).unwrap(), 0);
    }

    #[test]
    fn test_transfer_restores_consistency() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = CheckedBlock::<i32>::new(4, Placement::Both).unwrap();
        block.as_mut_slice().unwrap().fill(-3);
        assert!(block.device_ptr().is_err());

        block.transfer_to_device().unwrap();
        assert!(block.device_ptr().is_ok());
        assert_eq!(block.stamp(Side::Host), block.stamp(Side::Device));
        assert_eq!(block.get(3, Side::Device).unwrap(), -3);
    }

    #[test]
    fn test_stale_host_upload_is_rejected() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = CheckedBlock::<u8>::new(32, Placement::Both).unwrap();
        // Declare a device-side write; the host copy is now behind.
        let _ = block.device_ptr_mut().unwrap();

        let err = block.transfer_to_device().unwrap_err();
        assert!(
            matches!(err.kind(), ErrorKind::StaleSide { side, .. } if side == "host"),
            "unexpected error: {err}"
        );

        // Downloading the newer device data is the legal direction, and it
        // re-ties the stamps.
        block.transfer_to_host().unwrap();
        block.transfer_to_device().unwrap();
    }

    #[test]
    fn test_read_only_access_does_not_advance() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = CheckedBlock::<u64>::new(2, Placement::Both).unwrap();
        // Any number of read-only looks leaves the tie in place.
        for _ in 0..3 {
            assert!(block.as_slice().is_ok());
            assert!(block.device_ptr().is_ok());
        }

        // One mutable access flips the balance.
        block.as_mut_slice().unwrap();
        assert!(block.device_ptr().is_err());
        assert!(block.as_slice().is_ok());
    }

    #[test]
    fn test_fill_is_a_consistency_point() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = CheckedBlock::<u16>::new(16, Placement::Both).unwrap();
        let _ = block.device_ptr_mut().unwrap();
        assert!(block.as_slice().is_err());

        block.fill(0);
        assert!(block.as_slice().is_ok());
        assert!(block.device_ptr().is_ok());

        // Even a one-sided fill equalizes the stamps; the copies may differ
        // afterwards, but the protocol treats the fill as authoritative.
        block.as_mut_slice().unwrap().fill(5);
        assert!(block.device_ptr().is_err());
        block.fill_sides(9, true, false);
        assert!(block.device_ptr().is_ok());
        assert_eq!(block.get(0, Side::Host).unwrap(), 0x0909);
        assert_eq!(block.get(0, Side::Device).unwrap(), 0);
    }

    #[test]
    fn test_copy_from_stamps_destination_side() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut src = CheckedBlock::<u32>::new(6, Placement::HostOnly).unwrap();
        src.as_mut_slice().unwrap().fill(9);

        let mut dst = CheckedBlock::<u32>::new(2, Placement::Both).unwrap();
        dst.copy_from(&src, CopyDirection::HostToHost).unwrap();
        assert_eq!(dst.len(), 6);
        assert_eq!(dst.as_slice().unwrap(), &[9; 6]);

        // Only the host side advanced, so the device copy is now behind.
        let err = dst.device_ptr().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::StaleSide { .. }));

        dst.copy_from(&src, CopyDirection::HostToDevice).unwrap();
        assert!(dst.device_ptr().is_ok());
        assert_eq!(dst.get(5, Side::Device).unwrap(), 9);
    }

    #[test]
    fn test_swap_keeps_stamps_with_the_wrapper() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut a = CheckedBlock::<u32>::new(4, Placement::Both).unwrap();
        a.as_mut_slice().unwrap().fill(7);
        let mut b = CheckedBlock::<u32>::new(4, Placement::Both).unwrap();

        a.swap(&mut b);
        // Contents moved; verdicts did not.
        assert_eq!(a.as_slice().unwrap(), &[0; 4]);
        assert_eq!(b.as_slice().unwrap(), &[7; 4]);
        assert!(a.device_ptr().is_err());
        assert!(b.device_ptr().is_ok());
    }

    #[test]
    fn test_stamps_survive_resize() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let mut block = CheckedBlock::<u8>::new(8, Placement::Both).unwrap();
        block.as_mut_slice().unwrap()[0] = 1;
        block.resize(16).unwrap();

        // Both sides are zeroed, but the device side stays flagged until a
        // consistency point.
        assert_eq!(block.len(), 16);
        assert!(block.device_ptr().is_err());
        block.fill(0);
        assert!(block.device_ptr().is_ok());
    }

    #[test]
    fn test_host_only_never_goes_stale() {
        let mut block = CheckedBlock::<i64>::new(8, Placement::HostOnly).unwrap();
        for i in 0..4 {
            block.as_mut_slice().unwrap()[i] = i as i64;
        }
        assert!(block.as_slice().is_ok());
        assert_eq!(block.get(3, Side::Host).unwrap(), 3);
        assert_eq!(block.placement(), Some(Placement::HostOnly));
    }

    #[test]
    fn test_wrap_and_unwrap() {
        let mut raw = MemoryBlock::<u16>::new(4, Placement::HostOnly).unwrap();
        raw.as_mut_slice().unwrap().fill(2);

        let checked = CheckedBlock::wrap(raw);
        assert_eq!(checked.stamp(Side::Host), checked.stamp(Side::Device));
        assert_eq!(checked.as_slice().unwrap(), &[2; 4]);

        let raw = checked.into_inner();
        assert_eq!(raw.as_slice().unwrap(), &[2; 4]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut block = CheckedBlock::<u8>::new(16, Placement::HostOnly).unwrap();
        block.release();
        block.release();
        assert_eq!(block.placement(), None);
        assert!(matches!(
            block.as_slice().unwrap_err().kind(),
            ErrorKind::InactiveSide { .. }
        ));
    }

    #[test]
    fn test_async_transfer_handles_stamps() {
        if !device::AVAILABLE {
            println!("device heap not compiled in, skipping");
            return;
        }
        let stream = CopyStream::new();
        let mut block = CheckedBlock::<u16>::new(64, Placement::Both).unwrap();
        block.as_mut_slice().unwrap().fill(3);
        assert!(block.device_ptr().is_err());

        // SAFETY: the block is left untouched until synchronize returns.
        unsafe { block.transfer_to_device_async(&stream).unwrap() };
        stream.synchronize();
        assert!(block.device_ptr().is_ok());
        assert_eq!(block.get(63, Side::Device).unwrap(), 3);
    }
}
