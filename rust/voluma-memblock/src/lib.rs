//! Dual-location memory blocks for host/device data movement.
//!
//! A [`MemoryBlock`] owns a typed array that can live in host memory, in
//! device memory, or in both at once, and provides directed copies between
//! the two. [`CheckedBlock`] wraps it with per-side time stamps that catch
//! reads of a side whose counterpart holds newer data.
//!
//! Device memory is only reachable when the `device` cargo feature is
//! enabled (it is on by default); without it, any attempt to place data on
//! the device fails with [`ErrorKind::NoDeviceSupport`].
//!
//! [`ErrorKind::NoDeviceSupport`]: voluma_common::error::ErrorKind::NoDeviceSupport

pub mod block;
pub mod checked;

pub use block::{CopyDirection, HostStrategy, MemoryBlock, Placement, Side};
pub use checked::CheckedBlock;

pub use voluma_devmem::device_block::DevicePtr;
pub use voluma_devmem::stream::CopyStream;
