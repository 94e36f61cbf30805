//! Raw host and device memory primitives backing the voluma buffer types.
//!
//! This crate owns the allocation strategies a dual-location buffer is built
//! from: plain host memory, page-locked ("pinned") host memory suitable for
//! asynchronous DMA-style transfers, and a device heap selected at compile
//! time through the `device` cargo feature. Everything at this layer speaks
//! raw pointers and byte counts and reports failures as `std::io::Result`;
//! typed views and the consistency protocol live one crate up.
//!
//! # Device heap
//!
//! With the `device` feature enabled, device allocations come from an
//! emulated heap: a separate, 256-byte-granular arena standing in for
//! accelerator memory on machines that have none. Device pointers are opaque
//! ([`device_block::DevicePtr`]) and must never be dereferenced by callers;
//! all traffic goes through the transfer entry points. Without the feature,
//! every device allocation fails with [`std::io::ErrorKind::Unsupported`]
//! and [`device::AVAILABLE`] is `false`.

pub mod device_block;
pub mod host;
pub mod stream;

#[cfg_attr(any(target_os = "linux"), path = "pinned_linux.rs")]
#[cfg_attr(not(any(target_os = "linux")), path = "pinned_fallback.rs")]
pub mod pinned;

#[cfg_attr(feature = "device", path = "device_heap.rs")]
#[cfg_attr(not(feature = "device"), path = "device_absent.rs")]
pub mod device;
