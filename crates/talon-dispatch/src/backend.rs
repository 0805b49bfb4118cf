//! Backend abstraction for the dispatch path
//!
//! The queue never touches PCIe, IOMMU, or sysfs directly — everything it
//! needs from a transport is three data movements: write the pinned host
//! region, read it back, and poke words into a core's L1. A backend
//! supplies those plus the compiled dispatch firmware for its device
//! generation.

use crate::error::Result;
use bytes::Bytes;
use std::fmt::Debug;
use talon_chip::CoreCoord;

/// Transport seam between the command queue and a device.
///
/// Offsets are bytes; payloads are u32 words (the ring is word-oriented
/// end to end). `channel` selects the pinned region when a host maps more
/// than one.
pub trait DispatchBackend: Debug + Send {
    /// Copy `data` into the pinned host region at `byte_offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the transfer fails.
    fn write_host_region(&mut self, data: &[u32], byte_offset: u32, channel: u16) -> Result<()>;

    /// Read `len_bytes` from the pinned host region at `byte_offset` into
    /// `dst`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns error if the transfer fails.
    fn read_host_region(&self, dst: &mut Vec<u32>, byte_offset: u32, len_bytes: u32, channel: u16) -> Result<()>;

    /// Write `data` into `core`'s L1 at `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if the transfer fails.
    fn write_device_l1(&mut self, core: CoreCoord, addr: u32, data: &[u32]) -> Result<()>;

    /// Compiled producer/consumer dispatch firmware for this device.
    ///
    /// # Errors
    ///
    /// Returns error if the firmware pair is unavailable.
    fn dispatch_firmware(&self) -> Result<FirmwareImages>;
}

/// Compiled dispatch-firmware pair delivered by a backend.
#[derive(Debug, Clone)]
pub struct FirmwareImages {
    /// Ring-draining producer image.
    pub producer: Bytes,
    /// Page-writing consumer image.
    pub consumer: Bytes,
}
