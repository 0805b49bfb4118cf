//! TL1000 device handle and operations
//!
//! A `Device` pairs mesh geometry with a [`DispatchBackend`] transport and
//! a bump allocator for device DRAM. The queue is single-threaded, but the
//! handle is shared (queue, program cache, tests), so the mutable pieces
//! sit behind locks and every method takes `&self`.

use crate::backend::{DispatchBackend, FirmwareImages};
use crate::buffer::{Buffer, BufferType};
use crate::error::{DispatchError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use talon_chip::CoreCoord;
use tracing::debug;

/// Bytes of device DRAM the allocator manages.
const DRAM_SIZE: u32 = 512 * 1024 * 1024;

/// DRAM allocations start on this boundary.
const DRAM_ALLOC_ALIGNMENT: u32 = 32;

/// An open TL1000.
#[derive(Debug)]
pub struct Device {
    id: u32,
    worker_grid: CoreCoord,
    dispatch_cores: [CoreCoord; 2],
    backend: Mutex<Box<dyn DispatchBackend>>,
    dram_top: Mutex<u32>,
    dispatch_launched: AtomicBool,
}

impl Device {
    /// Open a device over `backend` with a `worker_grid.x × worker_grid.y`
    /// worker mesh.
    ///
    /// The last two cores of the top worker row are reserved as the
    /// dispatch pair; they are never handed to user programs.
    ///
    /// # Panics
    ///
    /// Panics if the grid cannot spare two dispatch cores.
    #[must_use]
    pub fn new(id: u32, worker_grid: CoreCoord, backend: Box<dyn DispatchBackend>) -> Self {
        assert!(worker_grid.x >= 2 && worker_grid.y >= 1, "grid {worker_grid} cannot host a dispatch pair");
        let dispatch_row = worker_grid.y - 1;
        let dispatch_cores = [
            CoreCoord::new(worker_grid.x - 2, dispatch_row),
            CoreCoord::new(worker_grid.x - 1, dispatch_row),
        ];
        debug!("Device {id}: {worker_grid} worker grid, dispatch pair {} / {}", dispatch_cores[0], dispatch_cores[1]);
        Self {
            id,
            worker_grid,
            dispatch_cores,
            backend: Mutex::new(backend),
            dram_top: Mutex::new(0),
            dispatch_launched: AtomicBool::new(false),
        }
    }

    /// Device index.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Worker-grid extent.
    #[must_use]
    pub const fn worker_grid(&self) -> CoreCoord {
        self.worker_grid
    }

    /// Translate a logical worker coordinate to its physical NOC
    /// coordinate. Row and column 0 of the physical mesh carry DRAM and
    /// dispatch infrastructure, so workers shift by (+1, +1).
    #[must_use]
    pub fn worker_core_from_logical_core(&self, logical: CoreCoord) -> CoreCoord {
        debug_assert!(
            logical.x < self.worker_grid.x && logical.y < self.worker_grid.y,
            "logical core {logical} outside worker grid {}",
            self.worker_grid
        );
        CoreCoord::new(logical.x + 1, logical.y + 1)
    }

    /// The logical dispatch pair: producer first, consumer second.
    #[must_use]
    pub const fn dispatch_cores(&self) -> [CoreCoord; 2] {
        self.dispatch_cores
    }

    /// Allocate a paged DRAM or L1 buffer.
    ///
    /// DRAM comes from a bump allocator; space is reclaimed only when the
    /// device is reset. `SystemMemory` is not allocatable — the ring
    /// manages its own region.
    ///
    /// # Errors
    ///
    /// Returns error on inconsistent geometry, an unallocatable buffer
    /// type, or DRAM exhaustion.
    pub fn allocate_buffer(&self, size_bytes: u32, page_size_bytes: u32, buffer_type: BufferType) -> Result<Buffer> {
        if buffer_type == BufferType::SystemMemory {
            return Err(DispatchError::InvalidBufferType { buffer_type });
        }
        let mut top = self.dram_top.lock().unwrap();
        let address = talon_chip::noc::align(*top, DRAM_ALLOC_ALIGNMENT);
        let buffer = Buffer::new(address, size_bytes, page_size_bytes, buffer_type)?;
        if address + size_bytes > DRAM_SIZE {
            return Err(DispatchError::invalid_buffer(format!(
                "DRAM exhausted: {size_bytes} bytes requested at {address:#x}"
            )));
        }
        *top = address + size_bytes;
        debug!("Device {}: allocated {size_bytes}B {buffer_type:?} buffer at {address:#x}", self.id);
        Ok(buffer)
    }

    /// One-shot latch for the dispatch-firmware bootstrap. Returns `true`
    /// exactly once per device.
    pub(crate) fn claim_dispatch_launch(&self) -> bool {
        !self.dispatch_launched.swap(true, Ordering::SeqCst)
    }

    // ── Transport passthroughs ───────────────────────────────────────────────

    pub(crate) fn write_host_region(&self, data: &[u32], byte_offset: u32, channel: u16) -> Result<()> {
        self.backend.lock().unwrap().write_host_region(data, byte_offset, channel)
    }

    pub(crate) fn read_host_region(&self, dst: &mut Vec<u32>, byte_offset: u32, len_bytes: u32, channel: u16) -> Result<()> {
        self.backend.lock().unwrap().read_host_region(dst, byte_offset, len_bytes, channel)
    }

    pub(crate) fn write_device_l1(&self, core: CoreCoord, addr: u32, data: &[u32]) -> Result<()> {
        self.backend.lock().unwrap().write_device_l1(core, addr, data)
    }

    pub(crate) fn dispatch_firmware(&self) -> Result<FirmwareImages> {
        self.backend.lock().unwrap().dispatch_firmware()
    }
}
