//! Command-ring writer
//!
//! Single producer, single consumer: the host owns the write cursor, the
//! device owns the read cursor, and each side only ever reads the other's.
//! Cursors are in 16-byte words — hence the `<< 4` at every byte boundary —
//! and each carries a toggle bit that flips on wrap, disambiguating empty
//! from full when the pointers meet.
//!
//! The writer itself never wraps mid-command: the queue guarantees (via
//! wrap commands) that every reservation fits contiguously before the ring
//! end, so `cq_reserve_back` only has to wait for the consumer when the
//! cursors are on different laps.

use crate::device::Device;
use crate::error::Result;
use talon_chip::cq::{
    CQ_RD_PTR_MASK, CQ_RD_TOGGLE_SHIFT, CQ_START, CQ_WRITE_PTR, CQ_WRITE_TOGGLE, HOST_CQ_RD_PTR, HUGE_PAGE_SIZE,
};
use talon_chip::noc::align;
use tracing::trace;

/// Host-side cursor state, mirrored to the producer core on every push.
#[derive(Debug, Clone, Copy)]
pub struct CqWriteInterface {
    /// Write pointer in 16-byte words.
    pub fifo_wr_ptr: u32,
    /// Flips every time the write pointer wraps.
    pub fifo_wr_toggle: u32,
}

/// Writer half of the shared command ring.
#[derive(Debug)]
pub struct SystemMemoryWriter {
    /// The live cursor.
    pub cq_write_interface: CqWriteInterface,
    ring_size: u32,
    channel: u16,
}

impl Default for SystemMemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMemoryWriter {
    /// Writer over the standard 1 GiB pinned region.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ring_size(HUGE_PAGE_SIZE)
    }

    /// Writer over a smaller ring. Deployments always use
    /// [`HUGE_PAGE_SIZE`]; tests shrink the ring to reach wrap behavior
    /// without gigabyte allocations.
    ///
    /// # Panics
    ///
    /// Panics unless `ring_size` is 32-byte aligned with room beyond the
    /// prologue.
    #[must_use]
    pub fn with_ring_size(ring_size: u32) -> Self {
        assert!(ring_size % 32 == 0 && ring_size > CQ_START, "invalid ring size {ring_size}");
        Self {
            cq_write_interface: CqWriteInterface { fifo_wr_ptr: CQ_START >> 4, fifo_wr_toggle: 0 },
            ring_size,
            channel: 0,
        }
    }

    /// Ring bytes, prologue included.
    #[must_use]
    pub const fn ring_size(&self) -> u32 {
        self.ring_size
    }

    /// Current write cursor in bytes.
    #[must_use]
    pub const fn wr_ptr_bytes(&self) -> u32 {
        self.cq_write_interface.fifo_wr_ptr << 4
    }

    /// The packed read pointer the device last published.
    fn read_rd_ptr(&self, device: &Device) -> Result<(u32, u32)> {
        let mut word = Vec::with_capacity(1);
        device.read_host_region(&mut word, HOST_CQ_RD_PTR, 4, self.channel)?;
        let packed = word[0];
        Ok((packed & CQ_RD_PTR_MASK, packed >> CQ_RD_TOGGLE_SHIFT))
    }

    /// Block until `num_bytes` of contiguous space are free ahead of the
    /// write cursor.
    ///
    /// With equal toggles the consumer is behind us on the same lap and
    /// everything up to the ring end is ours. With differing toggles we
    /// have wrapped and the consumer has not: we may not run past its read
    /// cursor.
    ///
    /// # Errors
    ///
    /// Returns error if polling the read pointer fails.
    pub fn cq_reserve_back(&self, device: &Device, num_bytes: u32) -> Result<()> {
        let size_16b = align(num_bytes, 32) >> 4;
        loop {
            let (rd_ptr, rd_toggle) = self.read_rd_ptr(device)?;
            if rd_toggle == self.cq_write_interface.fifo_wr_toggle
                || self.cq_write_interface.fifo_wr_ptr + size_16b <= rd_ptr
            {
                return Ok(());
            }
            trace!("cq_reserve_back: waiting for {size_16b} words ahead of rd={rd_ptr}");
            std::hint::spin_loop();
        }
    }

    /// DMA `data` into the pinned region at `dst_byte_offset`.
    ///
    /// # Errors
    ///
    /// Returns error if the transfer fails.
    pub fn cq_write(&self, device: &Device, data: &[u32], dst_byte_offset: u32) -> Result<()> {
        device.write_host_region(data, dst_byte_offset, self.channel)
    }

    /// Publish `num_bytes` of written command: advance the cursor, wrap it
    /// off the ring end, and mirror toggle-then-pointer to the producer
    /// core. The pointer write is the release — the consumer must never
    /// observe it before the toggle or the payload.
    ///
    /// # Errors
    ///
    /// Returns error if the L1 mirror write fails.
    pub fn cq_push_back(&mut self, device: &Device, num_bytes: u32) -> Result<()> {
        let size_16b = align(num_bytes, 32) >> 4;
        self.cq_write_interface.fifo_wr_ptr += size_16b;

        if self.cq_write_interface.fifo_wr_ptr >= self.ring_size >> 4 {
            self.cq_write_interface.fifo_wr_ptr = CQ_START >> 4;
            self.cq_write_interface.fifo_wr_toggle ^= 1;
            trace!("cq_push_back: wrapped, toggle={}", self.cq_write_interface.fifo_wr_toggle);
        }

        let [producer, _] = device.dispatch_cores();
        let producer = device.worker_core_from_logical_core(producer);
        device.write_device_l1(producer, CQ_WRITE_TOGGLE, &[self.cq_write_interface.fifo_wr_toggle])?;
        device.write_device_l1(producer, CQ_WRITE_PTR, &[self.cq_write_interface.fifo_wr_ptr])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareDevice;
    use talon_chip::CoreCoord;

    fn device_pair() -> (Device, SoftwareDevice) {
        let sim = SoftwareDevice::new();
        let dev = Device::new(0, CoreCoord::new(8, 8), Box::new(sim.clone()));
        init_ring(&dev);
        (dev, sim)
    }

    /// What bootstrap does: both cursors at the first command slot.
    fn init_ring(dev: &Device) {
        let [producer, _] = dev.dispatch_cores();
        let producer = dev.worker_core_from_logical_core(producer);
        dev.write_host_region(&[CQ_START >> 4], HOST_CQ_RD_PTR, 0).unwrap();
        dev.write_device_l1(producer, talon_chip::cq::CQ_READ_PTR, &[CQ_START >> 4]).unwrap();
    }

    #[test]
    fn writer_starts_at_first_command_slot() {
        let writer = SystemMemoryWriter::new();
        assert_eq!(writer.wr_ptr_bytes(), CQ_START);
        assert_eq!(writer.cq_write_interface.fifo_wr_toggle, 0);
        assert_eq!(writer.ring_size(), HUGE_PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "invalid ring size")]
    fn unaligned_ring_size_rejected() {
        let _ = SystemMemoryWriter::with_ring_size(CQ_START + 48);
    }

    #[test]
    fn push_advances_in_16_byte_words() {
        let (dev, _sim) = device_pair();
        let mut writer = SystemMemoryWriter::with_ring_size(4096);
        writer.cq_push_back(&dev, 64).unwrap();
        assert_eq!(writer.wr_ptr_bytes(), CQ_START + 64);
    }

    #[test]
    fn push_rounds_odd_sizes_to_32_bytes() {
        let (dev, _sim) = device_pair();
        let mut writer = SystemMemoryWriter::with_ring_size(4096);
        writer.cq_push_back(&dev, 48).unwrap();
        assert_eq!(writer.wr_ptr_bytes(), CQ_START + 64);
    }

    #[test]
    fn push_off_the_end_wraps_and_toggles() {
        let (dev, sim) = device_pair();
        let mut writer = SystemMemoryWriter::with_ring_size(1024);
        // A protocol-valid off-the-end push is always a wrap block.
        writer.cq_write(&dev, &[1], CQ_START).unwrap();
        writer.cq_push_back(&dev, 1024 - CQ_START).unwrap();
        assert_eq!(writer.wr_ptr_bytes(), CQ_START);
        assert_eq!(writer.cq_write_interface.fifo_wr_toggle, 1);
        // The consumer followed: read cursor republished at the slot start
        // with the flipped toggle.
        assert_eq!(sim.host_word(HOST_CQ_RD_PTR), (CQ_START >> 4) | (1 << CQ_RD_TOGGLE_SHIFT));
    }

    #[test]
    fn reserve_succeeds_on_same_lap() {
        let (dev, _sim) = device_pair();
        let writer = SystemMemoryWriter::with_ring_size(4096);
        writer.cq_reserve_back(&dev, 2048).unwrap();
    }
}
