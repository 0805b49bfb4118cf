// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual TL1000) backend
//!
//! Implements [`DispatchBackend`] with no hardware at all: the pinned host
//! region, device DRAM, and L1 are plain vectors, and the dispatch
//! firmware's ring consumer is modeled in Rust. This enables:
//!
//! 1. **CI without silicon**: the full enqueue → ring → consume → read-back
//!    path runs in-process, so the integration suite exercises the real
//!    wire format on every commit.
//!
//! 2. **Observability**: every command the consumer drains is logged with
//!    its decoded header and transfer table. Tests assert on stall bits,
//!    wrap markers, and DRAM write counts instead of poking at ring bytes.
//!
//! The consumer here is intentionally shallow: it honors wrap markers, the
//! finish handshake, and buffer transfers, and it *records* program
//! commands without modeling per-core execution — kernel launch semantics
//! belong to the firmware, not to this crate.
//!
//! The consumer runs synchronously inside the `CQ_WRITE_PTR` publication,
//! which makes the device infinitely fast: reservation never spins and a
//! finish poll observes completion on its first read. Ordering bugs on the
//! host side still surface, because the consumer only sees bytes that were
//! in the region when the pointer moved.

use crate::backend::{DispatchBackend, FirmwareImages};
use crate::buffer::BufferType;
use crate::error::Result;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use talon_chip::cmd::{
    header, BUFFER_TRANSFER_SECTION_OFFSET, NUM_BYTES_IN_DEVICE_COMMAND, NUM_ENTRIES_PER_BUFFER_TRANSFER,
};
use talon_chip::cq::{CQ_READ_PTR, CQ_READ_TOGGLE, CQ_RD_TOGGLE_SHIFT, CQ_START, CQ_WRITE_PTR, CQ_WRITE_TOGGLE, HOST_CQ_FINISH_PTR, HOST_CQ_RD_PTR};
use talon_chip::noc::align;
use talon_chip::CoreCoord;
use tracing::{debug, trace};

/// One decoded buffer-transfer entry, as the consumer saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumedTransfer {
    /// Source address.
    pub src: u32,
    /// Destination address.
    pub dst: u32,
    /// Pages moved.
    pub num_pages: u32,
    /// Bytes per page (padded).
    pub page_size: u32,
    /// Source address space (wire encoding).
    pub src_type: u32,
    /// Destination address space (wire encoding).
    pub dst_type: u32,
}

/// One ring slot the consumer drained.
#[derive(Debug, Clone, Default)]
pub struct ConsumedCommand {
    /// This slot was a wrap marker.
    pub wrap: bool,
    /// Finish handshake requested.
    pub finish: bool,
    /// Program-dispatch command.
    pub is_program: bool,
    /// Prefetch stall requested.
    pub stall: bool,
    /// Header page count.
    pub num_pages: u32,
    /// Inline payload bytes.
    pub data_size: u32,
    /// Decoded buffer-transfer table.
    pub transfers: Vec<ConsumedTransfer>,
    /// Inline payload words (captured for program commands only).
    pub payload: Vec<u32>,
}

#[derive(Debug, Default)]
struct SimState {
    sysmem: Vec<u8>,
    dram: Vec<u8>,
    l1: Vec<u8>,
    core_l1: HashMap<CoreCoord, Vec<u8>>,
    rd_ptr: u32,
    rd_toggle: u32,
    wr_ptr: u32,
    wr_toggle: u32,
    consumed: Vec<ConsumedCommand>,
}

/// Virtual TL1000 backend.
///
/// Handles share one interior state, so a test can keep a clone while the
/// [`Device`](crate::Device) owns the one it dispatches through.
#[derive(Debug, Clone, Default)]
pub struct SoftwareDevice {
    state: Arc<Mutex<SimState>>,
}

impl SoftwareDevice {
    /// Create a virtual device with empty memories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every slot the consumer has drained, in order.
    #[must_use]
    pub fn consumed(&self) -> Vec<ConsumedCommand> {
        self.state.lock().unwrap().consumed.clone()
    }

    /// Read one u32 from the host region.
    #[must_use]
    pub fn host_word(&self, byte_offset: u32) -> u32 {
        read_u32(&self.state.lock().unwrap().sysmem, byte_offset)
    }

    /// Read raw DRAM bytes (zero-filled past the high-water mark).
    #[must_use]
    pub fn dram_bytes(&self, addr: u32, len: u32) -> Vec<u8> {
        read_bytes(&self.state.lock().unwrap().dram, addr, len)
    }

    /// Read one u32 from a core's L1 (control-path writes only).
    #[must_use]
    pub fn core_l1_word(&self, core: CoreCoord, addr: u32) -> u32 {
        let state = self.state.lock().unwrap();
        state.core_l1.get(&core).map_or(0, |mem| read_u32(mem, addr))
    }
}

impl DispatchBackend for SoftwareDevice {
    fn write_host_region(&mut self, data: &[u32], byte_offset: u32, _channel: u16) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        write_words(&mut state.sysmem, byte_offset, data);
        Ok(())
    }

    fn read_host_region(&self, dst: &mut Vec<u32>, byte_offset: u32, len_bytes: u32, _channel: u16) -> Result<()> {
        let state = self.state.lock().unwrap();
        let bytes = read_bytes(&state.sysmem, byte_offset, len_bytes);
        dst.clear();
        dst.extend(bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])));
        Ok(())
    }

    fn write_device_l1(&mut self, core: CoreCoord, addr: u32, data: &[u32]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        {
            let mem = state.core_l1.entry(core).or_default();
            write_words(mem, addr, data);
        }

        // The producer firmware reacts to pointer-register writes.
        match addr {
            CQ_READ_PTR => state.rd_ptr = data[0],
            CQ_READ_TOGGLE => state.rd_toggle = data[0],
            CQ_WRITE_TOGGLE => state.wr_toggle = data[0],
            CQ_WRITE_PTR => {
                state.wr_ptr = data[0];
                drain_ring(&mut state);
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch_firmware(&self) -> Result<FirmwareImages> {
        // No-op stub images; the virtual consumer lives in this module.
        let image = |tag: u32| -> Bytes {
            let mut bytes = Vec::with_capacity(16 * 4);
            for i in 0..16u32 {
                bytes.extend_from_slice(&(tag | i).to_le_bytes());
            }
            Bytes::from(bytes)
        };
        Ok(FirmwareImages { producer: image(0xD150_0000), consumer: image(0xD15C_0000) })
    }
}

/// Drain every complete command between the read and write cursors.
fn drain_ring(state: &mut SimState) {
    loop {
        // Same lap and caught up (or past — malformed input): nothing to read.
        if state.rd_toggle == state.wr_toggle && state.rd_ptr >= state.wr_ptr {
            break;
        }
        let base = state.rd_ptr << 4;

        if read_u32(&state.sysmem, base) == 1 {
            trace!("sim: wrap marker at {base:#x}");
            state.consumed.push(ConsumedCommand { wrap: true, ..ConsumedCommand::default() });
            state.rd_ptr = CQ_START >> 4;
            state.rd_toggle ^= 1;
            publish_rd(state);
            continue;
        }

        let hdr: Vec<u32> = (0..talon_chip::cmd::NUM_ENTRIES_IN_COMMAND_HEADER)
            .map(|i| read_u32(&state.sysmem, base + i * 4))
            .collect();

        let is_program = hdr[header::IS_PROGRAM] == 1;
        let data_size = hdr[header::DATA_SIZE];
        let num_transfers = hdr[header::NUM_BUFFER_TRANSFERS];

        let mut transfers = Vec::with_capacity(num_transfers as usize);
        for i in 0..num_transfers {
            let entry = base + (BUFFER_TRANSFER_SECTION_OFFSET + i * NUM_ENTRIES_PER_BUFFER_TRANSFER) * 4;
            let t = ConsumedTransfer {
                src: read_u32(&state.sysmem, entry),
                dst: read_u32(&state.sysmem, entry + 4),
                num_pages: read_u32(&state.sysmem, entry + 8),
                page_size: read_u32(&state.sysmem, entry + 12),
                src_type: read_u32(&state.sysmem, entry + 16),
                dst_type: read_u32(&state.sysmem, entry + 20),
            };
            if !is_program {
                execute_transfer(state, t);
            }
            transfers.push(t);
        }

        let payload = if is_program {
            read_bytes(&state.sysmem, base + NUM_BYTES_IN_DEVICE_COMMAND, data_size)
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        } else {
            Vec::new()
        };

        if hdr[header::FINISH] == 1 {
            write_words(&mut state.sysmem, HOST_CQ_FINISH_PTR, &[1]);
        }

        debug!(
            "sim: consumed command at {base:#x} (program={is_program}, data={data_size}B, {} transfers)",
            transfers.len()
        );
        state.consumed.push(ConsumedCommand {
            wrap: false,
            finish: hdr[header::FINISH] == 1,
            is_program,
            stall: hdr[header::STALL] == 1,
            num_pages: hdr[header::NUM_PAGES],
            data_size,
            transfers,
            payload,
        });

        state.rd_ptr += align(NUM_BYTES_IN_DEVICE_COMMAND + data_size, 32) >> 4;
        publish_rd(state);
    }
}

fn execute_transfer(state: &mut SimState, t: ConsumedTransfer) {
    let len = t.num_pages * t.page_size;
    let (sys, dram, l1) = (BufferType::SystemMemory.as_u32(), BufferType::Dram.as_u32(), BufferType::L1.as_u32());

    if t.src_type == sys {
        let data = read_bytes(&state.sysmem, t.src, len);
        if t.dst_type == dram {
            write_bytes(&mut state.dram, t.dst, &data);
        } else if t.dst_type == l1 {
            write_bytes(&mut state.l1, t.dst, &data);
        }
    } else if t.dst_type == sys {
        let data = if t.src_type == dram {
            read_bytes(&state.dram, t.src, len)
        } else {
            read_bytes(&state.l1, t.src, len)
        };
        write_bytes(&mut state.sysmem, t.dst, &data);
    }
}

fn publish_rd(state: &mut SimState) {
    let packed = state.rd_ptr | (state.rd_toggle << CQ_RD_TOGGLE_SHIFT);
    write_words(&mut state.sysmem, HOST_CQ_RD_PTR, &[packed]);
}

// ── Flat-memory helpers ──────────────────────────────────────────────────────
// Memories grow on write; reads past the high-water mark are zero, the same
// as freshly pinned pages.

fn write_bytes(mem: &mut Vec<u8>, byte_offset: u32, data: &[u8]) {
    let end = byte_offset as usize + data.len();
    if mem.len() < end {
        mem.resize(end, 0);
    }
    mem[byte_offset as usize..end].copy_from_slice(data);
}

fn write_words(mem: &mut Vec<u8>, byte_offset: u32, data: &[u32]) {
    let mut bytes = Vec::with_capacity(data.len() * 4);
    for word in data {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    write_bytes(mem, byte_offset, &bytes);
}

fn read_bytes(mem: &[u8], byte_offset: u32, len: u32) -> Vec<u8> {
    let mut out = vec![0u8; len as usize];
    let start = (byte_offset as usize).min(mem.len());
    let end = (byte_offset as usize + len as usize).min(mem.len());
    if start < end {
        out[..end - start].copy_from_slice(&mem[start..end]);
    }
    out
}

fn read_u32(mem: &[u8], byte_offset: u32) -> u32 {
    let bytes = read_bytes(mem, byte_offset, 4);
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_region_roundtrip() {
        let mut dev = SoftwareDevice::new();
        dev.write_host_region(&[1, 2, 3, 4], 128, 0).unwrap();
        let mut back = Vec::new();
        dev.read_host_region(&mut back, 128, 16, 0).unwrap();
        assert_eq!(back, vec![1, 2, 3, 4]);
    }

    #[test]
    fn reads_past_high_water_mark_are_zero() {
        let dev = SoftwareDevice::new();
        let mut back = vec![0xFFFF_FFFF; 2];
        dev.read_host_region(&mut back, 4096, 8, 0).unwrap();
        assert_eq!(back, vec![0, 0]);
    }

    #[test]
    fn l1_writes_are_per_core() {
        let mut dev = SoftwareDevice::new();
        let a = CoreCoord::new(1, 1);
        let b = CoreCoord::new(2, 1);
        dev.write_device_l1(a, 0x1000, &[7]).unwrap();
        assert_eq!(dev.core_l1_word(a, 0x1000), 7);
        assert_eq!(dev.core_l1_word(b, 0x1000), 0);
    }

    #[test]
    fn firmware_pair_is_distinct() {
        let dev = SoftwareDevice::new();
        let fw = dev.dispatch_firmware().unwrap();
        assert_ne!(fw.producer, fw.consumer);
        assert_eq!(fw.producer.len() % 4, 0);
    }
}
