//! Command-ring layout — the host/device contract for the dispatch queue.
//!
//! The host pins a [`HUGE_PAGE_SIZE`] region of system memory that both
//! sides see. The first [`CQ_START`] bytes are a prologue of control words;
//! the rest is a circular region of device commands and inline payloads.
//!
//! ```text
//! byte 0    rd_ptr — packed pointer (16-byte units) | toggle in bit 31,
//!           written by the device, polled by the host
//! byte 64   finish word — device writes 1 on a finish command,
//!           host resets to 0
//! byte 96   CQ_START — first command slot
//! ```
//!
//! The producer dispatch core mirrors both ring cursors in its L1 at the
//! `CQ_*` register addresses below. Pointer and toggle are compared
//! pairwise: equal pointers with equal toggles mean empty, equal pointers
//! with differing toggles mean full.

/// Size of the pinned host region backing one command queue.
pub const HUGE_PAGE_SIZE: u32 = 1024 * 1024 * 1024;

/// First command byte; everything below is the prologue.
pub const CQ_START: u32 = 96;

/// Host-region byte offset of the packed read pointer.
pub const HOST_CQ_RD_PTR: u32 = 0;

/// Host-region byte offset of the finish handshake word.
pub const HOST_CQ_FINISH_PTR: u32 = 64;

/// Bit carrying the read toggle inside the packed read-pointer word.
pub const CQ_RD_TOGGLE_SHIFT: u32 = 31;

/// Mask selecting the pointer bits of the packed read-pointer word.
pub const CQ_RD_PTR_MASK: u32 = (1 << CQ_RD_TOGGLE_SHIFT) - 1;

// ── Producer-core L1 registers ───────────────────────────────────────────────

/// Read pointer mirror (16-byte units).
pub const CQ_READ_PTR: u32 = 0x0060;
/// Read toggle mirror.
pub const CQ_READ_TOGGLE: u32 = 0x0064;
/// Write pointer mirror (16-byte units), published by the host.
pub const CQ_WRITE_PTR: u32 = 0x0068;
/// Write toggle mirror, published by the host.
pub const CQ_WRITE_TOGGLE: u32 = 0x006C;

// ── Dispatch-core data section ───────────────────────────────────────────────
// The producer streams command payloads through a double buffer in its L1
// and hands pages to the consumer through a single buffer in the
// consumer's L1. Section base plus both buffers exactly fill L1.

/// Start of the dispatch data section in dispatch-core L1.
pub const DATA_SECTION_ADDRESS: u32 = 0x4_0000;

/// Producer-side staging buffer (double-buffered page stream).
pub const PRODUCER_DATA_BUFFER_SIZE: u32 = 512 * 1024;

/// Consumer-side staging buffer.
pub const CONSUMER_DATA_BUFFER_SIZE: u32 = 256 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::MEM_L1_SIZE;

    #[test]
    fn prologue_precedes_first_command() {
        assert!(HOST_CQ_RD_PTR < HOST_CQ_FINISH_PTR);
        assert!(HOST_CQ_FINISH_PTR < CQ_START);
        assert_eq!(CQ_START % 32, 0);
    }

    #[test]
    fn cq_registers_are_adjacent_words() {
        assert_eq!(CQ_READ_TOGGLE, CQ_READ_PTR + 4);
        assert_eq!(CQ_WRITE_PTR, CQ_READ_TOGGLE + 4);
        assert_eq!(CQ_WRITE_TOGGLE, CQ_WRITE_PTR + 4);
    }

    #[test]
    fn data_section_fills_l1_exactly() {
        assert_eq!(
            DATA_SECTION_ADDRESS + PRODUCER_DATA_BUFFER_SIZE + CONSUMER_DATA_BUFFER_SIZE,
            MEM_L1_SIZE
        );
    }
}
