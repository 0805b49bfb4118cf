//! Worker-core L1 memory map.
//!
//! Every worker core carries 1 MiB of L1 SRAM shared by its five RISC
//! processors (BRISC and NCRISC for data movement, TRISC0–2 for compute).
//! The low region holds firmware mailboxes, circular-buffer descriptors,
//! and the per-processor runtime-argument slots the dispatch path writes
//! into; the staging bases receive binary spans whose link-time address
//! targets processor-local memory or NCRISC IRAM.
//!
//! ```text
//! 0x0000_0020  launch mailbox (4 words)
//! 0x0000_0060  CQ pointer registers (producer dispatch core only)
//! 0x0000_0100  circular-buffer config table (32 × 4 words)
//! 0x0000_0400  BRISC runtime-arg slot
//! 0x0000_0800  NCRISC runtime-arg slot
//! 0x0000_0C00  TRISC runtime-arg slot
//! 0x0000_2000  local-memory staging bases (one per processor)
//! 0x0000_8000  kernel text/data
//! 0x0004_0000  dispatch data section (dispatch cores only)
//! ```

/// L1 SRAM bytes per worker core.
pub const MEM_L1_SIZE: u32 = 1024 * 1024;

/// Launch-message mailbox slot — 4 words written to trigger a core.
pub const LAUNCH_MAILBOX_ADDR: u32 = 0x0020;

/// Number of u32 words in a launch message.
pub const LAUNCH_MSG_NUM_WORDS: u32 = 4;

/// Launch-message dispatch modes.
pub mod dispatch_mode {
    /// Kernel launched by the host over the slow configuration path.
    pub const HOST: u32 = 0;
    /// Kernel launched by the on-device dispatcher.
    pub const DEV: u32 = 1;
}

// ── Circular buffers ─────────────────────────────────────────────────────────

/// Base of the circular-buffer config table.
pub const CIRCULAR_BUFFER_CONFIG_BASE: u32 = 0x0100;

/// u32 words per circular-buffer config record.
pub const UINT32_WORDS_PER_CIRCULAR_BUFFER_CONFIG: u32 = 4;

/// Circular-buffer slots per core.
pub const NUM_CIRCULAR_BUFFERS: u32 = 32;

// ── Runtime arguments ────────────────────────────────────────────────────────

/// BRISC runtime-argument slot.
pub const BRISC_L1_ARG_BASE: u32 = 0x0400;
/// NCRISC runtime-argument slot.
pub const NCRISC_L1_ARG_BASE: u32 = 0x0800;
/// TRISC runtime-argument slot (shared by the three compute processors).
pub const TRISC_L1_ARG_BASE: u32 = 0x0C00;

// ── Semaphores ───────────────────────────────────────────────────────────────

/// First semaphore slot.
pub const SEMAPHORE_BASE: u32 = 0x1000;

/// Each semaphore occupies one aligned slot; only word 0 is meaningful.
pub const SEMAPHORE_ALIGNMENT: u32 = 16;

// ── Local-memory relocation ──────────────────────────────────────────────────
// Binary spans may be linked against processor-local data memory or NCRISC
// IRAM. Those address spaces are not NOC-reachable, so the dispatch path
// stages such spans at a per-processor L1 base and the start-up firmware
// copies them into place before jumping to the kernel.

/// Link-time base of processor-local data memory.
pub const MEM_LOCAL_BASE: u32 = 0xFFB0_0000;
/// Link-time base of NCRISC instruction RAM.
pub const MEM_NCRISC_IRAM_BASE: u32 = 0xFFC0_0000;

/// L1 staging base for BRISC local-memory spans.
pub const MEM_BRISC_INIT_LOCAL_L1_BASE: u32 = 0x2000;
/// L1 staging base for NCRISC local-memory spans.
pub const MEM_NCRISC_INIT_LOCAL_L1_BASE: u32 = 0x3000;
/// L1 staging base for TRISC0 local-memory spans.
pub const MEM_TRISC0_INIT_LOCAL_L1_BASE: u32 = 0x4000;
/// L1 staging base for TRISC1 local-memory spans.
pub const MEM_TRISC1_INIT_LOCAL_L1_BASE: u32 = 0x5000;
/// L1 staging base for TRISC2 local-memory spans.
pub const MEM_TRISC2_INIT_LOCAL_L1_BASE: u32 = 0x6000;
/// L1 staging base for NCRISC IRAM spans.
pub const MEM_NCRISC_INIT_IRAM_L1_BASE: u32 = 0x7000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_bases_are_distinct_and_ordered() {
        let bases = [
            MEM_BRISC_INIT_LOCAL_L1_BASE,
            MEM_NCRISC_INIT_LOCAL_L1_BASE,
            MEM_TRISC0_INIT_LOCAL_L1_BASE,
            MEM_TRISC1_INIT_LOCAL_L1_BASE,
            MEM_TRISC2_INIT_LOCAL_L1_BASE,
            MEM_NCRISC_INIT_IRAM_L1_BASE,
        ];
        for w in bases.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn cb_table_fits_below_arg_slots() {
        let table_end =
            CIRCULAR_BUFFER_CONFIG_BASE + NUM_CIRCULAR_BUFFERS * UINT32_WORDS_PER_CIRCULAR_BUFFER_CONFIG * 4;
        assert!(table_end <= BRISC_L1_ARG_BASE);
    }

    #[test]
    fn relocation_bases_are_outside_l1() {
        assert!(MEM_LOCAL_BASE > MEM_L1_SIZE);
        assert!(MEM_NCRISC_IRAM_BASE > MEM_LOCAL_BASE);
    }
}
