//! Device-command wire format.
//!
//! Every slot in the command ring starts with a fixed-size record the
//! dispatch firmware decodes with constant offsets — no length prefixes,
//! no varints. The record is [`DEVICE_COMMAND_NUM_WORDS`] u32 words:
//!
//! ```text
//! words 0..16     header (named indices in [`header`])
//! words 16..28    buffer-transfer table: 2 × 6-word entries
//! words 28..5632  program-transfer section: per page, a count word
//!                 followed by count × 5-word partial-write entries
//! ```
//!
//! Unused words are zero. A wrap marker is a zeroed block whose word 0
//! is 1; the firmware discards the rest of the ring and rewinds.

/// u32 words in one device command record.
pub const DEVICE_COMMAND_NUM_WORDS: u32 = 5632;

/// Bytes in one device command record (a multiple of 32).
pub const NUM_BYTES_IN_DEVICE_COMMAND: u32 = DEVICE_COMMAND_NUM_WORDS * 4;

/// Page granularity of program data, both in DRAM and on the ring.
pub const PROGRAM_PAGE_SIZE: u32 = 2048;

/// Header length in words.
pub const NUM_ENTRIES_IN_COMMAND_HEADER: u32 = 16;

/// Header word indices.
pub mod header {
    /// 1 ⇒ this block is a wrap marker; remaining words are dead space.
    pub const WRAP: usize = 0;
    /// 1 ⇒ the consumer notifies the host finish word when done.
    pub const FINISH: usize = 1;
    /// Worker cores the dispatcher waits on before recycling the slot.
    pub const NUM_WORKERS: usize = 2;
    /// Valid entries in the buffer-transfer table.
    pub const NUM_BUFFER_TRANSFERS: usize = 3;
    /// 1 ⇒ interpret the program-transfer section.
    pub const IS_PROGRAM: usize = 4;
    /// 1 ⇒ producer stalls prefetch until outstanding writes land.
    pub const STALL: usize = 5;
    /// Transfer page size in bytes.
    pub const PAGE_SIZE: usize = 6;
    /// Producer staging-buffer size in bytes.
    pub const PRODUCER_CB_SIZE: usize = 7;
    /// Consumer staging-buffer size in bytes.
    pub const CONSUMER_CB_SIZE: usize = 8;
    /// Producer staging-buffer capacity in pages.
    pub const PRODUCER_CB_NUM_PAGES: usize = 9;
    /// Consumer staging-buffer capacity in pages.
    pub const CONSUMER_CB_NUM_PAGES: usize = 10;
    /// Total pages moved by this command.
    pub const NUM_PAGES: usize = 11;
    /// Inline payload bytes following the record on the ring.
    pub const DATA_SIZE: usize = 12;
    /// Pages handed producer→consumer per semaphore increment.
    pub const PRODUCER_CONSUMER_TRANSFER_NUM_PAGES: usize = 13;
    // words 14–15 reserved
}

/// Buffer-transfer table capacity.
pub const NUM_POSSIBLE_BUFFER_TRANSFERS: u32 = 2;

/// Words per buffer-transfer entry: src, dst, `num_pages`, `page_size`,
/// src buffer type, dst buffer type.
pub const NUM_ENTRIES_PER_BUFFER_TRANSFER: u32 = 6;

/// First word of the buffer-transfer table.
pub const BUFFER_TRANSFER_SECTION_OFFSET: u32 = NUM_ENTRIES_IN_COMMAND_HEADER;

/// First word of the program-transfer section.
pub const PROGRAM_TRANSFER_SECTION_OFFSET: u32 =
    BUFFER_TRANSFER_SECTION_OFFSET + NUM_POSSIBLE_BUFFER_TRANSFERS * NUM_ENTRIES_PER_BUFFER_TRANSFER;

/// Words per partial-write entry: `num_bytes`, dst, `dst_noc`,
/// `num_receivers`, `last_in_group`.
pub const NUM_ENTRIES_PER_PAGE_TRANSFER: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_ring_aligned() {
        assert_eq!(NUM_BYTES_IN_DEVICE_COMMAND % 32, 0);
        assert_eq!(PROGRAM_PAGE_SIZE % 32, 0);
    }

    #[test]
    fn sections_are_contiguous() {
        assert_eq!(BUFFER_TRANSFER_SECTION_OFFSET, 16);
        assert_eq!(PROGRAM_TRANSFER_SECTION_OFFSET, 28);
        assert!(PROGRAM_TRANSFER_SECTION_OFFSET < DEVICE_COMMAND_NUM_WORDS);
    }
}
