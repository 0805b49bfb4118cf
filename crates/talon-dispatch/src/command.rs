//! Device-command assembly
//!
//! `DeviceCommand` builds the fixed-layout record defined in
//! [`talon_chip::cmd`]: a word vector the exact size of a ring slot
//! header, with setters for the named header fields and append operations
//! for the two transfer tables. `get_desc` is the wire bytes — what you
//! set is what the firmware decodes, and unused words stay zero.

use crate::buffer::BufferType;
use crate::error::{DispatchError, Result};
use talon_chip::cmd::{
    header, BUFFER_TRANSFER_SECTION_OFFSET, DEVICE_COMMAND_NUM_WORDS, NUM_ENTRIES_PER_BUFFER_TRANSFER,
    NUM_ENTRIES_PER_PAGE_TRANSFER, NUM_POSSIBLE_BUFFER_TRANSFERS, PROGRAM_TRANSFER_SECTION_OFFSET,
};

/// Builder for one device-command record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    desc: Vec<u32>,
    program_entry_idx: usize,
}

impl Default for DeviceCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceCommand {
    /// A zeroed record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            desc: vec![0; DEVICE_COMMAND_NUM_WORDS as usize],
            program_entry_idx: PROGRAM_TRANSFER_SECTION_OFFSET as usize,
        }
    }

    /// Mark as the finish-barrier command.
    pub fn finish(&mut self) {
        self.desc[header::FINISH] = 1;
    }

    /// Stall producer prefetch until outstanding writes land.
    pub fn set_stall(&mut self) {
        self.desc[header::STALL] = 1;
    }

    /// Mark as a program-dispatch command.
    pub fn set_is_program(&mut self) {
        self.desc[header::IS_PROGRAM] = 1;
    }

    /// Worker cores the dispatcher waits on.
    pub fn set_num_workers(&mut self, num_workers: u32) {
        self.desc[header::NUM_WORKERS] = num_workers;
    }

    /// Transfer page size in bytes.
    pub fn set_page_size(&mut self, page_size: u32) {
        self.desc[header::PAGE_SIZE] = page_size;
    }

    /// Producer staging-buffer size in bytes.
    pub fn set_producer_cb_size(&mut self, size: u32) {
        self.desc[header::PRODUCER_CB_SIZE] = size;
    }

    /// Consumer staging-buffer size in bytes.
    pub fn set_consumer_cb_size(&mut self, size: u32) {
        self.desc[header::CONSUMER_CB_SIZE] = size;
    }

    /// Producer staging-buffer capacity in pages.
    pub fn set_producer_cb_num_pages(&mut self, num_pages: u32) {
        self.desc[header::PRODUCER_CB_NUM_PAGES] = num_pages;
    }

    /// Consumer staging-buffer capacity in pages.
    pub fn set_consumer_cb_num_pages(&mut self, num_pages: u32) {
        self.desc[header::CONSUMER_CB_NUM_PAGES] = num_pages;
    }

    /// Total pages moved by this command.
    pub fn set_num_pages(&mut self, num_pages: u32) {
        self.desc[header::NUM_PAGES] = num_pages;
    }

    /// Inline payload bytes following the record.
    pub fn set_data_size(&mut self, data_size: u32) {
        self.desc[header::DATA_SIZE] = data_size;
    }

    /// Inline payload bytes.
    #[must_use]
    pub fn get_data_size(&self) -> u32 {
        self.desc[header::DATA_SIZE]
    }

    /// Pages handed producer→consumer per semaphore increment.
    pub fn set_producer_consumer_transfer_num_pages(&mut self, num_pages: u32) {
        self.desc[header::PRODUCER_CONSUMER_TRANSFER_NUM_PAGES] = num_pages;
    }

    /// Append one buffer-transfer entry.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::TransferTableFull`] once the table holds
    /// [`NUM_POSSIBLE_BUFFER_TRANSFERS`] entries.
    pub fn add_buffer_transfer_instruction(
        &mut self,
        src: u32,
        dst: u32,
        num_pages: u32,
        page_size: u32,
        src_buf_type: BufferType,
        dst_buf_type: BufferType,
    ) -> Result<()> {
        let index = self.desc[header::NUM_BUFFER_TRANSFERS];
        if index >= NUM_POSSIBLE_BUFFER_TRANSFERS {
            return Err(DispatchError::TransferTableFull { max: NUM_POSSIBLE_BUFFER_TRANSFERS });
        }
        let offset = (BUFFER_TRANSFER_SECTION_OFFSET + index * NUM_ENTRIES_PER_BUFFER_TRANSFER) as usize;
        self.desc[offset] = src;
        self.desc[offset + 1] = dst;
        self.desc[offset + 2] = num_pages;
        self.desc[offset + 3] = page_size;
        self.desc[offset + 4] = src_buf_type.as_u32();
        self.desc[offset + 5] = dst_buf_type.as_u32();
        self.desc[header::NUM_BUFFER_TRANSFERS] = index + 1;
        Ok(())
    }

    /// Open one page's group in the program-transfer section: the count of
    /// partial-write entries that follow.
    ///
    /// # Panics
    ///
    /// Panics if the program-transfer section is full — a program that
    /// overflows it cannot be dispatched and indicates a flattening bug.
    pub fn write_program_entry(&mut self, num_transfers_in_page: u32) {
        assert!(
            self.program_entry_idx < DEVICE_COMMAND_NUM_WORDS as usize,
            "program-transfer section overflow"
        );
        self.desc[self.program_entry_idx] = num_transfers_in_page;
        self.program_entry_idx += 1;
    }

    /// Append one partial-write entry to the currently open page group.
    ///
    /// # Panics
    ///
    /// Panics if the program-transfer section is full.
    pub fn add_write_page_partial_instruction(
        &mut self,
        num_bytes: u32,
        dst: u32,
        dst_noc: u32,
        num_receivers: u32,
        last_in_group: bool,
    ) {
        let end = self.program_entry_idx + NUM_ENTRIES_PER_PAGE_TRANSFER as usize;
        assert!(end <= DEVICE_COMMAND_NUM_WORDS as usize, "program-transfer section overflow");
        self.desc[self.program_entry_idx] = num_bytes;
        self.desc[self.program_entry_idx + 1] = dst;
        self.desc[self.program_entry_idx + 2] = dst_noc;
        self.desc[self.program_entry_idx + 3] = num_receivers;
        self.desc[self.program_entry_idx + 4] = u32::from(last_in_group);
        self.program_entry_idx = end;
    }

    /// The wire form: exactly [`DEVICE_COMMAND_NUM_WORDS`] words.
    #[must_use]
    pub fn get_desc(&self) -> &[u32] {
        &self.desc
    }
}
