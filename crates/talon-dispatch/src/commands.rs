//! Per-kind enqueue commands
//!
//! One variant per thing the queue can emit. Each knows how to assemble
//! its [`DeviceCommand`] and how to move it through the ring: reserve,
//! write header, write payload (if any), push. The push publishes header
//! and payload as one pointer advance, so the consumer never sees a
//! header without its bytes.
//!
//! Commands are ephemeral — built on the caller's stack for one enqueue
//! and dispatched through a single `match` in the queue.

use crate::buffer::{Buffer, BufferType};
use crate::command::DeviceCommand;
use crate::device::Device;
use crate::error::{DispatchError, Result};
use crate::program_map::ProgramMap;
use crate::sysmem::SystemMemoryWriter;
use talon_chip::cmd::{NUM_BYTES_IN_DEVICE_COMMAND, PROGRAM_PAGE_SIZE};
use talon_chip::cq::{CONSUMER_DATA_BUFFER_SIZE, PRODUCER_DATA_BUFFER_SIZE};
use talon_chip::noc::align;

/// What a command is, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueCommandType {
    /// Blocking buffer read-back.
    EnqueueReadBuffer,
    /// Non-blocking buffer write.
    EnqueueWriteBuffer,
    /// Non-blocking program dispatch.
    EnqueueProgram,
    /// Finish barrier.
    Finish,
    /// Ring wrap marker.
    EnqueueWrap,
}

/// Size the dispatch-core staging buffers for a paged buffer transfer.
///
/// The consumer buffer takes as many padded pages as fit, rounded down to
/// a multiple of four so the producer hands pages over in quarters; the
/// producer double-buffers it.
fn configure_transfer_buffers(command: &mut DeviceCommand, padded_page_size: u32) -> Result<()> {
    let mut consumer_cb_num_pages = CONSUMER_DATA_BUFFER_SIZE / padded_page_size;
    if consumer_cb_num_pages >= 4 {
        consumer_cb_num_pages = (consumer_cb_num_pages / 4) * 4;
        command.set_producer_consumer_transfer_num_pages(consumer_cb_num_pages / 4);
    } else {
        command.set_producer_consumer_transfer_num_pages(1);
    }

    let consumer_cb_size = consumer_cb_num_pages * padded_page_size;
    let producer_cb_num_pages = consumer_cb_num_pages * 2;
    let producer_cb_size = producer_cb_num_pages * padded_page_size;

    command.set_producer_cb_size(producer_cb_size);
    command.set_consumer_cb_size(consumer_cb_size);
    command.set_producer_cb_num_pages(producer_cb_num_pages);
    command.set_consumer_cb_num_pages(consumer_cb_num_pages);

    if padded_page_size > consumer_cb_size {
        return Err(DispatchError::PageExceedsConsumerBuffer { padded_page_size, consumer_cb_size });
    }
    Ok(())
}

// ── Read ─────────────────────────────────────────────────────────────────────

/// Stream a device buffer into ring scratch space for the host to read.
#[derive(Debug)]
pub struct EnqueueReadBufferCommand<'a> {
    device: &'a Device,
    buffer: &'a Buffer,
    /// Ring address the data lands at; valid after `process`.
    pub read_buffer_addr: u32,
}

impl<'a> EnqueueReadBufferCommand<'a> {
    pub(crate) const fn new(device: &'a Device, buffer: &'a Buffer) -> Self {
        Self { device, buffer, read_buffer_addr: 0 }
    }

    fn assemble_device_command(&self, dst_address: u32) -> Result<DeviceCommand> {
        let mut command = DeviceCommand::new();
        let padded_page_size = align(self.buffer.page_size(), 32);

        command.add_buffer_transfer_instruction(
            self.buffer.address(),
            dst_address,
            self.buffer.num_pages(),
            padded_page_size,
            self.buffer.buffer_type(),
            BufferType::SystemMemory,
        )?;
        configure_transfer_buffers(&mut command, padded_page_size)?;

        // The producer must not prefetch past a read in flight.
        command.set_stall();
        command.set_page_size(padded_page_size);
        command.set_num_pages(self.buffer.num_pages());
        command.set_data_size(padded_page_size * self.buffer.num_pages());
        Ok(command)
    }

    fn process(&mut self, writer: &mut SystemMemoryWriter) -> Result<()> {
        let write_ptr = writer.wr_ptr_bytes();
        let system_memory_temporary_storage_address = write_ptr + NUM_BYTES_IN_DEVICE_COMMAND;
        self.read_buffer_addr = system_memory_temporary_storage_address;

        let cmd = self.assemble_device_command(system_memory_temporary_storage_address)?;
        let cmd_size = NUM_BYTES_IN_DEVICE_COMMAND + cmd.get_data_size();

        writer.cq_reserve_back(self.device, cmd_size)?;
        writer.cq_write(self.device, cmd.get_desc(), write_ptr)?;
        writer.cq_push_back(self.device, cmd_size)
    }
}

// ── Write ────────────────────────────────────────────────────────────────────

/// Stream host words through the ring into a device buffer.
#[derive(Debug)]
pub struct EnqueueWriteBufferCommand<'a> {
    device: &'a Device,
    buffer: &'a Buffer,
    src: &'a [u32],
}

impl<'a> EnqueueWriteBufferCommand<'a> {
    pub(crate) const fn new(device: &'a Device, buffer: &'a Buffer, src: &'a [u32]) -> Self {
        Self { device, buffer, src }
    }

    fn assemble_device_command(&self, src_address: u32) -> Result<DeviceCommand> {
        let mut command = DeviceCommand::new();

        // A single-page buffer ships unpadded; multi-page buffers pad each
        // page so every NOC transfer starts 32-byte aligned.
        let padded_page_size = if self.buffer.page_size() == self.buffer.size() {
            self.buffer.page_size()
        } else {
            align(self.buffer.page_size(), 32)
        };

        command.add_buffer_transfer_instruction(
            src_address,
            self.buffer.address(),
            self.buffer.num_pages(),
            padded_page_size,
            BufferType::SystemMemory,
            self.buffer.buffer_type(),
        )?;
        configure_transfer_buffers(&mut command, padded_page_size)?;

        command.set_page_size(padded_page_size);
        command.set_num_pages(self.buffer.num_pages());
        command.set_data_size(padded_page_size * self.buffer.num_pages());
        Ok(command)
    }

    fn process(&mut self, writer: &mut SystemMemoryWriter) -> Result<()> {
        let write_ptr = writer.wr_ptr_bytes();
        let system_memory_temporary_storage_address = write_ptr + NUM_BYTES_IN_DEVICE_COMMAND;

        let cmd = self.assemble_device_command(system_memory_temporary_storage_address)?;
        let cmd_size = NUM_BYTES_IN_DEVICE_COMMAND + cmd.get_data_size();

        writer.cq_reserve_back(self.device, cmd_size)?;
        writer.cq_write(self.device, cmd.get_desc(), write_ptr)?;

        if self.buffer.page_size() % 32 != 0 && self.buffer.page_size() != self.buffer.size() {
            // Unaligned pages go out one at a time on a padded stride.
            let num_u32s_in_page = (self.buffer.page_size() / 4) as usize;
            let mut dst = system_memory_temporary_storage_address;
            for src_page in self.src.chunks(num_u32s_in_page).take(self.buffer.num_pages() as usize) {
                writer.cq_write(self.device, src_page, dst)?;
                dst = align(dst + self.buffer.page_size(), 32);
            }
        } else {
            writer.cq_write(self.device, self.src, system_memory_temporary_storage_address)?;
        }

        writer.cq_push_back(self.device, cmd_size)
    }
}

// ── Program ──────────────────────────────────────────────────────────────────

/// Dispatch a flattened program: host pages inline, program pages from
/// the cached DRAM buffer.
#[derive(Debug)]
pub struct EnqueueProgramCommand<'a> {
    device: &'a Device,
    buffer: &'a Buffer,
    program_map: &'a ProgramMap,
    host_data: &'a [u32],
    stall: bool,
}

impl<'a> EnqueueProgramCommand<'a> {
    pub(crate) const fn new(
        device: &'a Device,
        buffer: &'a Buffer,
        program_map: &'a ProgramMap,
        host_data: &'a [u32],
        stall: bool,
    ) -> Self {
        Self { device, buffer, program_map, host_data, stall }
    }

    fn assemble_device_command(&self, host_data_src: u32) -> Result<DeviceCommand> {
        let mut command = DeviceCommand::new();
        command.set_num_workers(self.program_map.num_workers);
        command.set_is_program();

        // Program commands route by the program-transfer section; the
        // buffer-transfer destinations are ignored by the consumer.
        let dummy_dst = 0;
        let dummy_dst_type = BufferType::Dram;

        let num_host_data_pages = self.program_map.num_host_data_pages();
        let num_program_pages = self.program_map.num_program_pages();
        command.set_page_size(PROGRAM_PAGE_SIZE);
        command.set_num_pages(num_host_data_pages + num_program_pages);
        // Only the host pages ride the ring; binaries are already in DRAM.
        command.set_data_size(PROGRAM_PAGE_SIZE * num_host_data_pages);

        if num_host_data_pages != 0 {
            command.add_buffer_transfer_instruction(
                host_data_src,
                dummy_dst,
                num_host_data_pages,
                PROGRAM_PAGE_SIZE,
                BufferType::SystemMemory,
                dummy_dst_type,
            )?;
            Self::populate_program_transfers(
                &mut command,
                &self.program_map.num_transfers_in_host_data_pages,
                &self.program_map.host_page_transfers,
            );
        }

        if num_program_pages != 0 {
            command.add_buffer_transfer_instruction(
                self.buffer.address(),
                dummy_dst,
                num_program_pages,
                PROGRAM_PAGE_SIZE,
                self.buffer.buffer_type(),
                dummy_dst_type,
            )?;
            Self::populate_program_transfers(
                &mut command,
                &self.program_map.num_transfers_in_program_pages,
                &self.program_map.program_page_transfers,
            );
        }

        let producer_cb_num_pages = PRODUCER_DATA_BUFFER_SIZE / PROGRAM_PAGE_SIZE;
        let consumer_cb_num_pages = CONSUMER_DATA_BUFFER_SIZE / PROGRAM_PAGE_SIZE;
        command.set_producer_cb_size(producer_cb_num_pages * PROGRAM_PAGE_SIZE);
        command.set_consumer_cb_size(consumer_cb_num_pages * PROGRAM_PAGE_SIZE);
        command.set_producer_cb_num_pages(producer_cb_num_pages);
        command.set_consumer_cb_num_pages(consumer_cb_num_pages);

        // Set only when the program's binaries were written to DRAM by the
        // immediately preceding command.
        if self.stall {
            command.set_stall();
        }

        // Programs are small; hand over in small batches.
        command.set_producer_consumer_transfer_num_pages(4);
        Ok(command)
    }

    fn populate_program_transfers(
        command: &mut DeviceCommand,
        num_transfers_per_page: &[u32],
        transfers: &[crate::program_map::TransferInfo],
    ) {
        let mut i = 0usize;
        for &num_transfers_in_page in num_transfers_per_page {
            command.write_program_entry(num_transfers_in_page);
            for _ in 0..num_transfers_in_page {
                let t = &transfers[i];
                command.add_write_page_partial_instruction(
                    t.size_bytes,
                    t.dst,
                    t.dst_noc_multicast_encoding,
                    t.num_receivers,
                    t.last_multicast_in_group,
                );
                i += 1;
            }
        }
    }

    fn process(&mut self, writer: &mut SystemMemoryWriter) -> Result<()> {
        let write_ptr = writer.wr_ptr_bytes();
        let system_memory_temporary_storage_address = write_ptr + NUM_BYTES_IN_DEVICE_COMMAND;

        let cmd = self.assemble_device_command(system_memory_temporary_storage_address)?;
        let cmd_size = NUM_BYTES_IN_DEVICE_COMMAND + cmd.get_data_size();

        writer.cq_reserve_back(self.device, cmd_size)?;
        writer.cq_write(self.device, cmd.get_desc(), write_ptr)?;
        if !self.host_data.is_empty() {
            writer.cq_write(self.device, self.host_data, system_memory_temporary_storage_address)?;
        }
        writer.cq_push_back(self.device, cmd_size)
    }
}

// ── Finish ───────────────────────────────────────────────────────────────────

/// Barrier: the consumer writes the host finish word when everything
/// ahead of it has completed.
#[derive(Debug)]
pub struct FinishCommand<'a> {
    device: &'a Device,
}

impl<'a> FinishCommand<'a> {
    pub(crate) const fn new(device: &'a Device) -> Self {
        Self { device }
    }

    fn process(&mut self, writer: &mut SystemMemoryWriter) -> Result<()> {
        let write_ptr = writer.wr_ptr_bytes();
        let mut cmd = DeviceCommand::new();
        cmd.finish();

        let cmd_size = NUM_BYTES_IN_DEVICE_COMMAND;
        writer.cq_reserve_back(self.device, cmd_size)?;
        writer.cq_write(self.device, cmd.get_desc(), write_ptr)?;
        writer.cq_push_back(self.device, cmd_size)
    }
}

// ── Wrap ─────────────────────────────────────────────────────────────────────

/// Fill the remainder of the ring with a marker block so the consumer
/// rewinds to the first slot.
#[derive(Debug)]
pub struct EnqueueWrapCommand<'a> {
    device: &'a Device,
}

impl<'a> EnqueueWrapCommand<'a> {
    pub(crate) const fn new(device: &'a Device) -> Self {
        Self { device }
    }

    fn process(&mut self, writer: &mut SystemMemoryWriter) -> Result<()> {
        let write_ptr = writer.wr_ptr_bytes();
        let space_left = writer.ring_size() - write_ptr;

        // All zeros reads as no-ops; word 0 is the wrap marker.
        let mut command_vector = vec![0u32; (space_left / 4) as usize];
        command_vector[0] = 1;

        writer.cq_reserve_back(self.device, space_left)?;
        writer.cq_write(self.device, &command_vector, write_ptr)?;
        writer.cq_push_back(self.device, space_left)
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// The tagged command — one variant per enqueue kind.
#[derive(Debug)]
pub enum Command<'a> {
    /// Blocking read.
    ReadBuffer(EnqueueReadBufferCommand<'a>),
    /// Non-blocking write.
    WriteBuffer(EnqueueWriteBufferCommand<'a>),
    /// Non-blocking program dispatch.
    Program(EnqueueProgramCommand<'a>),
    /// Finish barrier.
    Finish(FinishCommand<'a>),
    /// Ring wrap.
    Wrap(EnqueueWrapCommand<'a>),
}

impl Command<'_> {
    /// Command kind.
    #[must_use]
    pub const fn kind(&self) -> EnqueueCommandType {
        match self {
            Self::ReadBuffer(_) => EnqueueCommandType::EnqueueReadBuffer,
            Self::WriteBuffer(_) => EnqueueCommandType::EnqueueWriteBuffer,
            Self::Program(_) => EnqueueCommandType::EnqueueProgram,
            Self::Finish(_) => EnqueueCommandType::Finish,
            Self::Wrap(_) => EnqueueCommandType::EnqueueWrap,
        }
    }

    /// Assemble and emit through the ring.
    ///
    /// # Errors
    ///
    /// Propagates assembly and transport failures; the ring is not pushed
    /// on error.
    pub fn process(&mut self, writer: &mut SystemMemoryWriter) -> Result<()> {
        match self {
            Self::ReadBuffer(c) => c.process(writer),
            Self::WriteBuffer(c) => c.process(writer),
            Self::Program(c) => c.process(writer),
            Self::Finish(c) => c.process(writer),
            Self::Wrap(c) => c.process(writer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_chip::cmd::header;

    #[test]
    fn transfer_buffer_sizing_rounds_to_quarters() {
        // 4 KiB padded pages: 64 consumer pages, handed over 16 at a time.
        let mut cmd = DeviceCommand::new();
        configure_transfer_buffers(&mut cmd, 4096).unwrap();
        let desc = cmd.get_desc();
        assert_eq!(desc[header::CONSUMER_CB_NUM_PAGES], 64);
        assert_eq!(desc[header::PRODUCER_CB_NUM_PAGES], 128);
        assert_eq!(desc[header::PRODUCER_CONSUMER_TRANSFER_NUM_PAGES], 16);
        assert_eq!(desc[header::CONSUMER_CB_SIZE], 64 * 4096);
    }

    #[test]
    fn transfer_buffer_sizing_degenerates_to_single_pages() {
        // Pages nearly the size of the consumer buffer: no quartering.
        let mut cmd = DeviceCommand::new();
        configure_transfer_buffers(&mut cmd, CONSUMER_DATA_BUFFER_SIZE / 2).unwrap();
        let desc = cmd.get_desc();
        assert_eq!(desc[header::CONSUMER_CB_NUM_PAGES], 2);
        assert_eq!(desc[header::PRODUCER_CONSUMER_TRANSFER_NUM_PAGES], 1);
    }

    #[test]
    fn oversized_page_is_rejected() {
        let mut cmd = DeviceCommand::new();
        let err = configure_transfer_buffers(&mut cmd, CONSUMER_DATA_BUFFER_SIZE * 2);
        assert!(matches!(err, Err(DispatchError::PageExceedsConsumerBuffer { .. })));
    }
}
