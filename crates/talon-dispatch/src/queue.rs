//! The command queue
//!
//! Top-level entry point: validates each request, keeps the per-program
//! caches, enforces the wrap policy, and drives command objects through
//! the ring writer. Single-threaded by design — one command per call, on
//! the caller's thread, strictly in call order.
//!
//! Blocking shape is part of the API: reads are blocking (the read-back
//! and padding strip happen inside the call), writes and program
//! dispatches are non-blocking, and `finish` is the only barrier.

use crate::buffer::{Buffer, BufferType};
use crate::commands::{
    Command, EnqueueProgramCommand, EnqueueReadBufferCommand, EnqueueWrapCommand, EnqueueWriteBufferCommand,
    FinishCommand,
};
use crate::device::Device;
use crate::error::{DispatchError, Result};
use crate::program::Program;
use crate::program_map::construct_program_map;
use crate::sysmem::SystemMemoryWriter;
use crate::bootstrap;
use std::collections::HashMap;
use std::sync::Arc;
use talon_chip::cmd::{NUM_BYTES_IN_DEVICE_COMMAND, PROGRAM_PAGE_SIZE};
use talon_chip::cq::{CQ_START, DATA_SECTION_ADDRESS, HOST_CQ_FINISH_PTR, HUGE_PAGE_SIZE};
use talon_chip::memmap::MEM_L1_SIZE;
use talon_chip::noc::align;
use tracing::{debug, info};

/// Host-side command queue for one device.
#[derive(Debug)]
pub struct CommandQueue {
    device: Arc<Device>,
    sysmem_writer: SystemMemoryWriter,
    program_to_buffer: HashMap<u64, Buffer>,
    program_to_dev_map: HashMap<u64, crate::program_map::ProgramMap>,
}

impl CommandQueue {
    /// Open a queue over the standard 1 GiB ring. The first queue on a
    /// device boots the dispatch firmware.
    ///
    /// # Errors
    ///
    /// Returns error if ring initialization or the firmware bootstrap
    /// fails.
    pub fn new(device: Arc<Device>) -> Result<Self> {
        Self::with_writer(device, SystemMemoryWriter::with_ring_size(HUGE_PAGE_SIZE))
    }

    /// Open a queue over a smaller ring (tests only; see
    /// [`SystemMemoryWriter::with_ring_size`]).
    ///
    /// # Errors
    ///
    /// Returns error if ring initialization or the firmware bootstrap
    /// fails.
    pub fn with_ring_size(device: Arc<Device>, ring_size: u32) -> Result<Self> {
        Self::with_writer(device, SystemMemoryWriter::with_ring_size(ring_size))
    }

    fn with_writer(device: Arc<Device>, sysmem_writer: SystemMemoryWriter) -> Result<Self> {
        if device.claim_dispatch_launch() {
            bootstrap::launch_dispatch_firmware(&device)?;
        }
        info!("CommandQueue ready on device {} ({} byte ring)", device.id(), sysmem_writer.ring_size());
        Ok(Self {
            device,
            sysmem_writer,
            program_to_buffer: HashMap::new(),
            program_to_dev_map: HashMap::new(),
        })
    }

    /// The device this queue dispatches to.
    #[must_use]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Single dispatch point: every command funnels through here.
    fn issue<'a>(writer: &mut SystemMemoryWriter, mut command: Command<'a>) -> Result<Command<'a>> {
        debug!("{:?}", command.kind());
        command.process(writer)?;
        Ok(command)
    }

    /// Insert a wrap command if `cmd_size` bytes would run past the ring
    /// end. A command that cannot fit even from `CQ_START` is fatal.
    fn wrap_check(&mut self, cmd_size: u32) -> Result<()> {
        if self.sysmem_writer.wr_ptr_bytes() + cmd_size >= self.sysmem_writer.ring_size() {
            let capacity = self.sysmem_writer.ring_size() - CQ_START;
            if cmd_size > capacity {
                return Err(DispatchError::CommandTooLarge { size: cmd_size, capacity });
            }
            self.wrap()?;
        }
        Ok(())
    }

    /// Read a device buffer back to the host. Blocking: returns the
    /// buffer contents with alignment padding stripped.
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot fit the ring or a transfer
    /// fails.
    pub fn read_buffer(&mut self, buffer: &Buffer) -> Result<Vec<u32>> {
        let padded_page_size = align(buffer.page_size(), 32);
        let data_size_in_bytes = padded_page_size * buffer.num_pages();
        self.wrap_check(NUM_BYTES_IN_DEVICE_COMMAND + data_size_in_bytes)?;

        let command = Self::issue(
            &mut self.sysmem_writer,
            Command::ReadBuffer(EnqueueReadBufferCommand::new(&self.device, buffer)),
        )?;
        let Command::ReadBuffer(command) = command else { unreachable!() };
        let read_buffer_addr = command.read_buffer_addr;

        // The read is synchronous: drain before touching the scratch area.
        self.finish()?;

        let mut dst = Vec::new();
        self.device.read_host_region(&mut dst, read_buffer_addr, data_size_in_bytes, 0)?;

        // Strip the per-page alignment padding, if any.
        if buffer.page_size() % 32 != 0 {
            let page_words = (buffer.page_size() / 4) as usize;
            let padded_words = (padded_page_size / 4) as usize;
            let mut stripped = Vec::with_capacity((buffer.size() / 4) as usize);
            for page in dst.chunks(padded_words) {
                stripped.extend_from_slice(&page[..page_words]);
            }
            dst = stripped;
        }
        Ok(dst)
    }

    /// Write host words into a device buffer. Non-blocking: returns once
    /// the command and payload are on the ring.
    ///
    /// # Errors
    ///
    /// Returns error if the buffer is not dispatchable, the source
    /// exceeds the buffer, a page cannot stream through dispatch L1, or
    /// the command cannot fit the ring.
    pub fn write_buffer(&mut self, buffer: &Buffer, src: &[u32]) -> Result<()> {
        if !matches!(buffer.buffer_type(), BufferType::Dram | BufferType::L1) {
            return Err(DispatchError::InvalidBufferType { buffer_type: buffer.buffer_type() });
        }
        let src_bytes = u32::try_from(src.len() * 4).expect("source exceeds u32 bytes");
        if src_bytes > buffer.size() {
            return Err(DispatchError::SourceTooLarge { src_bytes, buffer_bytes: buffer.size() });
        }
        let data_section_limit = MEM_L1_SIZE - DATA_SECTION_ADDRESS;
        if buffer.page_size() >= data_section_limit {
            return Err(DispatchError::PageTooLarge { page_size: buffer.page_size(), limit: data_section_limit });
        }

        let padded_page_size = if buffer.page_size() == buffer.size() {
            buffer.page_size()
        } else {
            align(buffer.page_size(), 32)
        };
        self.wrap_check(NUM_BYTES_IN_DEVICE_COMMAND + padded_page_size * buffer.num_pages())?;

        Self::issue(
            &mut self.sysmem_writer,
            Command::WriteBuffer(EnqueueWriteBufferCommand::new(&self.device, buffer, src)),
        )?;
        Ok(())
    }

    /// Dispatch a program. Non-blocking.
    ///
    /// The first enqueue of a program flattens it, writes its pages to a
    /// DRAM buffer, and stalls the dispatcher's prefetch until the
    /// binaries land; later enqueues resend only the runtime arguments
    /// and circular-buffer configs.
    ///
    /// # Errors
    ///
    /// Returns error if DRAM allocation fails or a command cannot fit
    /// the ring.
    pub fn enqueue_program(&mut self, program: &Program) -> Result<()> {
        let program_id = program.id();

        let stall = if self.program_to_buffer.contains_key(&program_id) {
            false
        } else {
            let program_map = construct_program_map(&self.device, program);
            let program_data_size_in_bytes =
                u32::try_from(program_map.program_pages.len() * 4).expect("program pages exceed u32 bytes");

            let buffer =
                self.device.allocate_buffer(program_data_size_in_bytes, PROGRAM_PAGE_SIZE, BufferType::Dram)?;
            if program_data_size_in_bytes > 0 {
                self.write_buffer(&buffer, &program_map.program_pages)?;
            }

            debug!(
                "program {program_id}: cached {program_data_size_in_bytes}B of pages at {:#x}",
                buffer.address()
            );
            self.program_to_buffer.insert(program_id, buffer);
            self.program_to_dev_map.insert(program_id, program_map);
            true
        };

        // Runtime args ride inline on every enqueue, each core's block
        // padded out to a 16-byte boundary, followed by the CB configs.
        let mut host_data: Vec<u32> = Vec::new();
        for kernel in program.kernels() {
            for core_runtime_args in kernel.runtime_args().values() {
                host_data.extend_from_slice(core_runtime_args);
                let padded_len = align(u32::try_from(host_data.len()).expect("host data exceeds u32 words"), 4);
                host_data.resize(padded_len as usize, 0);
            }
        }
        for cb in program.circular_buffers() {
            for buffer_index in cb.buffer_indices() {
                host_data.push(cb.address() >> 4);
                host_data.push(cb.size() >> 4);
                host_data.push(cb.num_pages(buffer_index));
                host_data.push((cb.size() / cb.num_pages(buffer_index)) >> 4);
            }
        }

        let host_data_bytes = u32::try_from(host_data.len() * 4).expect("host data exceeds u32 bytes");
        self.wrap_check(NUM_BYTES_IN_DEVICE_COMMAND + host_data_bytes)?;

        let buffer = &self.program_to_buffer[&program_id];
        let program_map = &self.program_to_dev_map[&program_id];
        Self::issue(
            &mut self.sysmem_writer,
            Command::Program(EnqueueProgramCommand::new(&self.device, buffer, program_map, &host_data, stall)),
        )?;
        Ok(())
    }

    /// Barrier: returns once the device has drained everything enqueued
    /// before it.
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be emitted or polling fails.
    pub fn finish(&mut self) -> Result<()> {
        if self.sysmem_writer.wr_ptr_bytes() + NUM_BYTES_IN_DEVICE_COMMAND >= self.sysmem_writer.ring_size() {
            self.wrap()?;
        }
        Self::issue(&mut self.sysmem_writer, Command::Finish(FinishCommand::new(&self.device)))?;

        let mut finish_word = Vec::new();
        loop {
            self.device.read_host_region(&mut finish_word, HOST_CQ_FINISH_PTR, 4, 0)?;
            if finish_word[0] == 1 {
                break;
            }
            std::hint::spin_loop();
        }
        self.device.write_host_region(&[0], HOST_CQ_FINISH_PTR, 0)
    }

    /// Fill the rest of the ring with a wrap block and rewind the cursor.
    fn wrap(&mut self) -> Result<()> {
        Self::issue(&mut self.sysmem_writer, Command::Wrap(EnqueueWrapCommand::new(&self.device)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareDevice;
    use talon_chip::CoreCoord;

    fn queue(ring_size: u32) -> CommandQueue {
        let device = Arc::new(Device::new(0, CoreCoord::new(8, 8), Box::new(SoftwareDevice::new())));
        CommandQueue::with_ring_size(device, ring_size).unwrap()
    }

    #[test]
    fn oversized_command_is_fatal() {
        let mut cq = queue(64 * 1024);
        let device = Arc::clone(cq.device());
        // 128 KiB of payload cannot fit a 64 KiB ring on any lap.
        let buffer = device.allocate_buffer(128 * 1024, 4096, BufferType::Dram).unwrap();
        let src = vec![0u32; 128 * 1024 / 4];
        assert!(matches!(cq.write_buffer(&buffer, &src), Err(DispatchError::CommandTooLarge { .. })));
    }

    #[test]
    fn write_to_system_memory_buffer_is_rejected() {
        let mut cq = queue(256 * 1024);
        let buffer = Buffer::new(0, 4096, 1024, BufferType::SystemMemory).unwrap();
        assert!(matches!(
            cq.write_buffer(&buffer, &[0; 16]),
            Err(DispatchError::InvalidBufferType { .. })
        ));
    }

    #[test]
    fn source_larger_than_buffer_is_rejected() {
        let mut cq = queue(256 * 1024);
        let device = Arc::clone(cq.device());
        let buffer = device.allocate_buffer(1024, 256, BufferType::Dram).unwrap();
        let src = vec![0u32; 512];
        assert!(matches!(cq.write_buffer(&buffer, &src), Err(DispatchError::SourceTooLarge { .. })));
    }
}
