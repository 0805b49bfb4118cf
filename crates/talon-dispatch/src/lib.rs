//! Host-side command queue for the Talon TL1000 mesh accelerator.
//!
//! This crate is the host half of the dispatch path: it turns high-level
//! work items — buffer reads, buffer writes, program launches, finish
//! barriers — into fixed-layout device commands on a pinned shared-memory
//! ring that the on-device dispatcher firmware drains. No Python, no C++
//! runtime.
//!
//! # Architecture
//!
//! ```text
//! caller
//!   └─ CommandQueue            per-program caches, wrap policy
//!        └─ Command            one variant per enqueue kind
//!             ├─ DeviceCommand        fixed-layout wire record
//!             ├─ construct_program_map  program → page-grouped transfers
//!             └─ SystemMemoryWriter   reserve / write / push the ring
//!                  └─ DispatchBackend   write_host_region · read_host_region · write_device_l1
//! ```
//!
//! The first queue on a device boots the producer/consumer firmware pair
//! on the two reserved dispatch cores; after that, every configuration of
//! the device flows through the ring.
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use talon_dispatch::prelude::*;
//! use talon_chip::CoreCoord;
//!
//! # fn main() -> talon_dispatch::Result<()> {
//! let device = Arc::new(Device::new(0, CoreCoord::new(8, 8), Box::new(SoftwareDevice::new())));
//! let mut cq = CommandQueue::new(Arc::clone(&device))?;
//!
//! let buffer = device.allocate_buffer(1024, 256, BufferType::Dram)?;
//! let data: Vec<u32> = (0..256).collect();
//! cq.write_buffer(&buffer, &data)?;
//! assert_eq!(cq.read_buffer(&buffer)?, data);
//! cq.finish()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

mod backend;
pub mod backends;
mod bootstrap;
mod buffer;
mod command;
mod commands;
mod device;
mod error;
mod program;
mod program_map;
mod queue;
mod sysmem;

pub use backend::{DispatchBackend, FirmwareImages};
pub use backends::software::{ConsumedCommand, ConsumedTransfer, SoftwareDevice};
pub use buffer::{Buffer, BufferType};
pub use command::DeviceCommand;
pub use commands::EnqueueCommandType;
pub use device::Device;
pub use error::{DispatchError, Result};
pub use program::{
    BinarySpan, CircularBuffer, Kernel, KernelBinary, KernelGroup, LaunchMsg, Program, RiscProcessor, Semaphore,
    SpanView, SubKernel,
};
pub use program_map::{construct_program_map, ProgramMap, TransferInfo};
pub use queue::CommandQueue;
pub use sysmem::{CqWriteInterface, SystemMemoryWriter};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Buffer, BufferType, CommandQueue, Device, DispatchBackend, DispatchError, Kernel, KernelBinary, Program,
        Result, RiscProcessor, SoftwareDevice,
    };
}
