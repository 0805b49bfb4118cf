//! Device-resident buffers
//!
//! A `Buffer` is plain geometry: where a region lives, how big it is, and
//! the page granularity the dispatcher streams it in. Allocation happens
//! on the [`Device`](crate::Device); the queue's program cache
//! owns the buffers it creates.

use crate::error::{DispatchError, Result};

/// Address spaces a buffer can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BufferType {
    /// On-device DRAM.
    Dram = 0,
    /// Worker-core L1 SRAM.
    L1 = 1,
    /// The pinned host region (command ring).
    SystemMemory = 2,
}

impl BufferType {
    /// Wire encoding used in buffer-transfer entries.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a wire value.
    #[must_use]
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Dram),
            1 => Some(Self::L1),
            2 => Some(Self::SystemMemory),
            _ => None,
        }
    }
}

/// A paged region of device memory.
#[derive(Debug, Clone)]
pub struct Buffer {
    address: u32,
    size_bytes: u32,
    page_size_bytes: u32,
    buffer_type: BufferType,
}

impl Buffer {
    /// Describe a region. `size_bytes` must be a whole number of pages.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidBuffer`] on inconsistent geometry.
    pub fn new(address: u32, size_bytes: u32, page_size_bytes: u32, buffer_type: BufferType) -> Result<Self> {
        if page_size_bytes == 0 || size_bytes % page_size_bytes != 0 {
            return Err(DispatchError::invalid_buffer(format!(
                "size {size_bytes} is not a whole number of {page_size_bytes} byte pages"
            )));
        }
        Ok(Self { address, size_bytes, page_size_bytes, buffer_type })
    }

    /// Base address within the buffer's address space.
    #[must_use]
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Total bytes.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size_bytes
    }

    /// Bytes per page.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size_bytes
    }

    /// Page count.
    #[must_use]
    pub const fn num_pages(&self) -> u32 {
        self.size_bytes / self.page_size_bytes
    }

    /// Address space.
    #[must_use]
    pub const fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }
}
