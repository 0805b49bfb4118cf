//! Error types for dispatch operations

use crate::buffer::BufferType;
use thiserror::Error;

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur while enqueueing work
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Enqueue targeted a buffer the dispatcher cannot address
    #[error("Cannot write to a {buffer_type:?} buffer; only DRAM and L1 are dispatchable")]
    InvalidBufferType {
        /// Type of the offending buffer
        buffer_type: BufferType,
    },

    /// A single command does not fit in the ring even after a wrap
    #[error("Command of {size} bytes exceeds ring capacity of {capacity} bytes")]
    CommandTooLarge {
        /// Bytes the command would occupy
        size: u32,
        /// Usable ring bytes (ring size minus prologue)
        capacity: u32,
    },

    /// Source data is larger than the destination buffer
    #[error("Attempting to write {src_bytes} bytes to a {buffer_bytes} byte buffer")]
    SourceTooLarge {
        /// Bytes supplied by the caller
        src_bytes: u32,
        /// Capacity of the destination buffer
        buffer_bytes: u32,
    },

    /// Buffer pages must stream through the dispatch data section
    #[error("Buffer page of {page_size} bytes exceeds the {limit} byte dispatch data section")]
    PageTooLarge {
        /// Page size of the offending buffer
        page_size: u32,
        /// L1 bytes available to the data section
        limit: u32,
    },

    /// A padded page does not fit in the consumer staging buffer
    #[error("Padded page of {padded_page_size} bytes is too large for the {consumer_cb_size} byte consumer buffer")]
    PageExceedsConsumerBuffer {
        /// Page size after 32-byte padding
        padded_page_size: u32,
        /// Consumer staging-buffer size chosen for the command
        consumer_cb_size: u32,
    },

    /// The device command's buffer-transfer table is full
    #[error("Device command already carries {max} buffer transfers")]
    TransferTableFull {
        /// Table capacity
        max: u32,
    },

    /// A kernel violates a construction invariant
    #[error("Invalid kernel: {reason}")]
    InvalidKernel {
        /// What was violated
        reason: String,
    },

    /// Buffer geometry is inconsistent
    #[error("Invalid buffer: {reason}")]
    InvalidBuffer {
        /// What was violated
        reason: String,
    },

    /// The backend failed to move data
    #[error("Driver error: {reason}")]
    Driver {
        /// Reason for failure
        reason: String,
    },
}

impl DispatchError {
    /// Create a driver error
    pub fn driver(reason: impl Into<String>) -> Self {
        Self::Driver { reason: reason.into() }
    }

    /// Create an invalid-kernel error
    pub fn invalid_kernel(reason: impl Into<String>) -> Self {
        Self::InvalidKernel { reason: reason.into() }
    }

    /// Create an invalid-buffer error
    pub fn invalid_buffer(reason: impl Into<String>) -> Self {
        Self::InvalidBuffer { reason: reason.into() }
    }
}
