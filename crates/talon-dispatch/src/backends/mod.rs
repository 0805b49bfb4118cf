//! Dispatch backend implementations
//!
//! One backend ships today:
//! - **Software**: a virtual TL1000 held entirely in host memory. The ring
//!   consumer runs synchronously inside the pointer write, so every queue
//!   operation is observable and deterministic in CI.
//!
//! PCIe transports plug in behind the same [`crate::DispatchBackend`]
//! trait; they live out of tree with the kernel driver.

pub mod software;

pub use software::SoftwareDevice;
