// SPDX-License-Identifier: AGPL-3.0-only

//! Dispatch-firmware bootstrap
//!
//! Before the first queue can push anything, the two reserved dispatch
//! cores must be running the producer/consumer firmware that drains the
//! ring. This module does the one-time bring-up over the slow path: ring
//! pointers first, then the firmware program written core by core through
//! `write_device_l1`, then the launch messages. Every later configuration
//! of the device flows through the ring this pair serves.

use crate::device::Device;
use crate::error::Result;
use crate::program::{relocate_span_dst, Kernel, KernelBinary, Program, RiscProcessor};
use talon_chip::cq::{CQ_READ_PTR, CQ_READ_TOGGLE, CQ_START, CQ_WRITE_PTR, CQ_WRITE_TOGGLE};
use talon_chip::memmap::{LAUNCH_MAILBOX_ADDR, SEMAPHORE_BASE};
use talon_chip::{CoreCoord, CoreRange, CoreRangeSet};
use tracing::{debug, info};

/// L1 address dispatch firmware text loads at.
const DISPATCH_FIRMWARE_TEXT_BASE: u64 = 0x8000;

/// Producer-side pages-free semaphore starts at 2 (double buffer).
const PRODUCER_SEMAPHORE_INITIAL: u32 = 2;
/// Consumer-side pages-ready semaphore starts empty.
const CONSUMER_SEMAPHORE_INITIAL: u32 = 0;

/// Bring up the dispatch pair on `device`. Called once per device, by the
/// first queue constructed on it.
pub(crate) fn launch_dispatch_firmware(device: &Device) -> Result<()> {
    // Ring pointers: both cursors at the first command slot, toggles clear.
    let mut pointers = vec![0u32; (CQ_START / 4) as usize];
    pointers[0] = CQ_START >> 4;
    device.write_host_region(&pointers, 0, 0)?;

    let [producer_logical, consumer_logical] = device.dispatch_cores();
    let producer_physical = device.worker_core_from_logical_core(producer_logical);
    let consumer_physical = device.worker_core_from_logical_core(consumer_logical);

    device.write_device_l1(producer_physical, CQ_READ_PTR, &[CQ_START >> 4])?;
    device.write_device_l1(producer_physical, CQ_WRITE_PTR, &[CQ_START >> 4])?;
    device.write_device_l1(producer_physical, CQ_READ_TOGGLE, &[0])?;
    device.write_device_l1(producer_physical, CQ_WRITE_TOGGLE, &[0])?;

    let dispatch_program = build_dispatch_program(device, producer_logical, consumer_logical)?;
    configure_with_program(device, &dispatch_program)?;

    // Trigger both cores. Bootstrap launches are host-mode: the dispatcher
    // cannot launch itself.
    for group in dispatch_program.kernel_groups() {
        let words = group.launch_msg.to_words();
        for core in group.core_ranges.cores() {
            let physical = device.worker_core_from_logical_core(core);
            device.write_device_l1(physical, LAUNCH_MAILBOX_ADDR, &words)?;
        }
    }

    info!("✅ dispatch firmware launched: producer {producer_physical}, consumer {consumer_physical}");
    Ok(())
}

/// The one-off program holding the producer/consumer kernels and their
/// handshake semaphores. Each kernel learns its peer's physical NOC
/// coordinates through defines.
fn build_dispatch_program(device: &Device, producer: CoreCoord, consumer: CoreCoord) -> Result<Program> {
    let firmware = device.dispatch_firmware()?;
    let producer_physical = device.worker_core_from_logical_core(producer);
    let consumer_physical = device.worker_core_from_logical_core(consumer);

    let producer_binary = single_span_binary(firmware.producer)?;
    let consumer_binary = single_span_binary(firmware.consumer)?;

    let mut producer_kernel = Kernel::new(
        "command_queue_producer",
        RiscProcessor::Brisc,
        CoreRangeSet::single(CoreRange::single(producer)),
        vec![producer_binary],
    )?;
    producer_kernel.add_define("IS_DISPATCH_KERNEL", "");
    producer_kernel.add_define("CONSUMER_NOC_X", consumer_physical.x.to_string());
    producer_kernel.add_define("CONSUMER_NOC_Y", consumer_physical.y.to_string());

    let mut consumer_kernel = Kernel::new(
        "command_queue_consumer",
        RiscProcessor::Brisc,
        CoreRangeSet::single(CoreRange::single(consumer)),
        vec![consumer_binary],
    )?;
    consumer_kernel.add_define("PRODUCER_NOC_X", producer_physical.x.to_string());
    consumer_kernel.add_define("PRODUCER_NOC_Y", producer_physical.y.to_string());

    let mut program = Program::new();
    program.add_kernel(producer_kernel);
    program.add_kernel(consumer_kernel);
    program.add_semaphore(crate::program::Semaphore::new(
        SEMAPHORE_BASE,
        PRODUCER_SEMAPHORE_INITIAL,
        CoreRangeSet::single(CoreRange::single(producer)),
    ));
    program.add_semaphore(crate::program::Semaphore::new(
        SEMAPHORE_BASE,
        CONSUMER_SEMAPHORE_INITIAL,
        CoreRangeSet::single(CoreRange::single(consumer)),
    ));
    Ok(program)
}

fn single_span_binary(image: bytes::Bytes) -> Result<KernelBinary> {
    let num_words = u32::try_from(image.len() / 4).expect("firmware image exceeds u32 words");
    KernelBinary::new(
        image,
        vec![crate::program::BinarySpan { word_offset: 0, num_words, dst_addr: DISPATCH_FIRMWARE_TEXT_BASE }],
    )
}

/// Slow-path configuration: write binaries and semaphore values straight
/// into each target core's L1. Only bootstrap uses this — user programs
/// go through the ring.
fn configure_with_program(device: &Device, program: &Program) -> Result<()> {
    for kernel in program.kernels() {
        let sub_kernels = kernel.processor().sub_kernels();
        for (sub_kernel_index, binary) in kernel.binaries().iter().enumerate() {
            for span in binary.spans() {
                let dst = relocate_span_dst(span.dst_addr, sub_kernels[sub_kernel_index]);
                let words: Vec<u32> = span.words().collect();
                for core in kernel.core_ranges().cores() {
                    let physical = device.worker_core_from_logical_core(core);
                    device.write_device_l1(physical, dst, &words)?;
                }
                debug!("configured {} span: {} words at {dst:#x}", kernel.name(), span.num_words());
            }
        }
    }

    for semaphore in program.semaphores() {
        for core in semaphore.core_ranges().cores() {
            let physical = device.worker_core_from_logical_core(core);
            device.write_device_l1(physical, semaphore.address(), &[semaphore.initial_value()])?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareDevice;

    #[test]
    fn bootstrap_initializes_pointers_and_launches() {
        let sim = SoftwareDevice::new();
        let device = Device::new(0, CoreCoord::new(8, 8), Box::new(sim.clone()));
        launch_dispatch_firmware(&device).unwrap();

        // Host prologue: rd at the first slot.
        assert_eq!(sim.host_word(0), CQ_START >> 4);

        let producer = device.worker_core_from_logical_core(device.dispatch_cores()[0]);
        assert_eq!(sim.core_l1_word(producer, CQ_READ_PTR), CQ_START >> 4);
        assert_eq!(sim.core_l1_word(producer, CQ_WRITE_PTR), CQ_START >> 4);
        assert_eq!(sim.core_l1_word(producer, CQ_WRITE_TOGGLE), 0);

        // Both dispatch cores got firmware text and a launch message.
        let consumer = device.worker_core_from_logical_core(device.dispatch_cores()[1]);
        assert_ne!(sim.core_l1_word(producer, DISPATCH_FIRMWARE_TEXT_BASE as u32), 0);
        assert_ne!(sim.core_l1_word(consumer, DISPATCH_FIRMWARE_TEXT_BASE as u32), 0);
        assert_ne!(sim.core_l1_word(producer, LAUNCH_MAILBOX_ADDR), 0);
        assert_ne!(sim.core_l1_word(consumer, LAUNCH_MAILBOX_ADDR), 0);

        // Handshake semaphores: producer side double-buffered, consumer empty.
        assert_eq!(sim.core_l1_word(producer, SEMAPHORE_BASE), 2);
        assert_eq!(sim.core_l1_word(consumer, SEMAPHORE_BASE), 0);
    }
}
