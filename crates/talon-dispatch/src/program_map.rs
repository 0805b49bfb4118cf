//! Program flattening
//!
//! `construct_program_map` turns a [`Program`] into the page-structured
//! form the dispatch firmware streams: a list of partial-write transfer
//! instructions grouped by 2 KiB page, plus one contiguous blob holding
//! binaries, semaphore initial values, and launch messages in emission
//! order. Transfer offsets and blob offsets describe the same byte
//! positions — the firmware uses the former to scatter slices of the
//! latter across the mesh.
//!
//! Host-bound data (runtime arguments, circular-buffer configs) flattens
//! first into its own page stream: it rides the ring on every enqueue,
//! whereas the program pages land in DRAM once and are prefetched from
//! there afterwards.

use crate::device::Device;
use crate::program::{relocate_span_dst, Program};
use talon_chip::cmd::PROGRAM_PAGE_SIZE;
use talon_chip::memmap::{
    dispatch_mode, CIRCULAR_BUFFER_CONFIG_BASE, LAUNCH_MAILBOX_ADDR, SEMAPHORE_ALIGNMENT,
    UINT32_WORDS_PER_CIRCULAR_BUFFER_CONFIG,
};
use talon_chip::noc::{align, multicast_encoding, unicast_encoding, NOC_TRANSFER_ALIGNMENT};
use talon_chip::CoreRangeSet;

/// One partial-write instruction: a slice of a page and its multicast
/// destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferInfo {
    /// Slice length in bytes.
    pub size_bytes: u32,
    /// Destination L1 address.
    pub dst: u32,
    /// Packed multicast rectangle.
    pub dst_noc_multicast_encoding: u32,
    /// Cores covered by the rectangle.
    pub num_receivers: u32,
    /// Final multicast of this logical transfer; the firmware releases
    /// its ordering barrier on it.
    pub last_multicast_in_group: bool,
}

/// The flattened form of one program, cached per program id.
#[derive(Debug, Clone)]
pub struct ProgramMap {
    /// Logical cores the program touches.
    pub num_workers: u32,
    /// Contiguous page blob: binaries, then semaphores, then launch
    /// messages, zero-padded to a whole number of pages.
    pub program_pages: Vec<u32>,
    /// Transfers whose bytes live in the DRAM-resident program pages.
    pub program_page_transfers: Vec<TransferInfo>,
    /// Transfers whose bytes ride the ring on every enqueue.
    pub host_page_transfers: Vec<TransferInfo>,
    /// Per program page, how many transfer instructions fall in it.
    pub num_transfers_in_program_pages: Vec<u32>,
    /// Per host page, how many transfer instructions fall in it.
    pub num_transfers_in_host_data_pages: Vec<u32>,
}

impl ProgramMap {
    /// Host pages sent with every enqueue of this program.
    #[must_use]
    pub fn num_host_data_pages(&self) -> u32 {
        u32::try_from(self.num_transfers_in_host_data_pages.len()).expect("page count exceeds u32")
    }

    /// DRAM-resident program pages.
    #[must_use]
    pub fn num_program_pages(&self) -> u32 {
        u32::try_from(self.num_transfers_in_program_pages.len()).expect("page count exceeds u32")
    }
}

/// Accumulates transfers for one page stream, tracking the per-page
/// instruction counts as the byte cursor advances.
#[derive(Debug, Default)]
struct PageTransfers {
    transfers: Vec<TransferInfo>,
    per_page: Vec<u32>,
    within_page: u32,
}

impl PageTransfers {
    /// Emit one logical transfer of `num_bytes` at `dst`, chunked so no
    /// instruction straddles a page boundary. Returns the advanced cursor;
    /// each chunk is rounded up to the NOC transfer alignment.
    fn update(&mut self, mut src: u32, mut num_bytes: u32, mut dst: u32, multicast: &[(u32, u32)]) -> u32 {
        while num_bytes > 0 {
            let room_in_page = PROGRAM_PAGE_SIZE - (src % PROGRAM_PAGE_SIZE);
            let chunk = room_in_page.min(num_bytes);
            src = align(src + chunk, NOC_TRANSFER_ALIGNMENT);

            for (i, &(encoding, num_receivers)) in multicast.iter().enumerate() {
                self.transfers.push(TransferInfo {
                    size_bytes: chunk,
                    dst,
                    dst_noc_multicast_encoding: encoding,
                    num_receivers,
                    last_multicast_in_group: i == multicast.len() - 1,
                });
                self.within_page += 1;
            }

            dst += chunk;
            num_bytes -= chunk;

            if src % PROGRAM_PAGE_SIZE == 0 {
                self.per_page.push(self.within_page);
                self.within_page = 0;
            }
        }
        src
    }

    /// Close a trailing partial page.
    fn flush(&mut self) {
        if self.within_page > 0 {
            self.per_page.push(self.within_page);
            self.within_page = 0;
        }
    }
}

/// All `(encoding, receiver_count)` pairs for a range set, in emission
/// order, with logical corners translated to physical.
fn dst_noc_multicast_info(device: &Device, ranges: &CoreRangeSet) -> Vec<(u32, u32)> {
    ranges
        .ranges()
        .iter()
        .map(|range| {
            let physical_start = device.worker_core_from_logical_core(range.start);
            let physical_end = device.worker_core_from_logical_core(range.end);
            (multicast_encoding(physical_start, physical_end), range.size())
        })
        .collect()
}

/// Flatten `program` for dispatch on `device`.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn construct_program_map(device: &Device, program: &Program) -> ProgramMap {
    let mut host = PageTransfers::default();
    let mut src: u32 = 0;

    // Runtime args flatten ahead of everything else: host data has the
    // longest pull latency, so it rides the front of the stream.
    for kernel in program.kernels() {
        let dst = kernel.processor().l1_arg_base();
        for (&core, runtime_args) in kernel.runtime_args() {
            let physical_core = device.worker_core_from_logical_core(core);
            let num_bytes = u32::try_from(runtime_args.len() * 4).expect("runtime args exceed u32 bytes");
            // One receiver per set of runtime arguments.
            src = host.update(src, num_bytes, dst, &[(unicast_encoding(physical_core), 1)]);
        }
    }

    for cb in program.circular_buffers() {
        let multicast = dst_noc_multicast_info(device, cb.core_ranges());
        let num_bytes = UINT32_WORDS_PER_CIRCULAR_BUFFER_CONFIG * 4;
        for buffer_index in cb.buffer_indices() {
            let dst = CIRCULAR_BUFFER_CONFIG_BASE + u32::from(buffer_index) * num_bytes;
            src = host.update(src, num_bytes, dst, &multicast);
        }
    }

    // Host pages end here; binaries start a fresh page stream.
    host.flush();
    let mut program_t = PageTransfers::default();
    src = 0;

    for kernel in program.kernels() {
        let multicast = dst_noc_multicast_info(device, kernel.core_ranges());
        let sub_kernels = kernel.processor().sub_kernels();

        for (sub_kernel_index, binary) in kernel.binaries().iter().enumerate() {
            for span in binary.spans() {
                let dst = relocate_span_dst(span.dst_addr, sub_kernels[sub_kernel_index]);
                src = program_t.update(src, span.num_bytes(), dst, &multicast);
            }
        }
    }

    for semaphore in program.semaphores() {
        let multicast = dst_noc_multicast_info(device, semaphore.core_ranges());
        src = program_t.update(src, SEMAPHORE_ALIGNMENT, semaphore.address(), &multicast);
    }

    let mut kernel_groups = program.kernel_groups();
    for group in &mut kernel_groups {
        group.launch_msg.mode = dispatch_mode::DEV;
        let multicast = dst_noc_multicast_info(device, &group.core_ranges);
        src = program_t.update(src, 16, LAUNCH_MAILBOX_ADDR, &multicast);
    }

    program_t.flush();

    // Pack the blob the transfers index into. The word cursor mirrors the
    // byte cursor above: spans round up to the NOC alignment, semaphores
    // and launch messages each occupy one aligned slot.
    let mut program_pages = vec![0u32; (align(src, PROGRAM_PAGE_SIZE) / 4) as usize];
    let mut page_idx: u32 = 0;

    for kernel in program.kernels() {
        for binary in kernel.binaries() {
            for span in binary.spans() {
                for (i, word) in span.words().enumerate() {
                    program_pages[page_idx as usize + i] = word;
                }
                page_idx = align(page_idx + span.num_words(), NOC_TRANSFER_ALIGNMENT / 4);
            }
        }
    }

    for semaphore in program.semaphores() {
        program_pages[page_idx as usize] = semaphore.initial_value();
        page_idx += 4;
    }

    for group in &kernel_groups {
        let words = group.launch_msg.to_words();
        program_pages[page_idx as usize..page_idx as usize + 4].copy_from_slice(&words);
        page_idx += 4;
    }

    ProgramMap {
        num_workers: u32::try_from(program.logical_cores().len()).expect("worker count exceeds u32"),
        program_pages,
        program_page_transfers: program_t.transfers,
        host_page_transfers: host.transfers,
        num_transfers_in_program_pages: program_t.per_page,
        num_transfers_in_host_data_pages: host.per_page,
    }
}
