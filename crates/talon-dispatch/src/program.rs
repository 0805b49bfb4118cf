//! Program model
//!
//! A `Program` aggregates everything one launch configures on the mesh:
//! kernels (with their compiled binaries and per-core runtime arguments),
//! circular buffers, and semaphores. Compilation and circular-buffer
//! allocation happen upstream — by the time a program reaches the queue,
//! every binary image and address here is final.

use crate::error::{DispatchError, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use talon_chip::memmap::{
    dispatch_mode, BRISC_L1_ARG_BASE, MEM_BRISC_INIT_LOCAL_L1_BASE, MEM_NCRISC_INIT_IRAM_L1_BASE,
    MEM_NCRISC_INIT_LOCAL_L1_BASE, MEM_TRISC0_INIT_LOCAL_L1_BASE, MEM_TRISC1_INIT_LOCAL_L1_BASE,
    MEM_TRISC2_INIT_LOCAL_L1_BASE, NCRISC_L1_ARG_BASE, TRISC_L1_ARG_BASE,
};
use talon_chip::{CoreCoord, CoreRangeSet};

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(0);

/// Processor class a kernel is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiscProcessor {
    /// Data-movement processor 0.
    Brisc,
    /// Data-movement processor 1.
    Ncrisc,
    /// The compute triple (TRISC0–2); one kernel, three binaries.
    Compute,
}

impl RiscProcessor {
    /// L1 runtime-argument slot for this processor class.
    #[must_use]
    pub const fn l1_arg_base(self) -> u32 {
        match self {
            Self::Brisc => BRISC_L1_ARG_BASE,
            Self::Ncrisc => NCRISC_L1_ARG_BASE,
            Self::Compute => TRISC_L1_ARG_BASE,
        }
    }

    /// Sub-kernels this class expands to, in binary order.
    #[must_use]
    pub const fn sub_kernels(self) -> &'static [SubKernel] {
        match self {
            Self::Brisc => &[SubKernel::Brisc],
            Self::Ncrisc => &[SubKernel::Ncrisc],
            Self::Compute => &[SubKernel::Trisc0, SubKernel::Trisc1, SubKernel::Trisc2],
        }
    }
}

/// One of the five per-core RISC processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubKernel {
    /// Data movement 0.
    Brisc,
    /// Data movement 1.
    Ncrisc,
    /// Compute 0.
    Trisc0,
    /// Compute 1.
    Trisc1,
    /// Compute 2.
    Trisc2,
}

impl SubKernel {
    /// L1 staging base for this processor's local-memory spans.
    #[must_use]
    pub const fn init_local_l1_base(self) -> u32 {
        match self {
            Self::Brisc => MEM_BRISC_INIT_LOCAL_L1_BASE,
            Self::Ncrisc => MEM_NCRISC_INIT_LOCAL_L1_BASE,
            Self::Trisc0 => MEM_TRISC0_INIT_LOCAL_L1_BASE,
            Self::Trisc1 => MEM_TRISC1_INIT_LOCAL_L1_BASE,
            Self::Trisc2 => MEM_TRISC2_INIT_LOCAL_L1_BASE,
        }
    }
}

/// Relocate a span's link-time destination into NOC-reachable L1.
///
/// Spans linked against processor-local memory stage at the sub-kernel's
/// init base; NCRISC IRAM spans stage at the IRAM init base. Everything
/// else is already an L1 address.
#[must_use]
pub fn relocate_span_dst(dst: u64, sub_kernel: SubKernel) -> u32 {
    use talon_chip::memmap::{MEM_LOCAL_BASE, MEM_NCRISC_IRAM_BASE};
    let dst = u32::try_from(dst & 0xFFFF_FFFF).expect("span destination exceeds 32 bits");
    if (dst & MEM_NCRISC_IRAM_BASE) == MEM_NCRISC_IRAM_BASE {
        (dst & !MEM_NCRISC_IRAM_BASE) + MEM_NCRISC_INIT_IRAM_L1_BASE
    } else if (dst & MEM_LOCAL_BASE) == MEM_LOCAL_BASE {
        (dst & !MEM_LOCAL_BASE) + sub_kernel.init_local_l1_base()
    } else {
        dst
    }
}

/// One contiguous region of a compiled image and where it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinarySpan {
    /// Word offset into the image.
    pub word_offset: usize,
    /// Span length in u32 words.
    pub num_words: u32,
    /// Link-time destination address.
    pub dst_addr: u64,
}

/// A compiled kernel image: one flat byte blob plus the spans that
/// scatter it across the address space.
///
/// The image is [`Bytes`], so cloning a program never copies binaries.
#[derive(Debug, Clone)]
pub struct KernelBinary {
    image: Bytes,
    spans: Vec<BinarySpan>,
}

/// A borrowed view of one span: its words and its destination.
#[derive(Debug, Clone, Copy)]
pub struct SpanView<'a> {
    data: &'a [u8],
    /// Link-time destination address.
    pub dst_addr: u64,
}

impl<'a> SpanView<'a> {
    /// Span length in words.
    #[must_use]
    pub fn num_words(&self) -> u32 {
        u32::try_from(self.data.len() / 4).expect("span exceeds u32 words")
    }

    /// Span length in bytes.
    #[must_use]
    pub fn num_bytes(&self) -> u32 {
        self.num_words() * 4
    }

    /// Iterate the span's words.
    pub fn words(&self) -> impl Iterator<Item = u32> + 'a {
        self.data.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }
}

impl KernelBinary {
    /// Build from an image and explicit spans.
    ///
    /// # Errors
    ///
    /// Returns error if the image is not word-sized or a span reaches
    /// outside it.
    pub fn new(image: Bytes, spans: Vec<BinarySpan>) -> Result<Self> {
        if image.len() % 4 != 0 {
            return Err(DispatchError::invalid_kernel(format!(
                "binary image of {} bytes is not word-sized",
                image.len()
            )));
        }
        let image_words = image.len() / 4;
        for span in &spans {
            if span.word_offset + span.num_words as usize > image_words {
                return Err(DispatchError::invalid_kernel(format!(
                    "span at word {} length {} exceeds {image_words} word image",
                    span.word_offset, span.num_words
                )));
            }
        }
        Ok(Self { image, spans })
    }

    /// Build a single-span binary straight from words.
    ///
    /// # Errors
    ///
    /// Never fails in practice; kept fallible to match [`Self::new`].
    pub fn from_words(words: &[u32], dst_addr: u64) -> Result<Self> {
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        let num_words = u32::try_from(words.len()).expect("binary exceeds u32 words");
        Self::new(Bytes::from(bytes), vec![BinarySpan { word_offset: 0, num_words, dst_addr }])
    }

    /// Iterate the binary's spans in link order.
    pub fn spans(&self) -> impl Iterator<Item = SpanView<'_>> {
        self.spans.iter().map(|span| SpanView {
            data: &self.image[span.word_offset * 4..(span.word_offset + span.num_words as usize) * 4],
            dst_addr: span.dst_addr,
        })
    }

    /// Total payload words across all spans.
    #[must_use]
    pub fn num_words(&self) -> u32 {
        self.spans.iter().map(|s| s.num_words).sum()
    }
}

/// A kernel: one processor class, the cores it runs on, its binaries, and
/// per-core runtime arguments.
#[derive(Debug, Clone)]
pub struct Kernel {
    name: String,
    processor: RiscProcessor,
    core_ranges: CoreRangeSet,
    binaries: Vec<KernelBinary>,
    defines: BTreeMap<String, String>,
    runtime_args: BTreeMap<CoreCoord, Vec<u32>>,
}

impl Kernel {
    /// Construct a kernel.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidKernel`] unless the binary count
    /// matches the processor class: one image for data movement, three
    /// (TRISC0–2, in order) for compute.
    pub fn new(
        name: impl Into<String>,
        processor: RiscProcessor,
        core_ranges: CoreRangeSet,
        binaries: Vec<KernelBinary>,
    ) -> Result<Self> {
        let name = name.into();
        let expected = processor.sub_kernels().len();
        if binaries.len() != expected {
            return Err(DispatchError::invalid_kernel(format!(
                "kernel '{name}' on {processor:?} carries {} binaries, expected {expected}",
                binaries.len()
            )));
        }
        Ok(Self {
            name,
            processor,
            core_ranges,
            binaries,
            defines: BTreeMap::new(),
            runtime_args: BTreeMap::new(),
        })
    }

    /// Add a compile-time define (consumed by the firmware build).
    pub fn add_define(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(key.into(), value.into());
    }

    /// Set the runtime arguments for one core.
    pub fn set_runtime_args(&mut self, core: CoreCoord, args: Vec<u32>) {
        self.runtime_args.insert(core, args);
    }

    /// Kernel name (diagnostics only).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Processor class.
    #[must_use]
    pub const fn processor(&self) -> RiscProcessor {
        self.processor
    }

    /// Cores this kernel runs on.
    #[must_use]
    pub const fn core_ranges(&self) -> &CoreRangeSet {
        &self.core_ranges
    }

    /// Binaries in sub-kernel order.
    #[must_use]
    pub fn binaries(&self) -> &[KernelBinary] {
        &self.binaries
    }

    /// Compile-time defines.
    #[must_use]
    pub const fn defines(&self) -> &BTreeMap<String, String> {
        &self.defines
    }

    /// Per-core runtime arguments, in core order.
    #[must_use]
    pub const fn runtime_args(&self) -> &BTreeMap<CoreCoord, Vec<u32>> {
        &self.runtime_args
    }
}

/// A circular buffer: one L1 region shared by up to 32 buffer indices.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    address: u32,
    size_bytes: u32,
    core_ranges: CoreRangeSet,
    num_pages: BTreeMap<u8, u32>,
}

impl CircularBuffer {
    /// Describe an allocated circular buffer. `num_pages` maps each active
    /// buffer index to its page count.
    #[must_use]
    pub fn new(address: u32, size_bytes: u32, core_ranges: CoreRangeSet, num_pages: BTreeMap<u8, u32>) -> Self {
        Self { address, size_bytes, core_ranges, num_pages }
    }

    /// L1 base address.
    #[must_use]
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Region size in bytes.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size_bytes
    }

    /// Cores carrying this buffer.
    #[must_use]
    pub const fn core_ranges(&self) -> &CoreRangeSet {
        &self.core_ranges
    }

    /// Active buffer indices, ascending.
    pub fn buffer_indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.num_pages.keys().copied()
    }

    /// Page count for one buffer index.
    #[must_use]
    pub fn num_pages(&self, buffer_index: u8) -> u32 {
        self.num_pages[&buffer_index]
    }
}

/// A semaphore slot replicated across a set of cores.
#[derive(Debug, Clone)]
pub struct Semaphore {
    address: u32,
    initial_value: u32,
    core_ranges: CoreRangeSet,
}

impl Semaphore {
    /// Describe an allocated semaphore.
    #[must_use]
    pub const fn new(address: u32, initial_value: u32, core_ranges: CoreRangeSet) -> Self {
        Self { address, initial_value, core_ranges }
    }

    /// L1 slot address.
    #[must_use]
    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Value written at configure time.
    #[must_use]
    pub const fn initial_value(&self) -> u32 {
        self.initial_value
    }

    /// Cores carrying this semaphore.
    #[must_use]
    pub const fn core_ranges(&self) -> &CoreRangeSet {
        &self.core_ranges
    }
}

/// The 4-word record that triggers a core to run its configured kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchMsg {
    /// Bitmask of enabled sub-kernels.
    pub enables: u32,
    /// [`dispatch_mode`] value.
    pub mode: u32,
    /// Run sequence number.
    pub run: u32,
}

impl LaunchMsg {
    /// Wire form, padded to the mailbox width.
    #[must_use]
    pub const fn to_words(self) -> [u32; 4] {
        [self.enables, self.mode, self.run, 0]
    }
}

/// Kernels sharing one core-range set share one launch message.
#[derive(Debug, Clone)]
pub struct KernelGroup {
    /// Cores this group launches on.
    pub core_ranges: CoreRangeSet,
    /// The message written to the launch mailbox.
    pub launch_msg: LaunchMsg,
}

/// Everything one launch configures on the mesh.
#[derive(Debug, Clone)]
pub struct Program {
    id: u64,
    kernels: Vec<Kernel>,
    circular_buffers: Vec<CircularBuffer>,
    semaphores: Vec<Semaphore>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Create an empty program with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            kernels: Vec::new(),
            circular_buffers: Vec::new(),
            semaphores: Vec::new(),
        }
    }

    /// Stable id — the queue's cache key.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Add a kernel.
    pub fn add_kernel(&mut self, kernel: Kernel) {
        self.kernels.push(kernel);
    }

    /// Add a circular buffer.
    pub fn add_circular_buffer(&mut self, cb: CircularBuffer) {
        self.circular_buffers.push(cb);
    }

    /// Add a semaphore.
    pub fn add_semaphore(&mut self, semaphore: Semaphore) {
        self.semaphores.push(semaphore);
    }

    /// Kernels in insertion order.
    #[must_use]
    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Mutable kernels, for updating runtime arguments between enqueues.
    pub fn kernels_mut(&mut self) -> &mut [Kernel] {
        &mut self.kernels
    }

    /// Circular buffers in insertion order.
    #[must_use]
    pub fn circular_buffers(&self) -> &[CircularBuffer] {
        &self.circular_buffers
    }

    /// Semaphores in insertion order.
    #[must_use]
    pub fn semaphores(&self) -> &[Semaphore] {
        &self.semaphores
    }

    /// Every logical core referenced by a kernel.
    #[must_use]
    pub fn logical_cores(&self) -> BTreeSet<CoreCoord> {
        self.kernels.iter().flat_map(|k| k.core_ranges().cores()).collect()
    }

    /// Group kernels by identical core-range sets, first-seen order.
    /// Launch messages default to host mode; the dispatch path flips them
    /// to [`dispatch_mode::DEV`] when it flattens the program.
    #[must_use]
    pub fn kernel_groups(&self) -> Vec<KernelGroup> {
        let mut groups: Vec<(CoreRangeSet, u32)> = Vec::new();
        for kernel in &self.kernels {
            let enable_bit = match kernel.processor() {
                RiscProcessor::Brisc => 1 << 0,
                RiscProcessor::Ncrisc => 1 << 1,
                RiscProcessor::Compute => 1 << 2,
            };
            match groups.iter_mut().find(|(ranges, _)| ranges == kernel.core_ranges()) {
                Some((_, enables)) => *enables |= enable_bit,
                None => groups.push((kernel.core_ranges().clone(), enable_bit)),
            }
        }
        groups
            .into_iter()
            .map(|(core_ranges, enables)| KernelGroup {
                core_ranges,
                launch_msg: LaunchMsg { enables, mode: dispatch_mode::HOST, run: 1 },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_chip::memmap::{MEM_LOCAL_BASE, MEM_NCRISC_IRAM_BASE};
    use talon_chip::CoreRange;

    fn range(x0: u32, y0: u32, x1: u32, y1: u32) -> CoreRangeSet {
        CoreRangeSet::single(CoreRange::new(CoreCoord::new(x0, y0), CoreCoord::new(x1, y1)))
    }

    fn words_binary(n: u32, dst: u64) -> KernelBinary {
        let words: Vec<u32> = (0..n).collect();
        KernelBinary::from_words(&words, dst).unwrap()
    }

    #[test]
    fn compute_kernel_requires_three_binaries() {
        let bins = vec![words_binary(4, 0x8000)];
        let err = Kernel::new("mm", RiscProcessor::Compute, range(0, 0, 1, 1), bins);
        assert!(err.is_err());

        let bins = vec![words_binary(4, 0x8000), words_binary(4, 0x9000), words_binary(4, 0xA000)];
        assert!(Kernel::new("mm", RiscProcessor::Compute, range(0, 0, 1, 1), bins).is_ok());
    }

    #[test]
    fn data_movement_kernel_requires_one_binary() {
        let bins = vec![words_binary(4, 0x8000), words_binary(4, 0x9000)];
        assert!(Kernel::new("rd", RiscProcessor::Brisc, range(0, 0, 0, 0), bins).is_err());
    }

    #[test]
    fn span_relocation() {
        assert_eq!(relocate_span_dst(0x8000, SubKernel::Brisc), 0x8000);
        assert_eq!(
            relocate_span_dst(u64::from(MEM_LOCAL_BASE) + 0x40, SubKernel::Trisc1),
            MEM_TRISC1_INIT_LOCAL_L1_BASE + 0x40
        );
        assert_eq!(
            relocate_span_dst(u64::from(MEM_NCRISC_IRAM_BASE) + 0x80, SubKernel::Ncrisc),
            MEM_NCRISC_INIT_IRAM_L1_BASE + 0x80
        );
    }

    #[test]
    fn kernel_groups_merge_by_core_ranges() {
        let mut program = Program::new();
        let r = range(0, 0, 1, 1);
        program.add_kernel(Kernel::new("rd", RiscProcessor::Brisc, r.clone(), vec![words_binary(4, 0x8000)]).unwrap());
        program.add_kernel(Kernel::new("wr", RiscProcessor::Ncrisc, r, vec![words_binary(4, 0x9000)]).unwrap());
        program.add_kernel(
            Kernel::new("mm", RiscProcessor::Compute, range(2, 2, 2, 2), vec![
                words_binary(4, 0x8000),
                words_binary(4, 0x9000),
                words_binary(4, 0xA000),
            ])
            .unwrap(),
        );

        let groups = program.kernel_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].launch_msg.enables, 0b011);
        assert_eq!(groups[1].launch_msg.enables, 0b100);
    }

    #[test]
    fn logical_cores_deduplicate() {
        let mut program = Program::new();
        let r = range(0, 0, 1, 0);
        program.add_kernel(Kernel::new("a", RiscProcessor::Brisc, r.clone(), vec![words_binary(2, 0x8000)]).unwrap());
        program.add_kernel(Kernel::new("b", RiscProcessor::Ncrisc, r, vec![words_binary(2, 0x9000)]).unwrap());
        assert_eq!(program.logical_cores().len(), 2);
    }

    #[test]
    fn program_ids_are_unique() {
        assert_ne!(Program::new().id(), Program::new().id());
    }

    #[test]
    fn span_views_expose_words() {
        let bin = words_binary(6, 0x8000);
        let span = bin.spans().next().unwrap();
        assert_eq!(span.num_words(), 6);
        assert_eq!(span.words().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    }
}
