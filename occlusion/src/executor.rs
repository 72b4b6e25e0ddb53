//! The device the culling system records its work on.
//!
//! The culling system never talks to a graphics API directly. Everything it
//! does is expressed as a [`Kernel`] dispatched over a number of logical
//! lanes, with explicit [`Stage`] barriers between writers and readers,
//! transfers, fences and persistent host mappings.

use std::time::Duration;

use occlusion_types::{BitMode, BufferRange, FenceHandle, MappingHandle, RasterStrategy, Sequence, View};

use crate::{hi_z::DepthPyramid, job::ObjectBuffers, setup::Capabilities, CullError};

/// Kinds of work that read or write buffers, used to describe barriers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Copies and fills.
    Transfer,
    /// Geometry tests writing the visibility output.
    Test,
    /// Bit packing.
    Pack,
    /// Result delivery kernels.
    Deliver,
    /// Scan levels.
    Scan,
    /// Depth pyramid downsampling.
    DepthPyramid,
    /// Indirect draws and token stream execution by the consumer.
    Draw,
    /// Host reads.
    Host,
}

/// A data parallel kernel and its bindings.
///
/// Lane counts are given separately to [`CommandExecutor::dispatch`]; the doc
/// of each variant says what one lane is.
#[derive(Debug, Copy, Clone)]
pub enum Kernel<'a> {
    /// One lane per object. Writes 1 to `output` when the box passes the frustum and screen-size tests, 0 otherwise.
    CullFrustum {
        view: &'a View,
        objects: &'a ObjectBuffers,
        output: BufferRange,
    },
    /// One lane per object. Frustum test followed by a depth pyramid lookup.
    CullHiZ {
        view: &'a View,
        objects: &'a ObjectBuffers,
        output: BufferRange,
        depth: &'a DepthPyramid,
    },
    /// One lane per object. Writes 1 for boxes crossing the near plane without lying
    /// fully outside another plane, and 0 otherwise.
    RasterPrepare {
        view: &'a View,
        objects: &'a ObjectBuffers,
        output: BufferRange,
    },
    /// One lane per object. Rasterizes the box against level 0 of `depth` and
    /// writes 1 for every surviving fragment. Boxes crossing the near plane are skipped.
    RasterBoxes {
        view: &'a View,
        objects: &'a ObjectBuffers,
        output: BufferRange,
        depth: &'a DepthPyramid,
        strategy: RasterStrategy,
    },
    /// One lane per bitset word.
    PackBits {
        mode: BitMode,
        output: BufferRange,
        last: BufferRange,
        current: BufferRange,
    },
    /// One lane per object. Appends the record of every visible object to
    /// `compacted`, positions handed out by incrementing `counter`.
    IndirectCompact {
        bits: BufferRange,
        records: BufferRange,
        compacted: BufferRange,
        counter: BufferRange,
    },
    /// One lane per token. Writes the token's size when it survives and 0 when it does not.
    TokenSizes {
        bits: BufferRange,
        owners: BufferRange,
        sizes: BufferRange,
        effective_sizes: BufferRange,
    },
    /// One lane per token of `sequence`. Copies surviving tokens to their
    /// compacted position and terminates the sequence.
    TokenScatter {
        sequence: Sequence,
        terminator: u32,
        source: BufferRange,
        destination: BufferRange,
        offsets: BufferRange,
        effective_sizes: BufferRange,
        scanned: BufferRange,
    },
    /// [`SCAN_GROUP_LANES`](crate::scan::SCAN_GROUP_LANES) lanes per group.
    /// Inclusive prefix sum of every [`SCAN_BATCH`](crate::scan::SCAN_BATCH) element slice of `input`.
    ScanPrefix {
        elements: u32,
        input: BufferRange,
        output: BufferRange,
    },
    /// [`SCAN_GROUP_LANES`](crate::scan::SCAN_GROUP_LANES) lanes per group of group totals.
    /// Gathers the last value of every group of `input` and scans those
    /// totals, writing a whole number of batches to `offsets`.
    ScanOffsets {
        elements: u32,
        input: BufferRange,
        offsets: BufferRange,
    },
    /// One lane per element. Adds the carry of the preceding groups to every element past the first group.
    ScanCombine {
        elements: u32,
        output: BufferRange,
        offsets: BufferRange,
    },
    /// One lane per texel of `level`. Max-reduces `level - 1` into `level`.
    DepthDownsample { depth: &'a DepthPyramid, level: u32 },
}

impl Kernel<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CullFrustum { .. } => "cull frustum",
            Self::CullHiZ { .. } => "cull hi-z",
            Self::RasterPrepare { .. } => "raster prepare",
            Self::RasterBoxes { .. } => "raster boxes",
            Self::PackBits { .. } => "pack bits",
            Self::IndirectCompact { .. } => "indirect compact",
            Self::TokenSizes { .. } => "token sizes",
            Self::TokenScatter { .. } => "token scatter",
            Self::ScanPrefix { .. } => "scan prefix",
            Self::ScanOffsets { .. } => "scan offsets",
            Self::ScanCombine { .. } => "scan combine",
            Self::DepthDownsample { .. } => "depth downsample",
        }
    }
}

/// The four device primitives the culling system is built on, plus transfers.
pub trait CommandExecutor {
    fn capabilities(&self) -> &Capabilities;

    /// Issues `kernel` over `lanes` logical lanes.
    fn dispatch(&mut self, kernel: &Kernel<'_>, lanes: u32);

    /// Makes every write of `writer` visible to subsequent work of `reader`.
    fn barrier(&mut self, writer: Stage, reader: Stage);

    /// Copies `source.size` bytes. `destination` must be at least as large.
    fn copy_buffer(&mut self, source: BufferRange, destination: BufferRange);

    /// Fills every word of `destination` with `value`.
    fn fill_buffer(&mut self, destination: BufferRange, value: u32);

    /// Creates a fence that signals once all previously issued work completes.
    fn create_fence(&mut self) -> FenceHandle;

    fn delete_fence(&mut self, fence: FenceHandle);

    /// Flushes issued work and blocks until `fence` signals.
    ///
    /// Expiry of `timeout` means the device is lost and is not retryable.
    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> Result<(), CullError>;

    /// Blocking read of `source` into `destination`, stalling until all issued work completes.
    fn read_buffer(&mut self, source: BufferRange, destination: &mut [u32]) -> Result<(), CullError>;

    /// Maps `range` for host reads for as long as the executor lives.
    ///
    /// The mapping observes transfers ([`copy_buffer`](Self::copy_buffer),
    /// [`fill_buffer`](Self::fill_buffer)) into `range` once a fence created
    /// after them was waited on.
    fn map_persistent(&mut self, range: BufferRange) -> Result<MappingHandle, CullError>;

    /// Host view of a persistent mapping. Only meaningful once the fence
    /// guarding the last device write to the range has been waited on.
    fn mapped_words(&mut self, mapping: MappingHandle) -> Result<&[u32], CullError>;
}

/// Dispatches `kernel` unless there is nothing to do.
pub(crate) fn dispatch_lanes<E: CommandExecutor + ?Sized>(exec: &mut E, kernel: &Kernel<'_>, lanes: u32) {
    if lanes == 0 {
        log::trace!("skipping empty {} dispatch", kernel.name());
        return;
    }
    log::trace!("dispatching {} over {} lanes", kernel.name(), lanes);
    exec.dispatch(kernel, lanes);
}
