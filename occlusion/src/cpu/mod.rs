//! Reference [`CommandExecutor`] running every kernel on the host.
//!
//! Kernels execute immediately and serially, lane by lane, with the same
//! per-lane rules the device kernels follow. Every buffer access is bounds
//! checked against the bound range, so a kernel touching memory outside of
//! its bindings panics instead of corrupting a neighbouring range.

mod cull;
mod depth;
#[cfg(test)]
pub(crate) mod fixtures;
mod kernels;
mod raster;

use std::time::Duration;

use bytemuck::Pod;
use occlusion_types::{BufferHandle, BufferRange, FenceHandle, MappingHandle, RasterStrategy, TextureHandle};

use crate::{
    delivery::TokenBuffers,
    executor::{CommandExecutor, Kernel, Stage},
    hi_z::DepthPyramid,
    scan::ScanEngine,
    setup::Capabilities,
    token::{TokenHeaders, TokenStream},
    util::typedefs::FastHashMap,
    CullError,
};

pub use raster::RASTER_DEPTH_BIAS;

/// What the executor was asked to do, in order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuCommand {
    Dispatch { kernel: &'static str, lanes: u32 },
    Barrier { writer: Stage, reader: Stage },
    Copy { bytes: u64 },
    Fill { bytes: u64, value: u32 },
    Fence,
}

/// A depth texture with all of its levels, row 0 at the top.
#[derive(Debug, Clone)]
struct CpuTexture {
    width: u32,
    height: u32,
    levels: Vec<Vec<f32>>,
}

/// Host executor backed by plain vectors.
#[derive(Debug)]
pub struct CpuExecutor {
    capabilities: Capabilities,
    buffers: Vec<Vec<u32>>,
    textures: Vec<CpuTexture>,
    mappings: Vec<BufferRange>,
    fences: FastHashMap<usize, u64>,
    next_fence: usize,
    trace: Vec<CpuCommand>,
    device_lost: bool,
}

impl Default for CpuExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuExecutor {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::new(
            [RasterStrategy::Instanced, RasterStrategy::GeometryExpansion],
            true,
            u64::MAX,
            u32::MAX,
            TokenHeaders::software(),
        ))
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            buffers: Vec::new(),
            textures: Vec::new(),
            mappings: Vec::new(),
            fences: FastHashMap::default(),
            next_fence: 0,
            trace: Vec::new(),
            device_lost: false,
        }
    }

    /// Creates a zeroed buffer of `words` u32s.
    pub fn create_buffer(&mut self, words: usize) -> BufferRange {
        let handle = BufferHandle::new(self.buffers.len());
        self.buffers.push(vec![0; words]);
        BufferRange::whole(handle, words as u64 * 4)
    }

    /// Creates a buffer holding `data`, whose total size must be a multiple of 4 bytes.
    pub fn create_buffer_init<T: Pod>(&mut self, data: &[T]) -> BufferRange {
        let bytes = std::mem::size_of_val(data);
        assert_eq!(bytes % 4, 0, "buffer contents of {bytes} bytes are not word aligned");
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(data);
        let handle = BufferHandle::new(self.buffers.len());
        self.buffers.push(words);
        BufferRange::whole(handle, bytes as u64)
    }

    /// Overwrites the start of `range` with `data`.
    pub fn write_buffer<T: Pod>(&mut self, range: BufferRange, data: &[T]) {
        let words: Vec<u32> = bytemuck::pod_collect_to_vec(data);
        self.words_mut(range)[..words.len()].copy_from_slice(&words);
    }

    /// Host view of `range`.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie inside of its buffer.
    pub fn words(&self, range: BufferRange) -> &[u32] {
        let buffer = &self.buffers[range.buffer.idx];
        &buffer[Self::word_span(buffer.len(), range)]
    }

    pub fn words_mut(&mut self, range: BufferRange) -> &mut [u32] {
        let buffer = &mut self.buffers[range.buffer.idx];
        let span = Self::word_span(buffer.len(), range);
        &mut buffer[span]
    }

    /// Contents of `range` reinterpreted as `T`s.
    pub fn read<T: Pod>(&self, range: BufferRange) -> Vec<T> {
        bytemuck::pod_collect_to_vec(self.words(range))
    }

    fn word_span(len: usize, range: BufferRange) -> std::ops::Range<usize> {
        let start = range.word_offset() as usize;
        let end = start + range.words() as usize;
        assert!(
            end <= len,
            "range of words {start}..{end} is out of bounds of a {len} word buffer"
        );
        start..end
    }

    /// Uploads `stream` and allocates everything its compaction needs.
    pub fn upload_token_stream(&mut self, stream: &TokenStream) -> TokenBuffers {
        let padded = stream.padded_token_count() as usize;
        let offset_words = ScanEngine::offset_size(padded as u32) as usize / 4;
        TokenBuffers {
            source: self.create_buffer_init(&stream.words),
            destination: self.create_buffer(stream.words.len()),
            sizes: self.create_buffer_init(&stream.sizes),
            offsets: self.create_buffer_init(&stream.offsets),
            owners: self.create_buffer_init(&stream.owners),
            effective_sizes: self.create_buffer(padded),
            scanned: self.create_buffer(padded),
            scan_offsets: self.create_buffer(offset_words),
        }
    }

    /// Creates a depth pyramid whose every level is cleared to the far plane.
    pub fn create_depth_pyramid(&mut self, width: u32, height: u32) -> DepthPyramid {
        assert!(width > 0 && height > 0, "depth pyramid must not be empty");
        let handle = TextureHandle::new(self.textures.len());
        let pyramid = DepthPyramid::new(handle, width, height);
        let levels = (0..pyramid.mip_count)
            .map(|level| {
                let (w, h) = pyramid.level_size(level);
                vec![1.0; (w * h) as usize]
            })
            .collect();
        self.textures.push(CpuTexture { width, height, levels });
        pyramid
    }

    /// Replaces level 0 of `depth`, row major with row 0 at the top.
    pub fn upload_depth(&mut self, depth: &DepthPyramid, texels: &[f32]) {
        let level = &mut self.texture_mut(depth).levels[0];
        assert_eq!(level.len(), texels.len(), "depth upload does not match the level size");
        level.copy_from_slice(texels);
    }

    pub fn depth_level(&self, depth: &DepthPyramid, level: u32) -> &[f32] {
        &self.texture(depth).levels[level as usize]
    }

    fn texture(&self, depth: &DepthPyramid) -> &CpuTexture {
        let texture = &self.textures[depth.texture.idx];
        debug_assert_eq!((texture.width, texture.height), (depth.width, depth.height));
        texture
    }

    fn texture_mut(&mut self, depth: &DepthPyramid) -> &mut CpuTexture {
        &mut self.textures[depth.texture.idx]
    }

    pub fn trace(&self) -> &[CpuCommand] {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// Names of the kernels dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<&'static str> {
        self.trace
            .iter()
            .filter_map(|c| match c {
                CpuCommand::Dispatch { kernel, .. } => Some(*kernel),
                _ => None,
            })
            .collect()
    }

    /// Fences created and not yet deleted.
    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    /// Makes every following fence wait fail as if the device had hung.
    pub fn lose_device(&mut self) {
        log::debug!("cpu executor marked as lost");
        self.device_lost = true;
    }
}

impl CommandExecutor for CpuExecutor {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn dispatch(&mut self, kernel: &Kernel<'_>, lanes: u32) {
        self.trace.push(CpuCommand::Dispatch {
            kernel: kernel.name(),
            lanes,
        });
        self.run(kernel, lanes);
    }

    fn barrier(&mut self, writer: Stage, reader: Stage) {
        // Kernels run to completion immediately, there is nothing to wait for.
        self.trace.push(CpuCommand::Barrier { writer, reader });
    }

    fn copy_buffer(&mut self, source: BufferRange, destination: BufferRange) {
        assert!(
            destination.size >= source.size,
            "copy of {} bytes into a {} byte range",
            source.size,
            destination.size
        );
        self.trace.push(CpuCommand::Copy { bytes: source.size });
        let data = self.words(source).to_vec();
        self.words_mut(destination)[..data.len()].copy_from_slice(&data);
    }

    fn fill_buffer(&mut self, destination: BufferRange, value: u32) {
        self.trace.push(CpuCommand::Fill {
            bytes: destination.size,
            value,
        });
        self.words_mut(destination).fill(value);
    }

    fn create_fence(&mut self) -> FenceHandle {
        let idx = self.next_fence;
        self.next_fence += 1;
        self.fences.insert(idx, self.trace.len() as u64);
        self.trace.push(CpuCommand::Fence);
        FenceHandle::new(idx)
    }

    fn delete_fence(&mut self, fence: FenceHandle) {
        self.fences.remove(&fence.idx);
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> Result<(), CullError> {
        if !self.fences.contains_key(&fence.idx) {
            return Err(CullError::UnknownFence { idx: fence.idx });
        }
        if self.device_lost {
            return Err(CullError::FenceTimeout { timeout });
        }
        Ok(())
    }

    fn read_buffer(&mut self, source: BufferRange, destination: &mut [u32]) -> Result<(), CullError> {
        if self.device_lost {
            return Err(CullError::DeviceLost);
        }
        let words = self.words(source);
        destination[..words.len()].copy_from_slice(words);
        Ok(())
    }

    fn map_persistent(&mut self, range: BufferRange) -> Result<MappingHandle, CullError> {
        if range.buffer.idx >= self.buffers.len() {
            return Err(CullError::Map {
                reason: format!("buffer {} does not exist", range.buffer.idx),
            });
        }
        self.mappings.push(range);
        Ok(MappingHandle::new(self.mappings.len() - 1))
    }

    fn mapped_words(&mut self, mapping: MappingHandle) -> Result<&[u32], CullError> {
        let range = *self.mappings.get(mapping.idx).ok_or_else(|| CullError::Map {
            reason: format!("mapping {} does not exist", mapping.idx),
        })?;
        Ok(self.words(range))
    }
}
