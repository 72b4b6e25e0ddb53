//! [`CommandExecutor`] recording onto a wgpu device.
//!
//! All work is recorded into one command encoder that is submitted whenever
//! the host needs to observe results: on fences, blocking reads and buffer
//! writes. Every host wait polls the device against a deadline.
//! Consumers record their own draws into the same encoder through
//! [`WgpuExecutor::encoder`] so they are ordered with the culling work.

mod depth;
mod kernels;
mod sync;

use std::{sync::Arc, time::Duration};

use bytemuck::Pod;
use occlusion::{
    delivery::TokenBuffers,
    geometry::BOX_TRIANGLES,
    hi_z::DepthPyramid,
    scan::ScanEngine,
    setup::{
        check_limit, Capabilities, REQUIRED_INVOCATIONS_PER_WORKGROUP, REQUIRED_STORAGE_BUFFERS_PER_STAGE,
        REQUIRED_WORKGROUP_STORAGE_SIZE,
    },
    token::{TokenHeaders, TokenStream},
    util::typedefs::FastHashMap,
    CapabilityError, CommandExecutor, CullError, Kernel, LimitType, Stage,
};
use occlusion_types::{BufferHandle, BufferRange, FenceHandle, MappingHandle, RasterStrategy, TextureHandle};
use thiserror::Error;
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    Adapter, Buffer, BufferDescriptor, BufferUsages, CommandEncoder, CommandEncoderDescriptor, Device, DownlevelFlags,
    Queue, SubmissionIndex, TextureView,
};

use self::{depth::DepthTexture, sync::Fence};
use crate::pipelines::Pipelines;

/// Usages of every buffer the executor creates.
pub const CULLING_BUFFER_USAGES: BufferUsages = BufferUsages::from_bits_truncate(
    BufferUsages::STORAGE.bits()
        | BufferUsages::COPY_SRC.bits()
        | BufferUsages::COPY_DST.bits()
        | BufferUsages::INDIRECT.bits(),
);

/// Downlevel capabilities the kernels need.
pub const REQUIRED_DOWNLEVEL_FLAGS: DownlevelFlags = DownlevelFlags::from_bits_truncate(
    DownlevelFlags::COMPUTE_SHADERS.bits()
        | DownlevelFlags::VERTEX_STORAGE.bits()
        | DownlevelFlags::FRAGMENT_WRITABLE_STORAGE.bits()
        | DownlevelFlags::READ_ONLY_DEPTH_STENCIL.bits(),
);

/// Reason why a [`WgpuExecutor`] could not be created.
#[derive(Error, Debug)]
pub enum ExecutorInitializationError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("Creating the culling pipelines failed")]
    Pipelines(#[from] CullError),
}

/// Upper bound of host reads until [`WgpuExecutor::set_host_timeout`] changes it.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(5);

/// Host copy of a persistently mapped range.
///
/// wgpu cannot keep a buffer mapped while the device writes it. Transfers
/// into the range mark it written, the next fence copies it into `staging`,
/// and the host maps `staging` after that fence signalled.
struct Mapping {
    range: BufferRange,
    staging: Buffer,
    /// A transfer wrote the range after the last fence.
    written: bool,
    /// `staging` holds a copy `host` has not seen yet.
    staged: bool,
    host: Vec<u32>,
}

impl Mapping {
    fn overlaps(&self, range: BufferRange) -> bool {
        self.range.buffer == range.buffer
            && range.offset < self.range.offset + self.range.size
            && self.range.offset < range.offset + range.size
    }
}

pub struct WgpuExecutor {
    device: Arc<Device>,
    queue: Arc<Queue>,
    capabilities: Capabilities,
    storage_alignment: u64,
    max_workgroups: u32,
    pipelines: Pipelines,
    box_indices: Buffer,
    buffers: Vec<Buffer>,
    textures: Vec<DepthTexture>,
    mappings: Vec<Mapping>,
    /// Staging of blocking reads, grown on demand.
    readback: Option<Buffer>,
    host_timeout: Duration,
    fences: FastHashMap<usize, Fence>,
    next_fence: usize,
    encoder: Option<CommandEncoder>,
}

impl WgpuExecutor {
    /// Probes `adapter` and `device` and creates every pipeline.
    pub fn new(adapter: &Adapter, device: Arc<Device>, queue: Arc<Queue>) -> Result<Self, ExecutorInitializationError> {
        profiling::scope!("WgpuExecutor::new");

        let limits = device.limits();
        check_limit(
            limits.max_storage_buffers_per_shader_stage,
            REQUIRED_STORAGE_BUFFERS_PER_STAGE,
            LimitType::StorageBuffersPerShaderStage,
        )?;
        check_limit(
            limits.max_compute_workgroup_storage_size,
            REQUIRED_WORKGROUP_STORAGE_SIZE,
            LimitType::MaxComputeWorkgroupStorageSize,
        )?;
        check_limit(
            limits.max_compute_invocations_per_workgroup,
            REQUIRED_INVOCATIONS_PER_WORKGROUP,
            LimitType::MaxComputeInvocationsPerWorkgroup,
        )?;
        let max_workgroups = check_limit(
            limits.max_compute_workgroups_per_dimension,
            1,
            LimitType::MaxComputeWorkgroupsPerDimension,
        )?;

        let downlevel = adapter.get_downlevel_capabilities();
        let missing = REQUIRED_DOWNLEVEL_FLAGS - downlevel.flags;
        if !missing.is_empty() {
            return Err(CapabilityError::MissingDeviceFeatures {
                features: format!("{missing:?}"),
            }
            .into());
        }

        // Geometry and mesh stages are not exposed, boxes are always drawn instanced.
        let capabilities = Capabilities::new(
            [RasterStrategy::Instanced],
            false,
            limits.max_storage_buffer_binding_size as u64,
            max_workgroups,
            TokenHeaders::software(),
        );

        log::debug!(
            "wgpu culling executor: {:?}, storage offset alignment {}, {} workgroups per dimension",
            adapter.get_info().backend,
            limits.min_storage_buffer_offset_alignment,
            max_workgroups
        );

        let pipelines = Pipelines::new(&device)?;
        let box_indices = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("box triangle indices"),
            contents: bytemuck::cast_slice(&BOX_TRIANGLES),
            usage: BufferUsages::INDEX,
        });

        Ok(Self {
            device,
            queue,
            capabilities,
            storage_alignment: limits.min_storage_buffer_offset_alignment as u64,
            max_workgroups,
            pipelines,
            box_indices,
            buffers: Vec::new(),
            textures: Vec::new(),
            mappings: Vec::new(),
            readback: None,
            host_timeout: DEFAULT_HOST_TIMEOUT,
            fences: FastHashMap::default(),
            next_fence: 0,
            encoder: None,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Encoder all culling work is currently recorded into.
    pub fn encoder(&mut self) -> &mut CommandEncoder {
        encoder_of(&self.device, &mut self.encoder)
    }

    /// Bounds every blocking read and mapping access. Expiry is reported as
    /// [`CullError::FenceTimeout`].
    pub fn set_host_timeout(&mut self, timeout: Duration) {
        self.host_timeout = timeout;
    }

    /// Submits everything recorded so far.
    pub fn submit(&mut self) -> SubmissionIndex {
        let command_buffer = self.encoder.take().map(CommandEncoder::finish);
        self.queue.submit(command_buffer)
    }

    /// Takes ownership of `buffer`, which needs at least [`BufferUsages::STORAGE`].
    pub fn import_buffer(&mut self, buffer: Buffer) -> BufferRange {
        let size = buffer.size();
        let handle = BufferHandle::new(self.buffers.len());
        self.buffers.push(buffer);
        BufferRange::whole(handle, size)
    }

    /// Creates a zeroed buffer of `words` u32s.
    pub fn create_buffer(&mut self, words: usize) -> BufferRange {
        let size = words.max(1) as u64 * 4;
        let buffer = self.device.create_buffer(&BufferDescriptor {
            label: Some("culling buffer"),
            size,
            usage: CULLING_BUFFER_USAGES,
            mapped_at_creation: false,
        });
        let range = self.import_buffer(buffer);
        range.slice(0, words as u64 * 4)
    }

    /// Creates a buffer holding `data`, whose total size must be a multiple of 4 bytes.
    pub fn create_buffer_init<T: Pod>(&mut self, data: &[T]) -> BufferRange {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert_eq!(bytes.len() % 4, 0, "buffer contents of {} bytes are not word aligned", bytes.len());
        if bytes.is_empty() {
            return self.create_buffer(0);
        }
        let buffer = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("culling buffer"),
            contents: bytes,
            usage: CULLING_BUFFER_USAGES,
        });
        self.import_buffer(buffer)
    }

    /// Overwrites the start of `range` with `data`, ordered after everything recorded so far.
    pub fn write_buffer<T: Pod>(&mut self, range: BufferRange, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(
            bytes.len() as u64 <= range.size,
            "write of {} bytes into a {} byte range",
            bytes.len(),
            range.size
        );
        // Queue writes land before the next submission, so earlier work has to go first.
        self.submit();
        self.queue.write_buffer(&self.buffers[range.buffer.idx], range.offset, bytes);
    }

    pub fn buffer(&self, handle: BufferHandle) -> &Buffer {
        &self.buffers[handle.idx]
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
        let pyramid = DepthPyramid::new(TextureHandle::new(self.textures.len()), width, height);
        let texture = DepthTexture::new(&self.device, &pyramid);
        texture.clear(encoder_of(&self.device, &mut self.encoder));
        self.textures.push(texture);
        pyramid
    }

    /// Replaces level 0 of `depth`, row major with row 0 at the top.
    pub fn upload_depth(&mut self, depth: &DepthPyramid, texels: &[f32]) {
        assert_eq!(
            texels.len(),
            (depth.width * depth.height) as usize,
            "depth upload does not match the level size"
        );
        let texture = &self.textures[depth.texture.idx];
        texture.upload(
            &self.device,
            &self.pipelines,
            encoder_of(&self.device, &mut self.encoder),
            depth.width,
            texels,
        );
    }

    /// Level 0 of `depth`, for the consumer to draw the scene's depth into.
    pub fn depth_view(&self, depth: &DepthPyramid) -> &TextureView {
        &self.textures[depth.texture.idx].levels[0]
    }

    fn mark_written(&mut self, range: BufferRange) {
        for mapping in self.mappings.iter_mut().filter(|m| m.overlaps(range)) {
            mapping.written = true;
        }
    }

    /// Records a copy of every mapped range written since the last fence into its staging buffer.
    fn stage_mappings(&mut self) {
        if !self.mappings.iter().any(|m| m.written) {
            return;
        }
        let encoder = encoder_of(&self.device, &mut self.encoder);
        for mapping in self.mappings.iter_mut().filter(|m| m.written) {
            mapping.written = false;
            if mapping.range.size == 0 {
                continue;
            }
            encoder.copy_buffer_to_buffer(
                &self.buffers[mapping.range.buffer.idx],
                mapping.range.offset,
                &mapping.staging,
                0,
                mapping.range.size,
            );
            mapping.staged = true;
        }
    }
}

fn encoder_of<'a>(device: &Device, encoder: &'a mut Option<CommandEncoder>) -> &'a mut CommandEncoder {
    encoder.get_or_insert_with(|| {
        device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("culling encoder"),
        })
    })
}

impl CommandExecutor for WgpuExecutor {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn dispatch(&mut self, kernel: &Kernel<'_>, lanes: u32) {
        self.record(kernel, lanes);
    }

    fn barrier(&mut self, writer: Stage, reader: Stage) {
        // wgpu tracks every resource between passes and inserts the barrier itself.
        log::trace!("barrier {:?} -> {:?}", writer, reader);
    }

    fn copy_buffer(&mut self, source: BufferRange, destination: BufferRange) {
        assert!(
            destination.size >= source.size,
            "copy of {} bytes into a {} byte range",
            source.size,
            destination.size
        );
        if source.size == 0 {
            return;
        }
        self.mark_written(destination);
        let encoder = encoder_of(&self.device, &mut self.encoder);
        encoder.copy_buffer_to_buffer(
            &self.buffers[source.buffer.idx],
            source.offset,
            &self.buffers[destination.buffer.idx],
            destination.offset,
            source.size,
        );
    }

    fn fill_buffer(&mut self, destination: BufferRange, value: u32) {
        if destination.size == 0 {
            return;
        }
        self.mark_written(destination);
        if value == 0 {
            let encoder = encoder_of(&self.device, &mut self.encoder);
            encoder.clear_buffer(
                &self.buffers[destination.buffer.idx],
                destination.offset,
                Some(destination.size),
            );
        } else {
            self.fill(destination, value);
        }
    }

    fn create_fence(&mut self) -> FenceHandle {
        self.stage_mappings();
        self.submit();
        let idx = self.next_fence;
        self.next_fence += 1;
        self.fences.insert(idx, Fence::new(&self.queue));
        FenceHandle::new(idx)
    }

    fn delete_fence(&mut self, fence: FenceHandle) {
        self.fences.remove(&fence.idx);
    }

    fn wait_fence(&mut self, fence: FenceHandle, timeout: Duration) -> Result<(), CullError> {
        let pending = self
            .fences
            .get_mut(&fence.idx)
            .ok_or(CullError::UnknownFence { idx: fence.idx })?;
        pending.wait(&self.device, timeout)
    }

    fn read_buffer(&mut self, source: BufferRange, destination: &mut [u32]) -> Result<(), CullError> {
        profiling::scope!("read_buffer");

        if source.size == 0 {
            self.submit();
            return Ok(());
        }
        if self.readback.as_ref().is_some_and(|b| b.size() < source.size) {
            self.readback = None;
        }
        let Self {
            device,
            queue,
            buffers,
            readback,
            encoder,
            host_timeout,
            ..
        } = self;
        let staging = readback.get_or_insert_with(|| {
            device.create_buffer(&BufferDescriptor {
                label: Some("culling readback staging"),
                size: source.size.next_power_of_two(),
                usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        encoder_of(device, encoder).copy_buffer_to_buffer(
            &buffers[source.buffer.idx],
            source.offset,
            staging,
            0,
            source.size,
        );
        queue.submit(encoder.take().map(CommandEncoder::finish));

        let words = sync::map_read(device, staging, source.size, *host_timeout)?;
        destination[..words.len()].copy_from_slice(&words);
        Ok(())
    }

    fn map_persistent(&mut self, range: BufferRange) -> Result<MappingHandle, CullError> {
        if range.buffer.idx >= self.buffers.len() {
            return Err(CullError::Map {
                reason: format!("buffer {} does not exist", range.buffer.idx),
            });
        }
        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("culling mapping staging"),
            size: range.size.max(4),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.mappings.push(Mapping {
            range,
            staging,
            written: false,
            staged: false,
            host: vec![0; range.words() as usize],
        });
        Ok(MappingHandle::new(self.mappings.len() - 1))
    }

    fn mapped_words(&mut self, mapping: MappingHandle) -> Result<&[u32], CullError> {
        let Self {
            device,
            mappings,
            host_timeout,
            ..
        } = self;
        let mapping = mappings.get_mut(mapping.idx).ok_or_else(|| CullError::Map {
            reason: format!("mapping {} does not exist", mapping.idx),
        })?;
        if mapping.staged {
            // The copy was submitted with the fence the caller waited on, nothing has to be flushed.
            mapping.host = sync::map_read(device, &mapping.staging, mapping.range.size, *host_timeout)?;
            mapping.staged = false;
        }
        Ok(&mapping.host)
    }
}
