//! Type declarations for the occlusion culling crates.
//!
//! Everything in here is either plain-old-data laid out the way the device
//! kernels read it, or a small enum/config value consumed by the culling
//! system. This is reexported in the `occlusion` crate proper.

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

use bytemuck::{Pod, Zeroable};
/// Reexport of the glam version occlusion is using.
pub use glam;
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Owner value of tokens that belong to no object and always survive compaction.
pub const NO_OWNER: i32 = -1;

/// Non-owning handle to an executor-side resource.
///
/// Handles are plain indices into the executor's own tables; the culling
/// system never allocates or frees the resources behind them.
pub struct Handle<T> {
    /// Underlying value of the handle.
    pub idx: usize,
    _phantom: PhantomData<T>,
}

impl<T> Handle<T> {
    /// Creates a new handle with the given value
    pub const fn new(idx: usize) -> Self {
        Self {
            idx,
            _phantom: PhantomData,
        }
    }
}

// Need Debug/Copy/Clone impls that don't require T: Trait.
impl<T> Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("idx", &self.idx).finish()
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
    }
}

/// Marker for device buffers.
pub enum BufferResource {}
/// Marker for depth textures with a mip chain.
pub enum TextureResource {}
/// Marker for GPU completion fences.
pub enum FenceResource {}
/// Marker for persistent host mappings of a buffer.
pub enum MappingResource {}

pub type BufferHandle = Handle<BufferResource>;
pub type TextureHandle = Handle<TextureResource>;
pub type FenceHandle = Handle<FenceResource>;
pub type MappingHandle = Handle<MappingResource>;

/// A byte range inside of a buffer. All offsets and sizes must be multiples of 4.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferRange {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

impl BufferRange {
    pub fn new(buffer: BufferHandle, offset: u64, size: u64) -> Self {
        debug_assert_eq!(offset % 4, 0, "buffer range offset must be word aligned");
        debug_assert_eq!(size % 4, 0, "buffer range size must be word aligned");
        Self { buffer, offset, size }
    }

    /// Range covering the first `size` bytes of `buffer`.
    pub fn whole(buffer: BufferHandle, size: u64) -> Self {
        Self::new(buffer, 0, size)
    }

    /// Sub-range relative to the start of this range.
    pub fn slice(&self, offset: u64, size: u64) -> Self {
        assert!(
            offset + size <= self.size,
            "sub-range {}..{} is outside of a {} byte range",
            offset,
            offset + size,
            self.size
        );
        Self::new(self.buffer, self.offset + offset, size)
    }

    pub fn word_offset(&self) -> u32 {
        (self.offset / 4) as u32
    }

    pub fn words(&self) -> u32 {
        (self.size / 4) as u32
    }
}

/// Object space bounding box. `w` of both corners is ignored.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec4,
    pub max: Vec4,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.extend(1.0),
            max: max.extend(1.0),
        }
    }

    /// Corner `n` of the box, bit 0/1/2 of `n` selects max for x/y/z.
    pub fn corner(&self, n: u32) -> Vec3 {
        Vec3::new(
            if n & 1 != 0 { self.max.x } else { self.min.x },
            if n & 2 != 0 { self.max.y } else { self.min.y },
            if n & 4 != 0 { self.max.z } else { self.min.z },
        )
    }
}

/// World matrices of one object slot.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MatrixData {
    pub world: Mat4,
    pub world_inverse_transpose: Mat4,
}

impl MatrixData {
    pub fn new(world: Mat4) -> Self {
        Self {
            world,
            world_inverse_transpose: world.inverse().transpose(),
        }
    }
}

/// View the boxes are tested against.
///
/// Clip space follows the `-w..w` convention on all axes and window depth is
/// `(z / w + 1) / 2`, so 0 is the near plane and 1 the far plane.
#[derive(Debug, Copy, Clone, PartialEq, encase::ShaderType, Serialize, Deserialize)]
pub struct View {
    pub view_projection: Mat4,
    pub view_direction: Vec3,
    pub view_position: Vec3,
    pub viewport_width: f32,
    pub viewport_height: f32,
    /// Objects whose projected footprint is smaller than this many pixels are
    /// culled. Zero disables the screen-size cull.
    pub min_pixel_size: f32,
}

impl Default for View {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            view_direction: Vec3::NEG_Z,
            view_position: Vec3::ZERO,
            viewport_width: 1.0,
            viewport_height: 1.0,
            min_pixel_size: 0.0,
        }
    }
}

/// Arguments of an indexed indirect draw, laid out like `wgpu::util::DrawIndexedIndirectArgs`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DrawIndexedIndirect {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

/// A range of a token stream that is compacted and terminated independently.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Sequence {
    pub start_token: u32,
    pub token_count: u32,
    pub start_byte_offset: u32,
    pub end_byte_offset: u32,
}

/// Which geometry test produces the visibility output.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullMethod {
    #[default]
    Frustum,
    HiZ,
    Raster,
}

/// How the packed visibility bits are derived from the raw test output.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitMode {
    /// Visible this pass.
    #[default]
    Current,
    /// Visible this pass and in the last published result.
    CurrentAndLast,
    /// Visible this pass but not in the last published result.
    CurrentAndNotLast,
}

/// When in a frame the visibility result is produced relative to drawing.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultTiming {
    /// Cull before drawing, using this frame's depth.
    #[default]
    RegularCurrent,
    /// Draw with the result of the previous frame, then cull for the next one.
    RegularLastFrame,
    /// Draw last frame's visible set, cull against it, then draw what became visible.
    TemporalCurrent,
}

/// How box geometry is produced for the raster test. Results are identical
/// across strategies.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RasterStrategy {
    /// Pre-triangulated boxes drawn instanced, one instance per object.
    #[default]
    Instanced,
    /// One point per object expanded into face quads by a geometry stage.
    GeometryExpansion,
    /// One meshlet per object emitted by a mesh stage.
    MeshPipeline,
}

/// Per-job configuration surface.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobConfig {
    pub object_count: u32,
    /// Bounding boxes are fetched through a per-object index instead of being
    /// stored inline per object.
    pub dual_index: bool,
    pub raster_strategy: RasterStrategy,
}

#[cfg(test)]
mod test {
    use glam::Vec3;

    use crate::{BoundingBox, BufferHandle, BufferRange, JobConfig, RasterStrategy};

    #[test]
    fn box_corners() {
        let bbox = BoundingBox::new(Vec3::new(-1.0, -2.0, -3.0), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(bbox.corner(0), Vec3::new(-1.0, -2.0, -3.0));
        assert_eq!(bbox.corner(3), Vec3::new(1.0, 2.0, -3.0));
        assert_eq!(bbox.corner(4), Vec3::new(-1.0, -2.0, 3.0));
        assert_eq!(bbox.corner(7), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn range_slicing() {
        let range = BufferRange::new(BufferHandle::new(3), 16, 64);
        let sub = range.slice(8, 16);
        assert_eq!(sub.buffer, BufferHandle::new(3));
        assert_eq!(sub.offset, 24);
        assert_eq!(sub.word_offset(), 6);
        assert_eq!(sub.words(), 4);
    }

    #[test]
    #[should_panic]
    fn range_slicing_out_of_bounds() {
        BufferRange::new(BufferHandle::new(0), 0, 16).slice(8, 12);
    }

    #[test]
    fn job_config_serde() {
        let config = JobConfig {
            object_count: 1024,
            dual_index: true,
            raster_strategy: RasterStrategy::GeometryExpansion,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: JobConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
