use glam::Mat4;
use occlusion_types::{BoundingBox, View};

use super::CpuExecutor;
use crate::{
    geometry::{hi_z_visible, HiZFootprint, ProjectedBox},
    hi_z::DepthPyramid,
    job::ObjectBuffers,
};

const MATRIX_WORDS: usize = std::mem::size_of::<occlusion_types::MatrixData>() / 4;
const BOX_WORDS: usize = std::mem::size_of::<BoundingBox>() / 4;

/// Fetches the per-object data of a job the way the kernels do.
pub(super) struct ObjectReader<'a> {
    matrices: &'a [u32],
    object_matrix: &'a [u32],
    object_bbox: &'a [u32],
    bboxes: Option<&'a [u32]>,
}

impl<'a> ObjectReader<'a> {
    pub fn new(exec: &'a CpuExecutor, objects: &ObjectBuffers) -> Self {
        Self {
            matrices: exec.words(objects.matrices),
            object_matrix: exec.words(objects.object_matrix),
            object_bbox: exec.words(objects.object_bbox),
            bboxes: objects.bboxes.map(|range| exec.words(range)),
        }
    }

    /// Object to clip space matrix of `object`.
    pub fn clip_matrix(&self, view: &View, object: usize) -> Mat4 {
        let matrix = self.object_matrix[object] as usize;
        let words = &self.matrices[matrix * MATRIX_WORDS..matrix * MATRIX_WORDS + 16];
        view.view_projection * Mat4::from_cols_slice(bytemuck::cast_slice(words))
    }

    pub fn bbox(&self, object: usize) -> BoundingBox {
        let (boxes, index) = match self.bboxes {
            Some(bboxes) => (bboxes, self.object_bbox[object] as usize),
            None => (self.object_bbox, object),
        };
        bytemuck::pod_read_unaligned(bytemuck::cast_slice(&boxes[index * BOX_WORDS..(index + 1) * BOX_WORDS]))
    }

    pub fn project(&self, view: &View, object: usize) -> ProjectedBox {
        ProjectedBox::from_box(self.clip_matrix(view, object), &self.bbox(object))
    }
}

pub(super) fn frustum(exec: &CpuExecutor, view: &View, objects: &ObjectBuffers, lanes: u32) -> Vec<u32> {
    let reader = ObjectReader::new(exec, objects);
    (0..lanes as usize)
        .map(|object| reader.project(view, object).frustum_visible(view) as u32)
        .collect()
}

pub(super) fn hi_z(
    exec: &CpuExecutor,
    view: &View,
    objects: &ObjectBuffers,
    depth: &DepthPyramid,
    lanes: u32,
) -> Vec<u32> {
    let reader = ObjectReader::new(exec, objects);
    let texture = exec.texture(depth);
    (0..lanes as usize)
        .map(|object| {
            let projected = reader.project(view, object);
            if !projected.frustum_visible(view) {
                return 0;
            }
            // Without a valid screen footprint nothing can be said about occlusion.
            if projected.behind || projected.crosses_near {
                return 1;
            }
            let footprint = HiZFootprint::new(&projected, depth);
            let (width, _) = depth.level_size(footprint.level);
            let level = &texture.levels[footprint.level as usize];
            let farthest = footprint
                .texels()
                .iter()
                .map(|&[x, y]| level[(y * width + x) as usize])
                .fold(0.0f32, f32::max);
            hi_z_visible(&projected, farthest) as u32
        })
        .collect()
}

pub(super) fn raster_prepare(exec: &CpuExecutor, view: &View, objects: &ObjectBuffers, lanes: u32) -> Vec<u32> {
    let reader = ObjectReader::new(exec, objects);
    (0..lanes as usize)
        .map(|object| {
            let projected = reader.project(view, object);
            (projected.outside == 0 && (projected.behind || projected.crosses_near)) as u32
        })
        .collect()
}
