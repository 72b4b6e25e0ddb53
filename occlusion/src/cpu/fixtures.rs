//! Scene setup shared by the unit tests.

use glam::{Mat4, Vec3};
use occlusion_types::{BoundingBox, DrawIndexedIndirect, JobConfig, MatrixData, View};

use super::CpuExecutor;
use crate::{
    delivery::{IndirectUnordered, ReadbackBlocking, ResultDelivery},
    job::{Job, ObjectBuffers, VisibilityBits},
    util::math::{bit_words, output_lanes},
};

/// Camera at the origin looking down -z, 90 degree vertical field of view.
pub(crate) fn camera(width: f32, height: f32) -> View {
    View {
        view_projection: Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, width / height, 0.1, 100.0),
        view_direction: Vec3::NEG_Z,
        view_position: Vec3::ZERO,
        viewport_width: width,
        viewport_height: height,
        min_pixel_size: 0.0,
    }
}

pub(crate) fn cube(half_extent: f32) -> BoundingBox {
    BoundingBox::new(Vec3::splat(-half_extent), Vec3::splat(half_extent))
}

/// One matrix and one inline box per object, the matrix translating to the object's position.
pub(crate) fn objects(exec: &mut CpuExecutor, positions: &[Vec3], bbox: BoundingBox) -> ObjectBuffers {
    let matrices: Vec<MatrixData> = positions
        .iter()
        .map(|&p| MatrixData::new(Mat4::from_translation(p)))
        .collect();
    let indices: Vec<u32> = (0..positions.len() as u32).collect();
    let boxes = vec![bbox; positions.len()];
    ObjectBuffers {
        matrices: exec.create_buffer_init(&matrices),
        object_matrix: exec.create_buffer_init(&indices),
        object_bbox: exec.create_buffer_init(&boxes),
        bboxes: None,
    }
}

pub(crate) fn job(exec: &mut CpuExecutor, objects: ObjectBuffers, object_count: u32, delivery: ResultDelivery) -> Job {
    let words = bit_words(object_count) as usize;
    let output = exec.create_buffer(output_lanes(object_count) as usize);
    let bits = VisibilityBits::new(exec.create_buffer(words), exec.create_buffer(words));
    let config = JobConfig {
        object_count,
        dual_index: objects.bboxes.is_some(),
        ..JobConfig::default()
    };
    Job::new(config, objects, output, bits, delivery)
}

pub(crate) fn readback(exec: &mut CpuExecutor, object_count: u32) -> ResultDelivery {
    ReadbackBlocking::new(exec.create_buffer(bit_words(object_count) as usize)).into()
}

/// Record `i` draws `i + 1` indices so records can be told apart.
pub(crate) fn records(object_count: u32) -> Vec<DrawIndexedIndirect> {
    (0..object_count)
        .map(|i| DrawIndexedIndirect {
            index_count: i + 1,
            instance_count: 1,
            first_index: i * 36,
            base_vertex: 0,
            first_instance: i,
        })
        .collect()
}

pub(crate) fn indirect(exec: &mut CpuExecutor, object_count: u32) -> ResultDelivery {
    let records = exec.create_buffer_init(&records(object_count));
    let compacted = exec.create_buffer(object_count as usize * 5);
    let counter = exec.create_buffer(1);
    IndirectUnordered::new(records, compacted, counter).into()
}
