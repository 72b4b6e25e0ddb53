#![allow(dead_code)]

use glam::{Mat4, Vec3};
use occlusion::{
    cpu::CpuExecutor,
    types::{BoundingBox, DrawIndexedIndirect, JobConfig, MatrixData, View},
    util::math::{bit_words, output_lanes},
    Job, ObjectBuffers, ResultDelivery, VisibilityBits,
};

pub const OBJECTS: u32 = 1024;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn camera() -> View {
    View {
        view_projection: Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0),
        viewport_width: 256.0,
        viewport_height: 256.0,
        ..View::default()
    }
}

/// Even objects on a grid in front of the camera, odd ones behind it.
pub fn even_visible_positions(count: u32) -> Vec<Vec3> {
    (0..count)
        .map(|i| {
            let x = (i % 32) as f32 * 0.5 - 8.0;
            let y = (i / 32 % 32) as f32 * 0.5 - 8.0;
            let z = if i % 2 == 0 { -20.0 } else { 20.0 };
            Vec3::new(x, y, z)
        })
        .collect()
}

pub fn objects(exec: &mut CpuExecutor, positions: &[Vec3]) -> ObjectBuffers {
    let matrices: Vec<MatrixData> = positions
        .iter()
        .map(|&p| MatrixData::new(Mat4::from_translation(p)))
        .collect();
    let indices: Vec<u32> = (0..positions.len() as u32).collect();
    let boxes = vec![BoundingBox::new(Vec3::splat(-0.2), Vec3::splat(0.2)); positions.len()];
    ObjectBuffers {
        matrices: exec.create_buffer_init(&matrices),
        object_matrix: exec.create_buffer_init(&indices),
        object_bbox: exec.create_buffer_init(&boxes),
        bboxes: None,
    }
}

pub fn job(exec: &mut CpuExecutor, positions: &[Vec3], delivery: ResultDelivery) -> Job {
    let count = positions.len() as u32;
    let objects = objects(exec, positions);
    let output = exec.create_buffer(output_lanes(count) as usize);
    let words = bit_words(count) as usize;
    let bits = VisibilityBits::new(exec.create_buffer(words), exec.create_buffer(words));
    let config = JobConfig {
        object_count: count,
        ..JobConfig::default()
    };
    Job::new(config, objects, output, bits, delivery)
}

pub fn records(count: u32) -> Vec<DrawIndexedIndirect> {
    (0..count)
        .map(|i| DrawIndexedIndirect {
            index_count: 36,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            first_instance: i,
        })
        .collect()
}

pub fn set_bits(bits: &[u32]) -> Vec<u32> {
    (0..bits.len() as u32 * 32)
        .filter(|&i| bits[i as usize / 32] & (1 << (i % 32)) != 0)
        .collect()
}
