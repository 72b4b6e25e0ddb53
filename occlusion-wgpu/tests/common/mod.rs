#![allow(dead_code)]

use std::sync::Arc;

use bytemuck::Pod;
use glam::{Mat4, Vec3};
use occlusion::{
    cpu::CpuExecutor,
    types::{BoundingBox, BufferRange, DrawIndexedIndirect, JobConfig, MatrixData, View},
    util::math::{bit_words, output_lanes},
    CommandExecutor, Job, ObjectBuffers, ResultDelivery, VisibilityBits,
};
use occlusion_wgpu::WgpuExecutor;

pub const OBJECTS: u32 = 1024;
pub const VIEWPORT: u32 = 256;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Executor on the default adapter, `None` when the machine has no usable device.
pub fn device_executor() -> Option<WgpuExecutor> {
    init_logging();

    let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends,
        ..Default::default()
    });
    let adapter = pollster::block_on(wgpu::util::initialize_adapter_from_env_or_default(&instance, None))?;
    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: None,
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
        },
        None,
    ))
    .ok()?;

    match WgpuExecutor::new(&adapter, Arc::new(device), Arc::new(queue)) {
        Ok(exec) => Some(exec),
        Err(err) => {
            log::warn!("adapter cannot run the culling kernels: {err}");
            None
        }
    }
}

/// Buffer creation shared by the device and host executors.
pub trait Allocate: CommandExecutor {
    fn zeroed(&mut self, words: usize) -> BufferRange;
    fn init<T: Pod>(&mut self, data: &[T]) -> BufferRange;
}

impl Allocate for CpuExecutor {
    fn zeroed(&mut self, words: usize) -> BufferRange {
        self.create_buffer(words)
    }

    fn init<T: Pod>(&mut self, data: &[T]) -> BufferRange {
        self.create_buffer_init(data)
    }
}

impl Allocate for WgpuExecutor {
    fn zeroed(&mut self, words: usize) -> BufferRange {
        self.create_buffer(words)
    }

    fn init<T: Pod>(&mut self, data: &[T]) -> BufferRange {
        self.create_buffer_init(data)
    }
}

pub fn read<E: CommandExecutor>(exec: &mut E, range: BufferRange) -> anyhow::Result<Vec<u32>> {
    let mut words = vec![0; range.words() as usize];
    exec.read_buffer(range, &mut words)?;
    Ok(words)
}

pub fn camera() -> View {
    View {
        view_projection: Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0),
        viewport_width: VIEWPORT as f32,
        viewport_height: VIEWPORT as f32,
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

pub fn job<E: Allocate>(exec: &mut E, positions: &[Vec3], delivery: ResultDelivery) -> Job {
    let count = positions.len() as u32;
    let matrices: Vec<MatrixData> = positions
        .iter()
        .map(|&p| MatrixData::new(Mat4::from_translation(p)))
        .collect();
    let indices: Vec<u32> = (0..count).collect();
    let boxes = vec![BoundingBox::new(Vec3::splat(-0.2), Vec3::splat(0.2)); positions.len()];
    let objects = ObjectBuffers {
        matrices: exec.init(&matrices),
        object_matrix: exec.init(&indices),
        object_bbox: exec.init(&boxes),
        bboxes: None,
    };

    let output = exec.zeroed(output_lanes(count) as usize);
    let words = bit_words(count) as usize;
    let bits = VisibilityBits::new(exec.zeroed(words), exec.zeroed(words));
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
