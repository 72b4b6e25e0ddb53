//! [`CommandExecutor`](occlusion::CommandExecutor) for wgpu devices.
//!
//! Kernels are WGSL compute shaders, except for box rasterization and the
//! depth pyramid passes which run through the raster pipeline. Buffer ranges
//! are bound at the nearest offset the device accepts and the kernels index
//! them from a base word passed in their parameters.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use std::sync::Arc;
//!
//! let instance = wgpu::Instance::default();
//! let adapter = instance
//!     .request_adapter(&wgpu::RequestAdapterOptions::default())
//!     .await
//!     .ok_or(occlusion::CapabilityError::MissingAdapter)?;
//! let (device, queue) = adapter.request_device(&wgpu::DeviceDescriptor::default(), None).await?;
//! let exec = occlusion_wgpu::WgpuExecutor::new(&adapter, Arc::new(device), Arc::new(queue))?;
//! # Ok(())
//! # }
//! ```

mod bind;
mod executor;
mod params;
mod pipelines;
mod shaders;

pub use executor::{
    ExecutorInitializationError, WgpuExecutor, CULLING_BUFFER_USAGES, DEFAULT_HOST_TIMEOUT, REQUIRED_DOWNLEVEL_FLAGS,
};
