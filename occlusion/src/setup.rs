//! Capability probing.
//!
//! Every executor builds one [`Capabilities`] value when it is created. It is
//! handed out by reference afterwards and never changes for the lifetime of
//! the executor.

use arrayvec::ArrayVec;
use occlusion_types::RasterStrategy;

use crate::{token::TokenHeaders, CapabilityError, LimitType};

/// Largest number of storage buffers any culling kernel binds at once.
pub const REQUIRED_STORAGE_BUFFERS_PER_STAGE: u32 = 7;
/// Workgroup memory used by the scan kernels.
pub const REQUIRED_WORKGROUP_STORAGE_SIZE: u32 = 4096;
/// Invocations per workgroup used by every compute kernel.
pub const REQUIRED_INVOCATIONS_PER_WORKGROUP: u32 = 256;

/// Immutable description of what an executor can do.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Raster strategies the executor implements, `Instanced` is always present.
    pub raster_strategies: ArrayVec<RasterStrategy, 3>,
    /// Persistent mappings are real rather than emulated through a staging copy.
    pub native_persistent_mapping: bool,
    pub max_storage_buffer_binding_size: u64,
    pub max_workgroups_per_dimension: u32,
    pub token_headers: TokenHeaders,
}

impl Capabilities {
    pub fn new(
        raster_strategies: impl IntoIterator<Item = RasterStrategy>,
        native_persistent_mapping: bool,
        max_storage_buffer_binding_size: u64,
        max_workgroups_per_dimension: u32,
        token_headers: TokenHeaders,
    ) -> Self {
        let mut strategies = ArrayVec::new();
        strategies.push(RasterStrategy::Instanced);
        for strategy in raster_strategies {
            if !strategies.contains(&strategy) {
                strategies.push(strategy);
            }
        }
        log::debug!(
            "probed culling capabilities: raster {:?}, native persistent mapping {}",
            strategies,
            native_persistent_mapping
        );
        Self {
            raster_strategies: strategies,
            native_persistent_mapping,
            max_storage_buffer_binding_size,
            max_workgroups_per_dimension,
            token_headers,
        }
    }

    /// Checks that a range of `size` bytes can be bound as one storage buffer.
    pub fn check_binding(&self, size: u64) -> Result<(), CapabilityError> {
        check_limit(
            self.max_storage_buffer_binding_size,
            size,
            LimitType::MaxStorageBufferBindingSize,
        )
        .map(drop)
    }

    pub fn supports_raster(&self, strategy: RasterStrategy) -> bool {
        self.raster_strategies.contains(&strategy)
    }

    /// Strategy to actually use for a requested one. Falls back to instanced
    /// boxes, which every executor supports and which yields the same result.
    pub fn raster_strategy(&self, requested: RasterStrategy) -> RasterStrategy {
        if self.supports_raster(requested) {
            requested
        } else {
            log::warn!(
                "raster strategy {:?} is not supported by this executor, using {:?}",
                requested,
                RasterStrategy::Instanced
            );
            RasterStrategy::Instanced
        }
    }
}

/// Checks that a device limit is at least the required value, returning the device's value.
pub fn check_limit<T>(device_limit: T, required_limit: T, ty: LimitType) -> Result<T, CapabilityError>
where
    T: Copy + PartialOrd + Into<u64>,
{
    if device_limit < required_limit {
        Err(CapabilityError::LowDeviceLimit {
            ty,
            device_limit: device_limit.into(),
            required_limit: required_limit.into(),
        })
    } else {
        Ok(device_limit)
    }
}
