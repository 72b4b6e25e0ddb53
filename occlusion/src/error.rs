use std::time::Duration;

use thiserror::Error;

/// Enum mapping to each device limit the culling kernels depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LimitType {
    StorageBuffersPerShaderStage,
    MaxStorageBufferBindingSize,
    MaxBufferSize,
    MaxComputeWorkgroupStorageSize,
    MaxComputeInvocationsPerWorkgroup,
    MaxComputeWorkgroupsPerDimension,
    MaxTextureDimension2d,
}

/// Reason why an executor could not be created.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("No supported adapter found")]
    MissingAdapter,
    #[error("The device limit of {:?} is {} but culling requires at least {}", ty, device_limit, required_limit)]
    LowDeviceLimit {
        ty: LimitType,
        device_limit: u64,
        required_limit: u64,
    },
    #[error("Device is missing required features: {features}")]
    MissingDeviceFeatures { features: String },
}

/// Runtime failures of the culling system.
///
/// Every variant is unrecoverable for the device it happened on; callers are
/// expected to tear down and recreate rather than retry.
#[derive(Error, Debug)]
pub enum CullError {
    #[error("Fence did not signal within {timeout:?}, assuming the device is lost")]
    FenceTimeout { timeout: Duration },
    #[error("Device was lost")]
    DeviceLost,
    #[error("Fence {idx} is not known to the executor")]
    UnknownFence { idx: usize },
    #[error("Mapping buffer for host access failed: {reason}")]
    Map { reason: String },
    #[error("Shader source {name} is missing")]
    MissingShader { name: &'static str },
    #[error(transparent)]
    Capability(#[from] CapabilityError),
}
