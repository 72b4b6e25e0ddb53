//! Helpers shared by the culling passes and executors.

pub mod math;
pub mod typedefs;
