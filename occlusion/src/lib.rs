//! GPU driven occlusion culling and order preserving stream compaction.
//!
//! Every frame the culling system decides which objects of a scene are
//! visible and hands the result to a consumer without the host touching
//! per-object data. The work is expressed against the [`CommandExecutor`]
//! trait; a device executor lives in `occlusion-wgpu`, and the [`cpu`] module
//! contains a reference executor running every kernel on the host.
//!
//! The stages of a job are:
//!
//! - a geometry test ([`geometry`]) writing one output lane per object,
//! - packing the lanes into a visibility bitset ([`bits`]),
//! - delivering the bitset ([`delivery`]), either by reading it back, by
//!   compacting indirect draw records, or by compacting a token stream
//!   ([`token`]) with the help of a prefix sum ([`scan`]).
//!
//! [`CullingSystem`] strings the stages together and [`TimingScheduler`]
//! schedules them relative to drawing for the supported [`ResultTiming`](types::ResultTiming)s.

pub mod bits;
pub mod cpu;
pub mod culling;
pub mod delivery;
mod error;
pub mod executor;
pub mod frame;
pub mod geometry;
pub mod hi_z;
pub mod job;
pub mod options;
pub mod scan;
pub mod setup;
pub mod token;
pub mod util;

pub use occlusion_types as types;

pub use culling::CullingSystem;
pub use delivery::ResultDelivery;
pub use error::*;
pub use executor::{CommandExecutor, Kernel, Stage};
pub use frame::{DrawPass, SceneDrawer, TimingScheduler};
pub use job::{Job, ObjectBuffers, VisibilityBits};
pub use options::CullingOptions;
pub use scan::ScanEngine;
pub use setup::Capabilities;
