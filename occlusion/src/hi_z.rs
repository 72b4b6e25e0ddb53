//! Depth pyramid used by the hi-z test.
//!
//! Level 0 is the depth buffer the scene was drawn into. Every further level
//! stores the farthest depth of the texels it covers in the level below, so a
//! single lookup bounds the depth of a whole screen region.

use occlusion_types::TextureHandle;

use crate::{
    executor::{dispatch_lanes, CommandExecutor, Kernel, Stage},
    util::math::{mip_count, mip_size},
};

/// A depth texture with a full mip chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DepthPyramid {
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
}

impl DepthPyramid {
    pub fn new(texture: TextureHandle, width: u32, height: u32) -> Self {
        Self {
            texture,
            width,
            height,
            mip_count: mip_count(width, height),
        }
    }

    pub fn level_size(&self, level: u32) -> (u32, u32) {
        (mip_size(self.width, level), mip_size(self.height, level))
    }
}

/// Rebuilds levels `1..mip_count` from level 0, one downsample per level.
pub fn build_mips<E: CommandExecutor + ?Sized>(exec: &mut E, depth: &DepthPyramid) {
    profiling::scope!("build depth mips");

    exec.barrier(Stage::Draw, Stage::DepthPyramid);
    for level in 1..depth.mip_count {
        let (width, height) = depth.level_size(level);
        dispatch_lanes(exec, &Kernel::DepthDownsample { depth, level }, width * height);
        exec.barrier(Stage::DepthPyramid, Stage::DepthPyramid);
    }
    exec.barrier(Stage::DepthPyramid, Stage::Test);
}

#[cfg(test)]
mod test {
    use super::build_mips;
    use crate::cpu::CpuExecutor;

    #[test]
    fn levels_hold_the_farthest_depth() {
        let mut exec = CpuExecutor::new();
        let depth = exec.create_depth_pyramid(5, 3);
        assert_eq!(depth.mip_count, 3);
        assert_eq!(depth.level_size(1), (2, 1));
        assert_eq!(depth.level_size(2), (1, 1));

        #[rustfmt::skip]
        let texels = [
            0.1, 0.2, 0.1, 0.1, 0.3,
            0.1, 0.1, 0.6, 0.1, 0.1,
            0.9, 0.1, 0.1, 0.1, 0.1,
        ];
        exec.upload_depth(&depth, &texels);
        build_mips(&mut exec, &depth);

        // The odd last row and column fold into the last texel of each dimension.
        assert_eq!(exec.depth_level(&depth, 1), &[0.9, 0.6]);
        assert_eq!(exec.depth_level(&depth, 2), &[0.9]);
        assert_eq!(exec.dispatched(), ["depth downsample", "depth downsample"]);
    }
}
