//! Per-object visibility tests.
//!
//! The math in here is what every executor's kernels implement. Clip space
//! uses the `-w..w` convention on all axes.

use glam::{Mat4, Vec2, Vec3, Vec3Swizzles, Vec4, Vec4Swizzles};
use occlusion_types::{BoundingBox, CullMethod, View};

use crate::{
    executor::{dispatch_lanes, CommandExecutor, Kernel, Stage},
    hi_z::DepthPyramid,
    job::Job,
    util::math::mip_size,
};

pub const CULL_LEFT: u32 = 1;
pub const CULL_RIGHT: u32 = 2;
pub const CULL_BOTTOM: u32 = 4;
pub const CULL_TOP: u32 = 8;
pub const CULL_NEAR: u32 = 16;
pub const CULL_FAR: u32 = 32;
pub const CULL_BEHIND: u32 = 64;

/// Half-spaces a clip space position lies outside of.
pub fn cull_bits(clip: Vec4) -> u32 {
    let mut bits = 0;
    if clip.x < -clip.w {
        bits |= CULL_LEFT;
    }
    if clip.x > clip.w {
        bits |= CULL_RIGHT;
    }
    if clip.y < -clip.w {
        bits |= CULL_BOTTOM;
    }
    if clip.y > clip.w {
        bits |= CULL_TOP;
    }
    if clip.z < -clip.w {
        bits |= CULL_NEAR;
    }
    if clip.z > clip.w {
        bits |= CULL_FAR;
    }
    if clip.w <= 0.0 {
        bits |= CULL_BEHIND;
    }
    bits
}

/// Corner indices of the 12 triangles of a box, corners as in [`BoundingBox::corner`].
pub const BOX_TRIANGLES: [u32; 36] = [
    0, 2, 6, 0, 6, 4, // -x
    1, 3, 7, 1, 7, 5, // +x
    0, 1, 5, 0, 5, 4, // -y
    2, 3, 7, 2, 7, 6, // +y
    0, 1, 3, 0, 3, 2, // -z
    4, 5, 7, 4, 7, 6, // +z
];

/// Window depth of a normalized device z.
pub fn window_depth(ndc_z: f32) -> f32 {
    ndc_z * 0.5 + 0.5
}

/// Clip space corners of `bbox` under `matrix`, corner `n` as in [`BoundingBox::corner`].
pub fn clip_corners(matrix: Mat4, bbox: &BoundingBox) -> [Vec4; 8] {
    std::array::from_fn(|n| matrix * bbox.corner(n as u32).extend(1.0))
}

/// Screen space extent of a projected box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectedBox {
    /// AND of the cull bits of all corners. Nonzero means fully outside one plane.
    pub outside: u32,
    /// Some corner lies on or behind the eye plane; `min`/`max` are meaningless then.
    pub behind: bool,
    /// Some corner lies in front of the near plane.
    pub crosses_near: bool,
    pub min: Vec3,
    pub max: Vec3,
}

impl ProjectedBox {
    pub fn new(corners: &[Vec4; 8]) -> Self {
        let mut outside = !0;
        let mut behind = false;
        let mut crosses_near = false;
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(-f32::MAX);
        for clip in corners {
            let bits = cull_bits(*clip);
            outside &= bits;
            behind |= bits & CULL_BEHIND != 0;
            crosses_near |= bits & CULL_NEAR != 0;
            if clip.w > 0.0 {
                let ndc = clip.xyz() / clip.w;
                min = min.min(ndc);
                max = max.max(ndc);
            }
        }
        Self {
            outside,
            behind,
            crosses_near,
            min,
            max,
        }
    }

    pub fn from_box(matrix: Mat4, bbox: &BoundingBox) -> Self {
        Self::new(&clip_corners(matrix, bbox))
    }

    /// Footprint is below the view's pixel threshold.
    ///
    /// Compares the larger of the footprint's pixel width and height against
    /// the threshold. A threshold of 0 never culls.
    pub fn pixel_culled(&self, view: &View) -> bool {
        if view.min_pixel_size <= 0.0 {
            return false;
        }
        let dim = (self.max.xy() - self.min.xy()) * 0.5 * Vec2::new(view.viewport_width, view.viewport_height);
        dim.x.max(dim.y) < view.min_pixel_size
    }

    pub fn frustum_visible(&self, view: &View) -> bool {
        if self.outside != 0 {
            return false;
        }
        self.behind || !self.pixel_culled(view)
    }
}

/// Depth pyramid lookup of a projected box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HiZFootprint {
    pub level: u32,
    /// Texel coordinates at `level`, row 0 at the top of the screen.
    pub texel_min: [u32; 2],
    pub texel_max: [u32; 2],
}

impl HiZFootprint {
    pub fn new(projected: &ProjectedBox, depth: &DepthPyramid) -> Self {
        let uv_min = (projected.min.xy() * 0.5 + 0.5).clamp(Vec2::ZERO, Vec2::ONE);
        let uv_max = (projected.max.xy() * 0.5 + 0.5).clamp(Vec2::ZERO, Vec2::ONE);
        let size = uv_max - uv_min;
        let max_size = size.x.max(size.y) * depth.width.max(depth.height) as f32;
        let level = max_size.max(1.0).log2().ceil() as u32;
        let level = level.min(depth.mip_count.saturating_sub(1));

        let width = mip_size(depth.width, level);
        let height = mip_size(depth.height, level);
        let texel = |u: f32, v: f32| {
            let x = ((u * width as f32) as u32).min(width - 1);
            let y = (((1.0 - v) * height as f32) as u32).min(height - 1);
            [x, y]
        };
        let top_left = texel(uv_min.x, uv_max.y);
        let bottom_right = texel(uv_max.x, uv_min.y);
        Self {
            level,
            texel_min: top_left,
            texel_max: bottom_right,
        }
    }

    /// The four texels to sample.
    pub fn texels(&self) -> [[u32; 2]; 4] {
        [
            self.texel_min,
            [self.texel_max[0], self.texel_min[1]],
            [self.texel_min[0], self.texel_max[1]],
            self.texel_max,
        ]
    }
}

/// Hi-z visibility given the farthest depth sampled over the footprint.
pub fn hi_z_visible(projected: &ProjectedBox, sampled_max_depth: f32) -> bool {
    window_depth(projected.min.z) <= sampled_max_depth
}

/// Records the geometry test `method` of `job` into its output lanes.
///
/// Raster and hi-z need `job.depth`. Ends with a barrier so the output can be packed.
pub fn record<E: CommandExecutor + ?Sized>(exec: &mut E, method: CullMethod, job: &Job, view: &View) {
    profiling::scope!("geometry test");

    let count = job.object_count();
    let objects = &job.objects;
    let output = job.output_range();

    // Lanes past the object count must read as invisible when packing.
    if output.words() > count {
        exec.fill_buffer(output.slice(count as u64 * 4, (output.words() - count) as u64 * 4), 0);
        exec.barrier(Stage::Transfer, Stage::Test);
    }

    match method {
        CullMethod::Frustum => {
            dispatch_lanes(exec, &Kernel::CullFrustum { view, objects, output }, count);
        }
        CullMethod::HiZ => {
            let depth = job.depth.as_ref().expect("hi-z culling needs a depth pyramid");
            dispatch_lanes(
                exec,
                &Kernel::CullHiZ {
                    view,
                    objects,
                    output,
                    depth,
                },
                count,
            );
        }
        CullMethod::Raster => {
            let depth = job.depth.as_ref().expect("raster culling needs a depth buffer");
            let strategy = exec.capabilities().raster_strategy(job.config.raster_strategy);
            dispatch_lanes(exec, &Kernel::RasterPrepare { view, objects, output }, count);
            exec.barrier(Stage::Test, Stage::Test);
            dispatch_lanes(
                exec,
                &Kernel::RasterBoxes {
                    view,
                    objects,
                    output,
                    depth,
                    strategy,
                },
                count,
            );
        }
    }
    exec.barrier(Stage::Test, Stage::Pack);
}
