//! Edge function rasterizer for the box test.
//!
//! Matches what the device pipeline does for a box drawn with depth test
//! `LessEqual`, a small negative depth bias and no depth writes: coverage is
//! sampled at pixel centers and a box is visible as soon as one of its
//! fragments passes.

use glam::{Vec3, Vec4Swizzles};
use occlusion_types::View;

use super::{cull::ObjectReader, CpuExecutor};
use crate::{
    geometry::{clip_corners, window_depth, ProjectedBox, BOX_TRIANGLES},
    hi_z::DepthPyramid,
    job::ObjectBuffers,
};

/// Depth subtracted from every fragment before the depth test, pulling the
/// box slightly towards the viewer so coplanar occluders do not hide it.
pub const RASTER_DEPTH_BIAS: f32 = 1.0 / 65536.0;

/// Objects with at least one passing fragment.
pub(super) fn boxes(
    exec: &CpuExecutor,
    view: &View,
    objects: &ObjectBuffers,
    depth: &DepthPyramid,
    lanes: u32,
) -> Vec<u32> {
    let reader = ObjectReader::new(exec, objects);
    let target = DepthTarget {
        texels: &exec.texture(depth).levels[0],
        width: depth.width,
        height: depth.height,
    };

    (0..lanes)
        .filter(|&object| {
            let corners = clip_corners(reader.clip_matrix(view, object as usize), &reader.bbox(object as usize));
            let projected = ProjectedBox::new(&corners);
            // Handled by the prepare pass.
            if projected.behind || projected.crosses_near {
                return false;
            }
            let screen = corners.map(|clip| target.to_screen(clip.xyz() / clip.w));
            BOX_TRIANGLES.chunks_exact(3).any(|tri| {
                target.any_fragment_passes(screen[tri[0] as usize], screen[tri[1] as usize], screen[tri[2] as usize])
            })
        })
        .collect()
}

struct DepthTarget<'a> {
    texels: &'a [f32],
    width: u32,
    height: u32,
}

impl DepthTarget<'_> {
    /// Pixel position with row 0 at the top, and window depth.
    fn to_screen(&self, ndc: Vec3) -> Vec3 {
        Vec3::new(
            (ndc.x * 0.5 + 0.5) * self.width as f32,
            (0.5 - ndc.y * 0.5) * self.height as f32,
            window_depth(ndc.z),
        )
    }

    fn any_fragment_passes(&self, a: Vec3, b: Vec3, c: Vec3) -> bool {
        let area = edge(a, b, c);
        if area == 0.0 {
            return false;
        }

        let min = a.min(b).min(c);
        let max = a.max(b).max(c);
        let x0 = min.x.floor().max(0.0) as u32;
        let y0 = min.y.floor().max(0.0) as u32;
        let x1 = (max.x.ceil().max(0.0) as u32).min(self.width);
        let y1 = (max.y.ceil().max(0.0) as u32).min(self.height);

        for y in y0..y1 {
            for x in x0..x1 {
                let p = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0);
                let wa = edge(b, c, p) / area;
                let wb = edge(c, a, p) / area;
                let wc = edge(a, b, p) / area;
                if wa < 0.0 || wb < 0.0 || wc < 0.0 {
                    continue;
                }
                let depth = wa * a.z + wb * b.z + wc * c.z;
                if !(0.0..=1.0).contains(&depth) {
                    continue;
                }
                if depth - RASTER_DEPTH_BIAS <= self.texels[(y * self.width + x) as usize] {
                    return true;
                }
            }
        }
        false
    }
}

fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}
