use occlusion::hi_z::DepthPyramid;
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BufferUsages, CommandEncoder, Device, Extent3d, LoadOp, Operations, RenderPass, RenderPassDepthStencilAttachment,
    RenderPassDescriptor, StoreOp, Texture, TextureDescriptor, TextureDimension, TextureUsages, TextureView,
    TextureViewDescriptor,
};

use crate::{
    bind::BindGroupBuilder,
    params::{uniform_bytes, UploadParams},
    pipelines::{Pipelines, DEPTH_FORMAT},
};

/// Device side of a [`DepthPyramid`].
pub(super) struct DepthTexture {
    _texture: Texture,
    /// Every level, for the hi-z lookup.
    pub all_levels: TextureView,
    /// One view per level, for rendering into and reading single levels.
    pub levels: Vec<TextureView>,
}

impl DepthTexture {
    pub fn new(device: &Device, pyramid: &DepthPyramid) -> Self {
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("depth pyramid"),
            size: Extent3d {
                width: pyramid.width,
                height: pyramid.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: pyramid.mip_count,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        let all_levels = texture.create_view(&TextureViewDescriptor {
            label: Some("depth pyramid levels"),
            ..TextureViewDescriptor::default()
        });
        let levels = (0..pyramid.mip_count)
            .map(|level| {
                texture.create_view(&TextureViewDescriptor {
                    label: Some(&format!("depth pyramid level {level}")),
                    base_mip_level: level,
                    mip_level_count: Some(1),
                    ..TextureViewDescriptor::default()
                })
            })
            .collect();

        Self {
            _texture: texture,
            all_levels,
            levels,
        }
    }

    /// Clears every level to the far plane.
    pub fn clear(&self, encoder: &mut CommandEncoder) {
        for view in &self.levels {
            drop(depth_pass(encoder, "depth pyramid clear", view));
        }
    }

    /// Max-reduces `level - 1` into `level`.
    pub fn downsample(&self, device: &Device, pipelines: &Pipelines, encoder: &mut CommandEncoder, level: u32) {
        let source = &self.levels[level as usize - 1];
        let bg = BindGroupBuilder::new().append_texture_view(source).build(
            device,
            Some("depth downsample bg"),
            &pipelines.downsample_bgl,
        );

        let mut rpass = depth_pass(encoder, "depth downsample", &self.levels[level as usize]);
        rpass.set_pipeline(&pipelines.downsample);
        rpass.set_bind_group(0, &bg, &[]);
        rpass.draw(0..3, 0..1);
    }

    /// Replaces level 0 with `texels`, row major with row 0 at the top.
    pub fn upload(&self, device: &Device, pipelines: &Pipelines, encoder: &mut CommandEncoder, width: u32, texels: &[f32]) {
        let uniform = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("depth upload params"),
            contents: &uniform_bytes(&UploadParams { width }),
            usage: BufferUsages::UNIFORM,
        });
        let source = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("depth upload texels"),
            contents: bytemuck::cast_slice(texels),
            usage: BufferUsages::STORAGE,
        });
        let bg = BindGroupBuilder::new()
            .append_buffer(&uniform)
            .append_buffer(&source)
            .build(device, Some("depth upload bg"), &pipelines.upload_bgl);

        let mut rpass = depth_pass(encoder, "depth upload", &self.levels[0]);
        rpass.set_pipeline(&pipelines.upload);
        rpass.set_bind_group(0, &bg, &[]);
        rpass.draw(0..3, 0..1);
    }
}

fn depth_pass<'a>(encoder: &'a mut CommandEncoder, label: &str, view: &'a TextureView) -> RenderPass<'a> {
    encoder.begin_render_pass(&RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(Operations {
                load: LoadOp::Clear(1.0),
                store: StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
