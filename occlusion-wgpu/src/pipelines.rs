//! Every pipeline the executor records work with, created once per device.

use occlusion::CullError;
use wgpu::{
    BindGroupLayout, CompareFunction, ComputePipeline, ComputePipelineDescriptor, DepthBiasState, DepthStencilState,
    Device, FragmentState, MultisampleState, PipelineLayout, PipelineLayoutDescriptor, PrimitiveState,
    RenderPipeline, RenderPipelineDescriptor, ShaderModule, ShaderStages, StencilState, TextureFormat, VertexState,
};

use crate::{bind::BindGroupLayoutBuilder, shaders};

pub(crate) const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

pub(crate) struct Pipelines {
    pub objects_bgl: BindGroupLayout,
    pub depth_bgl: BindGroupLayout,
    pub cull_frustum: ComputePipeline,
    pub cull_hi_z: ComputePipeline,
    pub raster_prepare: ComputePipeline,

    pub raster_objects_bgl: BindGroupLayout,
    pub raster_depth_bgl: BindGroupLayout,
    pub raster_boxes: RenderPipeline,

    pub pack_bgl: BindGroupLayout,
    pub pack_bits: ComputePipeline,
    pub indirect_bgl: BindGroupLayout,
    pub indirect_compact: ComputePipeline,
    pub token_sizes_bgl: BindGroupLayout,
    pub token_sizes: ComputePipeline,
    pub token_scatter_bgl: BindGroupLayout,
    pub token_scatter: ComputePipeline,

    pub scan_bgl: BindGroupLayout,
    pub scan_prefix: ComputePipeline,
    pub scan_offsets: ComputePipeline,
    pub scan_combine: ComputePipeline,

    pub fill_bgl: BindGroupLayout,
    pub fill: ComputePipeline,

    pub downsample_bgl: BindGroupLayout,
    pub downsample: RenderPipeline,
    pub upload_bgl: BindGroupLayout,
    pub upload: RenderPipeline,
}

impl Pipelines {
    pub fn new(device: &Device) -> Result<Self, CullError> {
        profiling::scope!("creating culling pipelines");

        let c = ShaderStages::COMPUTE;
        let v = ShaderStages::VERTEX;
        let f = ShaderStages::FRAGMENT;

        let objects_bgl = BindGroupLayoutBuilder::new()
            .uniform(c)
            .storage(c, true)
            .storage(c, true)
            .storage(c, true)
            .storage(c, true)
            .storage(c, false)
            .build(device, Some("cull objects bgl"));
        let depth_bgl = BindGroupLayoutBuilder::new()
            .depth_texture(c)
            .build(device, Some("cull depth bgl"));

        let cull = shaders::module(device, "cull sm", &["common.wgsl", "objects.wgsl", "cull.wgsl"])?;
        let objects_pll = pipeline_layout(device, "cull objects pll", &[&objects_bgl]);
        let depth_pll = pipeline_layout(device, "cull depth pll", &[&objects_bgl, &depth_bgl]);
        let cull_frustum = compute(device, "cull frustum", &objects_pll, &cull, "cs_frustum");
        let cull_hi_z = compute(device, "cull hi-z", &depth_pll, &cull, "cs_hi_z");
        let raster_prepare = compute(device, "raster prepare", &objects_pll, &cull, "cs_raster_prepare");

        let raster_objects_bgl = BindGroupLayoutBuilder::new()
            .uniform(v | f)
            .storage(v, true)
            .storage(v, true)
            .storage(v, true)
            .storage(v, true)
            .storage(f, false)
            .build(device, Some("raster objects bgl"));
        let raster_depth_bgl = BindGroupLayoutBuilder::new()
            .depth_texture(f)
            .build(device, Some("raster depth bgl"));
        let raster = shaders::module(device, "raster sm", &["common.wgsl", "objects.wgsl", "raster.wgsl"])?;
        let raster_pll = pipeline_layout(device, "raster pll", &[&raster_objects_bgl, &raster_depth_bgl]);
        // Depth is tested by hand against the bound level, the attachment is read only.
        let raster_boxes = depth_pass(device, "raster boxes", &raster_pll, &raster, "fs_main", false);

        let storage_bgl = |count: usize, label: &str| {
            BindGroupLayoutBuilder::new()
                .uniform(c)
                .storages(c, count)
                .build(device, Some(label))
        };

        let pack_bgl = storage_bgl(3, "pack bits bgl");
        let pack = shaders::module(device, "pack bits sm", &["common.wgsl", "bits.wgsl"])?;
        let pack_bits = compute(
            device,
            "pack bits",
            &pipeline_layout(device, "pack bits pll", &[&pack_bgl]),
            &pack,
            "cs_main",
        );

        let indirect_bgl = storage_bgl(4, "indirect compact bgl");
        let indirect = shaders::module(device, "indirect compact sm", &["common.wgsl", "indirect.wgsl"])?;
        let indirect_compact = compute(
            device,
            "indirect compact",
            &pipeline_layout(device, "indirect compact pll", &[&indirect_bgl]),
            &indirect,
            "cs_main",
        );

        let token_sizes_bgl = storage_bgl(4, "token sizes bgl");
        let sizes = shaders::module(device, "token sizes sm", &["common.wgsl", "token_sizes.wgsl"])?;
        let token_sizes = compute(
            device,
            "token sizes",
            &pipeline_layout(device, "token sizes pll", &[&token_sizes_bgl]),
            &sizes,
            "cs_main",
        );

        let token_scatter_bgl = storage_bgl(5, "token scatter bgl");
        let scatter = shaders::module(device, "token scatter sm", &["common.wgsl", "token_scatter.wgsl"])?;
        let token_scatter = compute(
            device,
            "token scatter",
            &pipeline_layout(device, "token scatter pll", &[&token_scatter_bgl]),
            &scatter,
            "cs_main",
        );

        let scan_bgl = storage_bgl(2, "scan bgl");
        let scan = shaders::module(device, "scan sm", &["common.wgsl", "scan.wgsl"])?;
        let scan_pll = pipeline_layout(device, "scan pll", &[&scan_bgl]);
        let scan_prefix = compute(device, "scan prefix", &scan_pll, &scan, "cs_prefix");
        let scan_offsets = compute(device, "scan offsets", &scan_pll, &scan, "cs_offsets");
        let scan_combine = compute(device, "scan combine", &scan_pll, &scan, "cs_combine");

        let fill_bgl = storage_bgl(1, "fill bgl");
        let fill_sm = shaders::module(device, "fill sm", &["common.wgsl", "fill.wgsl"])?;
        let fill = compute(
            device,
            "fill",
            &pipeline_layout(device, "fill pll", &[&fill_bgl]),
            &fill_sm,
            "cs_main",
        );

        let downsample_bgl = BindGroupLayoutBuilder::new()
            .depth_texture(f)
            .build(device, Some("depth downsample bgl"));
        let hi_z = shaders::module(device, "depth downsample sm", &["fullscreen.wgsl", "hi_z.wgsl"])?;
        let downsample = depth_pass(
            device,
            "depth downsample",
            &pipeline_layout(device, "depth downsample pll", &[&downsample_bgl]),
            &hi_z,
            "fs_downsample",
            true,
        );

        let upload_bgl = BindGroupLayoutBuilder::new()
            .uniform(f)
            .storage(f, true)
            .build(device, Some("depth upload bgl"));
        let upload_sm = shaders::module(device, "depth upload sm", &["fullscreen.wgsl", "depth_upload.wgsl"])?;
        let upload = depth_pass(
            device,
            "depth upload",
            &pipeline_layout(device, "depth upload pll", &[&upload_bgl]),
            &upload_sm,
            "fs_upload",
            true,
        );

        Ok(Self {
            objects_bgl,
            depth_bgl,
            cull_frustum,
            cull_hi_z,
            raster_prepare,
            raster_objects_bgl,
            raster_depth_bgl,
            raster_boxes,
            pack_bgl,
            pack_bits,
            indirect_bgl,
            indirect_compact,
            token_sizes_bgl,
            token_sizes,
            token_scatter_bgl,
            token_scatter,
            scan_bgl,
            scan_prefix,
            scan_offsets,
            scan_combine,
            fill_bgl,
            fill,
            downsample_bgl,
            downsample,
            upload_bgl,
            upload,
        })
    }
}

fn pipeline_layout(device: &Device, label: &str, bind_group_layouts: &[&BindGroupLayout]) -> PipelineLayout {
    device.create_pipeline_layout(&PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    })
}

fn compute(
    device: &Device,
    label: &str,
    layout: &PipelineLayout,
    module: &ShaderModule,
    entry_point: &str,
) -> ComputePipeline {
    device.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point,
    })
}

/// A pipeline drawing into a depth attachment only, with the depth test always passing.
fn depth_pass(
    device: &Device,
    label: &str,
    layout: &PipelineLayout,
    module: &ShaderModule,
    fragment_entry_point: &str,
    depth_write_enabled: bool,
) -> RenderPipeline {
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: VertexState {
            module,
            entry_point: "vs_main",
            buffers: &[],
        },
        primitive: PrimitiveState::default(),
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled,
            depth_compare: CompareFunction::Always,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: MultisampleState::default(),
        fragment: Some(FragmentState {
            module,
            entry_point: fragment_entry_point,
            targets: &[],
        }),
        multiview: None,
    })
}
