use occlusion::{
    executor::Kernel, hi_z::DepthPyramid, job::ObjectBuffers, scan::SCAN_GROUP_LANES, util::math::round_up_div,
};
use occlusion_types::{BufferRange, RasterStrategy, View};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BindGroupLayout, Buffer, BufferUsages, ComputePassDescriptor, ComputePipeline, IndexFormat, RenderPassDepthStencilAttachment,
    RenderPassDescriptor,
};

use super::{encoder_of, WgpuExecutor};
use crate::{
    bind::{aligned_window, BindGroupBuilder, RangeBinding},
    params::{
        uniform_bytes, CullParams, FillParams, IndirectParams, PackParams, ScanParams, TokenScatterParams,
        TokenSizeParams,
    },
    pipelines::Pipelines,
};

/// Invocations per workgroup of the one-lane-per-invocation kernels.
const LANE_WORKGROUP: u32 = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ComputeKernel {
    CullFrustum,
    CullHiZ,
    RasterPrepare,
    PackBits,
    IndirectCompact,
    TokenSizes,
    TokenScatter,
    ScanPrefix,
    ScanOffsets,
    ScanCombine,
    Fill,
}

impl Pipelines {
    fn compute_kernel(&self, kernel: ComputeKernel) -> (&ComputePipeline, &BindGroupLayout) {
        match kernel {
            ComputeKernel::CullFrustum => (&self.cull_frustum, &self.objects_bgl),
            ComputeKernel::CullHiZ => (&self.cull_hi_z, &self.objects_bgl),
            ComputeKernel::RasterPrepare => (&self.raster_prepare, &self.objects_bgl),
            ComputeKernel::PackBits => (&self.pack_bits, &self.pack_bgl),
            ComputeKernel::IndirectCompact => (&self.indirect_compact, &self.indirect_bgl),
            ComputeKernel::TokenSizes => (&self.token_sizes, &self.token_sizes_bgl),
            ComputeKernel::TokenScatter => (&self.token_scatter, &self.token_scatter_bgl),
            ComputeKernel::ScanPrefix => (&self.scan_prefix, &self.scan_bgl),
            ComputeKernel::ScanOffsets => (&self.scan_offsets, &self.scan_bgl),
            ComputeKernel::ScanCombine => (&self.scan_combine, &self.scan_bgl),
            ComputeKernel::Fill => (&self.fill, &self.fill_bgl),
        }
    }
}

/// Two dimensional dispatch of `groups` workgroups, spilling into y past `max_per_dimension`.
pub(crate) fn spill(groups: u32, max_per_dimension: u32) -> [u32; 2] {
    if groups <= max_per_dimension {
        [groups, 1]
    } else {
        [max_per_dimension, round_up_div(groups, max_per_dimension)]
    }
}

impl WgpuExecutor {
    pub(super) fn record(&mut self, kernel: &Kernel<'_>, lanes: u32) {
        profiling::scope!("record kernel");

        let name = kernel.name();
        let lane_groups = spill(round_up_div(lanes, LANE_WORKGROUP), self.max_workgroups);
        let scan_groups = spill(round_up_div(lanes, SCAN_GROUP_LANES), self.max_workgroups);

        match *kernel {
            Kernel::CullFrustum { view, objects, output } => {
                let (params, ranges) = self.cull_params(view, objects, output, None, lanes);
                self.run_compute(ComputeKernel::CullFrustum, name, &params, &ranges, None, lane_groups);
            }
            Kernel::CullHiZ {
                view,
                objects,
                output,
                depth,
            } => {
                let (params, ranges) = self.cull_params(view, objects, output, Some(depth), lanes);
                self.run_compute(ComputeKernel::CullHiZ, name, &params, &ranges, Some(depth), lane_groups);
            }
            Kernel::RasterPrepare { view, objects, output } => {
                let (params, ranges) = self.cull_params(view, objects, output, None, lanes);
                self.run_compute(ComputeKernel::RasterPrepare, name, &params, &ranges, None, lane_groups);
            }
            Kernel::RasterBoxes {
                view,
                objects,
                output,
                depth,
                strategy,
            } => {
                // Only instanced boxes are advertised, requests for others resolve to it.
                debug_assert_eq!(strategy, RasterStrategy::Instanced);
                let (params, ranges) = self.cull_params(view, objects, output, Some(depth), lanes);
                self.raster_boxes(&params, &ranges, depth, lanes);
            }
            Kernel::PackBits {
                mode,
                output,
                last,
                current,
            } => {
                let params = uniform_bytes(&PackParams {
                    lanes,
                    mode: mode as u32,
                    output_base: self.base(output),
                    last_base: self.base(last),
                    current_base: self.base(current),
                });
                self.run_compute(
                    ComputeKernel::PackBits,
                    name,
                    &params,
                    &[output, last, current],
                    None,
                    lane_groups,
                );
            }
            Kernel::IndirectCompact {
                bits,
                records,
                compacted,
                counter,
            } => {
                let params = uniform_bytes(&IndirectParams {
                    lanes,
                    bits_base: self.base(bits),
                    records_base: self.base(records),
                    compacted_base: self.base(compacted),
                    counter_base: self.base(counter),
                });
                self.run_compute(
                    ComputeKernel::IndirectCompact,
                    name,
                    &params,
                    &[bits, records, compacted, counter],
                    None,
                    lane_groups,
                );
            }
            Kernel::TokenSizes {
                bits,
                owners,
                sizes,
                effective_sizes,
            } => {
                let params = uniform_bytes(&TokenSizeParams {
                    lanes,
                    bits_base: self.base(bits),
                    owners_base: self.base(owners),
                    sizes_base: self.base(sizes),
                    effective_sizes_base: self.base(effective_sizes),
                });
                self.run_compute(
                    ComputeKernel::TokenSizes,
                    name,
                    &params,
                    &[bits, owners, sizes, effective_sizes],
                    None,
                    lane_groups,
                );
            }
            Kernel::TokenScatter {
                sequence,
                terminator,
                source,
                destination,
                offsets,
                effective_sizes,
                scanned,
            } => {
                let params = uniform_bytes(&TokenScatterParams {
                    lanes,
                    start_token: sequence.start_token,
                    token_count: sequence.token_count,
                    start_byte_offset: sequence.start_byte_offset,
                    end_byte_offset: sequence.end_byte_offset,
                    terminator,
                    source_base: self.base(source),
                    destination_base: self.base(destination),
                    offsets_base: self.base(offsets),
                    effective_sizes_base: self.base(effective_sizes),
                    scanned_base: self.base(scanned),
                });
                self.run_compute(
                    ComputeKernel::TokenScatter,
                    name,
                    &params,
                    &[source, destination, offsets, effective_sizes, scanned],
                    None,
                    lane_groups,
                );
            }
            Kernel::ScanPrefix {
                elements,
                input,
                output,
            } => {
                let params = self.scan_params(lanes, elements, input, output);
                self.run_compute(ComputeKernel::ScanPrefix, name, &params, &[input, output], None, scan_groups);
            }
            Kernel::ScanOffsets {
                elements,
                input,
                offsets,
            } => {
                let params = self.scan_params(lanes, elements, input, offsets);
                self.run_compute(ComputeKernel::ScanOffsets, name, &params, &[input, offsets], None, scan_groups);
            }
            Kernel::ScanCombine {
                elements,
                output,
                offsets,
            } => {
                let params = self.scan_params(lanes, elements, offsets, output);
                self.run_compute(ComputeKernel::ScanCombine, name, &params, &[offsets, output], None, lane_groups);
            }
            Kernel::DepthDownsample { depth, level } => {
                let texture = &self.textures[depth.texture.idx];
                texture.downsample(
                    &self.device,
                    &self.pipelines,
                    encoder_of(&self.device, &mut self.encoder),
                    level,
                );
            }
        }
    }

    /// Fills `destination` with a non-zero `value`.
    pub(super) fn fill(&mut self, destination: BufferRange, value: u32) {
        let lanes = destination.words();
        let params = uniform_bytes(&FillParams {
            lanes,
            value,
            base: self.base(destination),
        });
        let groups = spill(round_up_div(lanes, LANE_WORKGROUP), self.max_workgroups);
        self.run_compute(ComputeKernel::Fill, "fill", &params, &[destination], None, groups);
    }

    /// Word of the aligned binding of `range` the range starts at.
    fn base(&self, range: BufferRange) -> u32 {
        let buffer_size = self.buffers[range.buffer.idx].size();
        aligned_window(range.offset, range.size, buffer_size, self.storage_alignment).2
    }

    fn scan_params(&self, lanes: u32, elements: u32, src: BufferRange, dst: BufferRange) -> Vec<u8> {
        uniform_bytes(&ScanParams {
            lanes,
            elements,
            src_base: self.base(src),
            dst_base: self.base(dst),
        })
    }

    /// Parameters and storage bindings shared by every per-object kernel.
    fn cull_params(
        &self,
        view: &View,
        objects: &ObjectBuffers,
        output: BufferRange,
        depth: Option<&DepthPyramid>,
        lanes: u32,
    ) -> (Vec<u8>, [BufferRange; 5]) {
        // Without a shared box list the kernels never read binding 4.
        let bboxes = objects.bboxes.unwrap_or(objects.object_bbox);
        let (depth_width, depth_height, depth_mip_count) = depth.map_or((0, 0, 0), |d| (d.width, d.height, d.mip_count));
        let params = uniform_bytes(&CullParams {
            view: *view,
            lanes,
            dual_index: objects.bboxes.is_some() as u32,
            matrices_base: self.base(objects.matrices),
            object_matrix_base: self.base(objects.object_matrix),
            object_bbox_base: self.base(objects.object_bbox),
            bboxes_base: self.base(bboxes),
            output_base: self.base(output),
            depth_width,
            depth_height,
            depth_mip_count,
        });
        (
            params,
            [objects.matrices, objects.object_matrix, objects.object_bbox, bboxes, output],
        )
    }

    fn uniform(&self, params: &[u8]) -> Buffer {
        self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("culling params"),
            contents: params,
            usage: BufferUsages::UNIFORM,
        })
    }

    fn run_compute(
        &mut self,
        kernel: ComputeKernel,
        label: &str,
        params: &[u8],
        ranges: &[BufferRange],
        depth: Option<&DepthPyramid>,
        workgroups: [u32; 2],
    ) {
        let uniform = self.uniform(params);
        let (pipeline, bgl) = self.pipelines.compute_kernel(kernel);

        let bindings: Vec<RangeBinding<'_>> = ranges
            .iter()
            .map(|&range| RangeBinding::new(&self.buffers[range.buffer.idx], range, self.storage_alignment))
            .collect();
        let mut builder = BindGroupBuilder::new().append_buffer(&uniform);
        for binding in &bindings {
            builder = builder.append_range(binding);
        }
        let bg = builder.build(&self.device, Some(label), bgl);
        let depth_bg = depth.map(|depth| {
            BindGroupBuilder::new()
                .append_texture_view(&self.textures[depth.texture.idx].all_levels)
                .build(&self.device, Some("cull depth bg"), &self.pipelines.depth_bgl)
        });

        let encoder = encoder_of(&self.device, &mut self.encoder);
        let mut cpass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        cpass.set_pipeline(pipeline);
        cpass.set_bind_group(0, &bg, &[]);
        if let Some(depth_bg) = &depth_bg {
            cpass.set_bind_group(1, depth_bg, &[]);
        }
        cpass.dispatch_workgroups(workgroups[0], workgroups[1], 1);
    }

    /// Draws every box as an instance of the box triangle list over level 0 of `depth`.
    fn raster_boxes(&mut self, params: &[u8], ranges: &[BufferRange], depth: &DepthPyramid, lanes: u32) {
        let uniform = self.uniform(params);
        let bindings: Vec<RangeBinding<'_>> = ranges
            .iter()
            .map(|&range| RangeBinding::new(&self.buffers[range.buffer.idx], range, self.storage_alignment))
            .collect();
        let mut builder = BindGroupBuilder::new().append_buffer(&uniform);
        for binding in &bindings {
            builder = builder.append_range(binding);
        }
        let bg = builder.build(&self.device, Some("raster boxes bg"), &self.pipelines.raster_objects_bgl);

        let level = &self.textures[depth.texture.idx].levels[0];
        let depth_bg = BindGroupBuilder::new().append_texture_view(level).build(
            &self.device,
            Some("raster depth bg"),
            &self.pipelines.raster_depth_bgl,
        );

        let encoder = encoder_of(&self.device, &mut self.encoder);
        let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("raster boxes"),
            color_attachments: &[],
            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                view: level,
                depth_ops: None,
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(&self.pipelines.raster_boxes);
        rpass.set_bind_group(0, &bg, &[]);
        rpass.set_bind_group(1, &depth_bg, &[]);
        rpass.set_index_buffer(self.box_indices.slice(..), IndexFormat::Uint32);
        rpass.draw_indexed(0..36, 0, 0..lanes);
    }
}
