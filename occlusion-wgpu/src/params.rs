//! Uniform parameters of every kernel, mirrored by the structs of the same name in the shaders.

use encase::{ShaderType, UniformBuffer};
use occlusion_types::View;

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct CullParams {
    pub view: View,
    pub lanes: u32,
    pub dual_index: u32,
    pub matrices_base: u32,
    pub object_matrix_base: u32,
    pub object_bbox_base: u32,
    pub bboxes_base: u32,
    pub output_base: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub depth_mip_count: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct PackParams {
    pub lanes: u32,
    pub mode: u32,
    pub output_base: u32,
    pub last_base: u32,
    pub current_base: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct IndirectParams {
    pub lanes: u32,
    pub bits_base: u32,
    pub records_base: u32,
    pub compacted_base: u32,
    pub counter_base: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct TokenSizeParams {
    pub lanes: u32,
    pub bits_base: u32,
    pub owners_base: u32,
    pub sizes_base: u32,
    pub effective_sizes_base: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct TokenScatterParams {
    pub lanes: u32,
    pub start_token: u32,
    pub token_count: u32,
    pub start_byte_offset: u32,
    pub end_byte_offset: u32,
    pub terminator: u32,
    pub source_base: u32,
    pub destination_base: u32,
    pub offsets_base: u32,
    pub effective_sizes_base: u32,
    pub scanned_base: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct ScanParams {
    pub lanes: u32,
    pub elements: u32,
    pub src_base: u32,
    pub dst_base: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct FillParams {
    pub lanes: u32,
    pub value: u32,
    pub base: u32,
}

#[derive(Debug, Clone, ShaderType)]
pub(crate) struct UploadParams {
    pub width: u32,
}

/// Uniform buffer layout of `params`.
pub(crate) fn uniform_bytes<T: ShaderType + encase::internal::WriteInto>(params: &T) -> Vec<u8> {
    let mut buffer = UniformBuffer::new(Vec::new());
    buffer.write(params).unwrap();
    buffer.into_inner()
}
