//! Embedded WGSL sources.

use std::borrow::Cow;

use occlusion::CullError;
use rust_embed::RustEmbed;
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/shaders"]
struct OcclusionShaderSources;

/// Concatenates `files` in order.
pub(crate) fn compose(files: &[&'static str]) -> Result<String, CullError> {
    let mut source = String::new();
    for &name in files {
        let file = OcclusionShaderSources::get(name).ok_or(CullError::MissingShader { name })?;
        source.push_str(&String::from_utf8_lossy(&file.data));
        source.push('\n');
    }
    Ok(source)
}

pub(crate) fn module(device: &Device, label: &str, files: &[&'static str]) -> Result<ShaderModule, CullError> {
    let source = compose(files)?;
    Ok(device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Wgsl(Cow::Owned(source)),
    }))
}
