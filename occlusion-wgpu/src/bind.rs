use occlusion_types::BufferRange;
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingResource, BindingType, Buffer, BufferBinding, BufferBindingType, BufferSize, Device, ShaderStages,
    TextureSampleType, TextureView, TextureViewDimension,
};

pub(crate) struct BindGroupLayoutBuilder {
    bgl_entries: Vec<BindGroupLayoutEntry>,
}

impl BindGroupLayoutBuilder {
    pub fn new() -> Self {
        Self {
            bgl_entries: Vec::with_capacity(8),
        }
    }

    pub fn append(mut self, visibility: ShaderStages, ty: BindingType) -> Self {
        let binding = self.bgl_entries.len() as u32;
        self.bgl_entries.push(BindGroupLayoutEntry {
            binding,
            visibility,
            ty,
            count: None,
        });
        self
    }

    pub fn uniform(self, visibility: ShaderStages) -> Self {
        self.append(
            visibility,
            BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        )
    }

    pub fn storage(self, visibility: ShaderStages, read_only: bool) -> Self {
        self.append(
            visibility,
            BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        )
    }

    /// `count` read-write storage buffers.
    pub fn storages(mut self, visibility: ShaderStages, count: usize) -> Self {
        for _ in 0..count {
            self = self.storage(visibility, false);
        }
        self
    }

    pub fn depth_texture(self, visibility: ShaderStages) -> Self {
        self.append(
            visibility,
            BindingType::Texture {
                sample_type: TextureSampleType::Depth,
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
        )
    }

    pub fn build(self, device: &Device, label: Option<&str>) -> BindGroupLayout {
        device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label,
            entries: &self.bgl_entries,
        })
    }
}

pub(crate) struct BindGroupBuilder<'a> {
    bg_entries: Vec<BindGroupEntry<'a>>,
}

impl<'a> BindGroupBuilder<'a> {
    pub fn new() -> Self {
        Self {
            bg_entries: Vec::with_capacity(8),
        }
    }

    pub fn append(mut self, resource: BindingResource<'a>) -> Self {
        let binding = self.bg_entries.len() as u32;
        self.bg_entries.push(BindGroupEntry { binding, resource });
        self
    }

    pub fn append_buffer(self, buffer: &'a Buffer) -> Self {
        self.append(buffer.as_entire_binding())
    }

    pub fn append_range(self, range: &RangeBinding<'a>) -> Self {
        self.append(BindingResource::Buffer(BufferBinding {
            buffer: range.buffer,
            offset: range.offset,
            size: BufferSize::new(range.size),
        }))
    }

    pub fn append_texture_view(self, view: &'a TextureView) -> Self {
        self.append(BindingResource::TextureView(view))
    }

    pub fn build(self, device: &Device, label: Option<&str>, bgl: &BindGroupLayout) -> BindGroup {
        device.create_bind_group(&BindGroupDescriptor {
            label,
            layout: bgl,
            entries: &self.bg_entries,
        })
    }
}

/// A buffer range bound at an offset the device accepts.
///
/// Kernels index their bindings from `base`, the word the range starts at
/// inside of the binding.
pub(crate) struct RangeBinding<'a> {
    pub buffer: &'a Buffer,
    pub offset: u64,
    pub size: u64,
    pub base: u32,
}

impl<'a> RangeBinding<'a> {
    pub fn new(buffer: &'a Buffer, range: BufferRange, alignment: u64) -> Self {
        let (offset, size, base) = aligned_window(range.offset, range.size, buffer.size(), alignment);
        Self {
            buffer,
            offset,
            size,
            base,
        }
    }
}

/// Widens `offset..offset + size` to start on `alignment`. Empty ranges are
/// never accessed and bind the first word of the buffer.
pub(crate) fn aligned_window(offset: u64, size: u64, buffer_size: u64, alignment: u64) -> (u64, u64, u32) {
    if size == 0 {
        return (0, 4.min(buffer_size), 0);
    }
    let start = offset - offset % alignment;
    let end = (offset + size).min(buffer_size);
    (start, end - start, ((offset - start) / 4) as u32)
}
