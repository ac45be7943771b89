//! The native device seam.
//!
//! Everything above this trait speaks in abstract resources and binding slots.
//! Implementations translate those into native objects and commands and hand
//! back small copyable ids so that native handles never leak upward.

pub mod null;

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::renderer::error::Result;
use crate::renderer::format::Format;
use crate::renderer::resources::buffer::{BufferKind, IndexFormat};
use crate::renderer::resources::shader::{CompiledShader, ShaderStage};
use crate::renderer::resources::texture::WrapMode;
use crate::renderer::resources::vertex::VertexFieldType;

new_key_type! {
    pub struct ImageId;
    pub struct ViewId;
    pub struct SamplerId;
    pub struct BufferId;
    pub struct ShaderId;
    pub struct InputLayoutId;
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const COLOR_TARGET = 1 << 2;
        const DEPTH_TARGET = 1 << 3;
        /// Host-readable staging image
        const CPU_READ = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageDimension {
    D2,
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub dimension: ImageDimension,
    pub width: u32,
    pub height: u32,
    /// Depth for 3D images, array layers for 2D images
    pub depth_or_layers: u32,
    pub format: Format,
    pub samples: u32,
    pub usage: ImageUsage,
    pub cube_compatible: bool,
}

/// Pitches of one mip level of the upload payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceLayout {
    pub row_pitch: u64,
    pub slice_pitch: u64,
}

/// Initial contents of an image: level 0 of every array layer (or every depth
/// slice for 3D images), packed consecutively.
#[derive(Debug, Clone, Copy)]
pub struct ImageData<'a> {
    pub bytes: &'a [u8],
    pub layout: SubresourceLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    D2,
    D3,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    pub kind: ViewKind,
    pub dimension: ViewDimension,
    pub format: Format,
}

/// A fully resolved vertex attribute, ready for the native input layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub semantic: String,
    pub location: u32,
    pub format: VertexFieldType,
    pub input_slot: u32,
    pub step_rate: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub buffer: BufferId,
    pub stride: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Read-only view of a mapped CPU-read image
pub struct MappedImage<'a> {
    pub data: &'a [u8],
    pub row_pitch: u64,
}

/// A native graphics device.
///
/// Calls execute in order on the calling thread. State-setting calls affect
/// only the draw and dispatch calls issued after them.
pub trait Device {
    fn name(&self) -> &str;

    fn create_image(&mut self, desc: &ImageDesc, data: Option<ImageData<'_>>) -> Result<ImageId>;
    fn destroy_image(&mut self, image: ImageId);

    fn create_view(&mut self, image: ImageId, desc: &ViewDesc) -> Result<ViewId>;
    fn destroy_view(&mut self, view: ViewId);

    fn create_sampler(&mut self, wrap: WrapMode) -> Result<SamplerId>;
    fn destroy_sampler(&mut self, sampler: SamplerId);

    fn create_buffer(&mut self, kind: BufferKind, size: u64, data: Option<&[u8]>) -> Result<BufferId>;
    /// Overwrites the start of the buffer with `data`
    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()>;
    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_shader_module(&mut self, shader: &CompiledShader) -> Result<ShaderId>;
    fn destroy_shader_module(&mut self, shader: ShaderId);

    fn create_input_layout(
        &mut self,
        attributes: &[VertexAttribute],
        shader: &CompiledShader,
    ) -> Result<InputLayoutId>;
    fn destroy_input_layout(&mut self, layout: InputLayoutId);

    fn set_shader_resource(&mut self, slot: u32, binding: Option<(ViewId, SamplerId)>);
    fn set_unordered_access(&mut self, slot: u32, view: Option<ViewId>);
    fn set_vertex_buffers(&mut self, first_slot: u32, buffers: &[VertexBufferView]);
    fn set_index_buffer(&mut self, buffer: Option<BufferId>, format: IndexFormat, offset: u64);
    /// Binds constant buffers to every programmable stage
    fn set_constant_buffers(&mut self, first_slot: u32, buffers: &[BufferId]);
    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderId>);
    fn set_input_layout(&mut self, layout: Option<InputLayoutId>);
    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);
    fn set_viewport(&mut self, viewport: &Viewport);

    /// Installs the color outputs by slot, `None` leaving a slot unwritten
    fn set_render_targets(&mut self, colors: &[Option<ViewId>], depth: Option<ViewId>) -> Result<()>;
    fn clear_render_target(&mut self, view: ViewId, color: [f32; 4]) -> Result<()>;
    fn clear_depth_stencil(&mut self, view: ViewId, depth: f32) -> Result<()>;

    /// Downsamples a multisampled image into its single-sample counterpart
    fn resolve_image(&mut self, dst: ImageId, src: ImageId, format: Format) -> Result<()>;
    fn copy_image(&mut self, dst: ImageId, src: ImageId) -> Result<()>;

    fn map_image(&mut self, image: ImageId) -> Result<MappedImage<'_>>;
    fn unmap_image(&mut self, image: ImageId);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()>;
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()>;
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()>;

    /// The presentable image for the frame being recorded
    fn back_buffer(&mut self) -> Result<ImageId>;
    fn back_buffer_format(&self) -> Format;
    fn swapchain_size(&self) -> (u32, u32);
    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()>;
    fn present(&mut self, vsync: bool) -> Result<()>;
}
