//! Headless device.
//!
//! Hands out ids from slot maps, keeps buffer and image contents in host
//! memory and records every call it receives. Clears, resolves and copies
//! write real pixel data, so their results can be read back with
//! [`NullDevice::image_data`]. It checks the same usage rules a
//! validation layer would, so misuse that would be rejected by a real driver is
//! rejected here too.

use slotmap::SlotMap;

use crate::renderer::device::{
    BufferId, Device, ImageData, ImageDesc, ImageId, ImageUsage, InputLayoutId, MappedImage,
    PrimitiveTopology, SamplerId, ShaderId, VertexAttribute, VertexBufferView, ViewDesc, ViewId,
    ViewKind, Viewport,
};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::format::{Format, FormatTable};
use crate::renderer::resources::buffer::{BufferKind, IndexFormat};
use crate::renderer::resources::shader::{CompiledShader, ShaderStage};
use crate::renderer::resources::texture::WrapMode;

/// A call received by the [`NullDevice`]
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateImage { image: ImageId, desc: ImageDesc, initialized: bool },
    DestroyImage(ImageId),
    CreateView { view: ViewId, image: ImageId, desc: ViewDesc },
    DestroyView(ViewId),
    CreateSampler { sampler: SamplerId, wrap: WrapMode },
    DestroySampler(SamplerId),
    CreateBuffer { buffer: BufferId, kind: BufferKind, size: u64 },
    WriteBuffer { buffer: BufferId, len: u64 },
    DestroyBuffer(BufferId),
    CreateShaderModule { shader: ShaderId, stage: ShaderStage },
    DestroyShaderModule(ShaderId),
    CreateInputLayout { layout: InputLayoutId, attributes: Vec<VertexAttribute> },
    DestroyInputLayout(InputLayoutId),
    SetShaderResource { slot: u32, view: Option<ViewId>, sampler: Option<SamplerId> },
    SetUnorderedAccess { slot: u32, view: Option<ViewId> },
    SetVertexBuffers { first_slot: u32, buffers: Vec<VertexBufferView> },
    SetIndexBuffer { buffer: Option<BufferId>, format: IndexFormat, offset: u64 },
    SetConstantBuffers { first_slot: u32, buffers: Vec<BufferId> },
    SetShader { stage: ShaderStage, shader: Option<ShaderId> },
    SetInputLayout(Option<InputLayoutId>),
    SetPrimitiveTopology(PrimitiveTopology),
    SetViewport(Viewport),
    SetRenderTargets { colors: Vec<Option<ViewId>>, depth: Option<ViewId> },
    ClearRenderTarget { view: ViewId, color: [f32; 4] },
    ClearDepthStencil { view: ViewId, depth: f32 },
    ResolveImage { dst: ImageId, src: ImageId, format: Format },
    CopyImage { dst: ImageId, src: ImageId },
    MapImage(ImageId),
    UnmapImage(ImageId),
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    ResizeSwapchain { width: u32, height: u32 },
    Present { vsync: bool },
}

impl DeviceCall {
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            DeviceCall::CreateImage { .. }
                | DeviceCall::CreateView { .. }
                | DeviceCall::CreateSampler { .. }
                | DeviceCall::CreateBuffer { .. }
                | DeviceCall::CreateShaderModule { .. }
                | DeviceCall::CreateInputLayout { .. }
        )
    }
}

/// Recorded commands the null device can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetRenderTargets,
    Clear,
    Resolve,
    Copy,
}

/// Number of native objects currently alive, per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveCounts {
    pub images: usize,
    pub views: usize,
    pub samplers: usize,
    pub buffers: usize,
    pub shaders: usize,
    pub input_layouts: usize,
}

/// Multisampled images store one full plane per sample, sample 0 first
struct NullImage {
    desc: ImageDesc,
    data: Vec<u8>,
    row_pitch: u64,
    mapped: bool,
}

struct NullView {
    image: ImageId,
    desc: ViewDesc,
}

pub struct NullDevice {
    formats: FormatTable,
    images: SlotMap<ImageId, NullImage>,
    views: SlotMap<ViewId, NullView>,
    samplers: SlotMap<SamplerId, WrapMode>,
    buffers: SlotMap<BufferId, Vec<u8>>,
    shaders: SlotMap<ShaderId, ShaderStage>,
    input_layouts: SlotMap<InputLayoutId, Vec<VertexAttribute>>,

    back_buffer: ImageId,
    back_buffer_format: Format,
    swapchain_size: (u32, u32),
    compute_shader: Option<ShaderId>,
    vertex_shader: Option<ShaderId>,
    failing: Option<Command>,

    calls: Vec<DeviceCall>,
}

impl NullDevice {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let mut device = Self {
            formats: FormatTable::new()?,
            images: SlotMap::with_key(),
            views: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            input_layouts: SlotMap::with_key(),
            back_buffer: ImageId::default(),
            back_buffer_format: Format::B8G8R8A8Unorm,
            swapchain_size: (width, height),
            compute_shader: None,
            vertex_shader: None,
            failing: None,
            calls: Vec::new(),
        };
        device.back_buffer = device.allocate_back_buffer(width, height);
        Ok(device)
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn live_counts(&self) -> LiveCounts {
        LiveCounts {
            // The back buffer belongs to the swapchain, not to a caller
            images: self.images.len() - 1,
            views: self.views.len(),
            samplers: self.samplers.len(),
            buffers: self.buffers.len(),
            shaders: self.shaders.len(),
            input_layouts: self.input_layouts.len(),
        }
    }

    pub fn buffer_data(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|b| b.as_slice())
    }

    pub fn image_data(&self, image: ImageId) -> Option<&[u8]> {
        self.images.get(image).map(|i| i.data.as_slice())
    }

    pub fn image_desc(&self, image: ImageId) -> Option<&ImageDesc> {
        self.images.get(image).map(|i| &i.desc)
    }

    pub fn view_image(&self, view: ViewId) -> Option<ImageId> {
        self.views.get(view).map(|v| v.image)
    }

    pub fn back_buffer_id(&self) -> ImageId {
        self.back_buffer
    }

    /// Makes the next `command` fail the way a lost device would
    pub fn fail_next(&mut self, command: Command) {
        self.failing = Some(command);
    }

    fn check_failure(&mut self, command: Command) -> Result<()> {
        if self.failing == Some(command) {
            self.failing = None;
            return Err(RenderError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST));
        }
        Ok(())
    }

    fn allocate_back_buffer(&mut self, width: u32, height: u32) -> ImageId {
        let desc = ImageDesc {
            dimension: crate::renderer::device::ImageDimension::D2,
            width,
            height,
            depth_or_layers: 1,
            format: self.back_buffer_format,
            samples: 1,
            usage: ImageUsage::COLOR_TARGET,
            cube_compatible: false,
        };
        let (data, row_pitch) = self.zeroed(&desc);
        self.images.insert(NullImage {
            desc,
            data,
            row_pitch,
            mapped: false,
        })
    }

    fn zeroed(&self, desc: &ImageDesc) -> (Vec<u8>, u64) {
        let pixel_size = self.formats.get_format_info(desc.format).pixel_size_in_bytes as u64;
        let row_pitch = desc.width as u64 * pixel_size;
        let len = row_pitch * desc.height as u64 * desc.depth_or_layers as u64 * desc.samples as u64;
        (vec![0; len as usize], row_pitch)
    }

    fn image(&self, image: ImageId) -> Result<&NullImage> {
        self.images
            .get(image)
            .ok_or_else(|| RenderError::Device(format!("unknown image {:?}", image)))
    }

    fn image_mut(&mut self, image: ImageId) -> Result<&mut NullImage> {
        self.images
            .get_mut(image)
            .ok_or_else(|| RenderError::Device(format!("unknown image {:?}", image)))
    }

    /// The view, checked to be of `kind`
    fn view_of_kind(&self, view: ViewId, kind: ViewKind) -> Result<&NullView> {
        let entry = self
            .views
            .get(view)
            .ok_or_else(|| RenderError::Device(format!("unknown view {:?}", view)))?;
        if entry.desc.kind != kind {
            return Err(RenderError::Device(format!(
                "{:?} view used where a {:?} view is required",
                entry.desc.kind, kind
            )));
        }
        Ok(entry)
    }

    /// Fills every pixel of the view's image with `pixel`. Formats without an
    /// encoding keep their contents.
    fn fill(&mut self, view: ViewId, kind: ViewKind, pixel: impl FnOnce(Format) -> Option<Vec<u8>>) -> Result<()> {
        let image = self.view_of_kind(view, kind)?.image;
        let target = self.image_mut(image)?;
        let Some(pixel) = pixel(target.desc.format) else {
            log::trace!("Clear of {:?} not encoded by the null device", target.desc.format);
            return Ok(());
        };
        for chunk in target.data.chunks_exact_mut(pixel.len()) {
            chunk.copy_from_slice(&pixel);
        }
        Ok(())
    }
}

/// One pixel of `format` holding `color`
fn encode_color(format: Format, color: [f32; 4]) -> Option<Vec<u8>> {
    let unorm8 = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b, a] = color;
    Some(match format {
        Format::R8Unorm => vec![unorm8(r)],
        Format::R8G8Unorm => vec![unorm8(r), unorm8(g)],
        Format::R8G8B8A8Unorm => color.map(unorm8).to_vec(),
        Format::B8G8R8A8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
        Format::R32Float => r.to_le_bytes().to_vec(),
        Format::R32G32Float => [r, g].iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::R32G32B32A32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::R32Uint => (r as u32).to_le_bytes().to_vec(),
        _ => return None,
    })
}

fn encode_depth(format: Format, depth: f32) -> Option<Vec<u8>> {
    let depth = depth.clamp(0.0, 1.0);
    Some(match format {
        Format::D16Unorm => ((depth * 65_535.0).round() as u16).to_le_bytes().to_vec(),
        // Stencil lives in the top byte and clears to zero
        Format::D24UnormS8Uint => ((depth * 16_777_215.0).round() as u32).to_le_bytes().to_vec(),
        Format::D32Float => depth.to_le_bytes().to_vec(),
        _ => return None,
    })
}

fn required_usage(kind: ViewKind) -> ImageUsage {
    match kind {
        ViewKind::ShaderResource => ImageUsage::SAMPLED,
        ViewKind::UnorderedAccess => ImageUsage::STORAGE,
        ViewKind::RenderTarget => ImageUsage::COLOR_TARGET,
        ViewKind::DepthStencil => ImageUsage::DEPTH_TARGET,
    }
}

impl Device for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn create_image(&mut self, desc: &ImageDesc, data: Option<ImageData<'_>>) -> Result<ImageId> {
        if desc.width == 0 || desc.height == 0 || desc.depth_or_layers == 0 {
            return Err(RenderError::Device("zero-sized image".into()));
        }
        let (mut bytes, row_pitch) = self.zeroed(desc);
        if let Some(data) = data {
            let len = data.bytes.len().min(bytes.len());
            bytes[..len].copy_from_slice(&data.bytes[..len]);
        }
        let image = self.images.insert(NullImage {
            desc: *desc,
            data: bytes,
            row_pitch,
            mapped: false,
        });
        self.calls.push(DeviceCall::CreateImage {
            image,
            desc: *desc,
            initialized: data.is_some(),
        });
        Ok(image)
    }

    fn destroy_image(&mut self, image: ImageId) {
        self.images.remove(image);
        self.calls.push(DeviceCall::DestroyImage(image));
    }

    fn create_view(&mut self, image: ImageId, desc: &ViewDesc) -> Result<ViewId> {
        let usage = self.image(image)?.desc.usage;
        let required = required_usage(desc.kind);
        if !usage.contains(required) {
            return Err(RenderError::Device(format!(
                "{:?} view over an image without {:?} usage",
                desc.kind, required
            )));
        }
        let view = self.views.insert(NullView { image, desc: *desc });
        self.calls.push(DeviceCall::CreateView {
            view,
            image,
            desc: *desc,
        });
        Ok(view)
    }

    fn destroy_view(&mut self, view: ViewId) {
        self.views.remove(view);
        self.calls.push(DeviceCall::DestroyView(view));
    }

    fn create_sampler(&mut self, wrap: WrapMode) -> Result<SamplerId> {
        let sampler = self.samplers.insert(wrap);
        self.calls.push(DeviceCall::CreateSampler { sampler, wrap });
        Ok(sampler)
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        self.samplers.remove(sampler);
        self.calls.push(DeviceCall::DestroySampler(sampler));
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64, data: Option<&[u8]>) -> Result<BufferId> {
        let mut bytes = vec![0; size as usize];
        if let Some(data) = data {
            let len = data.len().min(bytes.len());
            bytes[..len].copy_from_slice(&data[..len]);
        }
        let buffer = self.buffers.insert(bytes);
        self.calls.push(DeviceCall::CreateBuffer { buffer, kind, size });
        Ok(buffer)
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get_mut(buffer)
            .ok_or_else(|| RenderError::Device(format!("unknown buffer {:?}", buffer)))?;
        if data.len() > target.len() {
            return Err(RenderError::BufferOverflow {
                len: data.len() as u64,
                capacity: target.len() as u64,
            });
        }
        target[..data.len()].copy_from_slice(data);
        self.calls.push(DeviceCall::WriteBuffer {
            buffer,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(buffer);
        self.calls.push(DeviceCall::DestroyBuffer(buffer));
    }

    fn create_shader_module(&mut self, shader: &CompiledShader) -> Result<ShaderId> {
        if shader.spirv.is_empty() {
            return Err(RenderError::Device(format!("empty shader {}", shader.name)));
        }
        let id = self.shaders.insert(shader.stage);
        self.calls.push(DeviceCall::CreateShaderModule {
            shader: id,
            stage: shader.stage,
        });
        Ok(id)
    }

    fn destroy_shader_module(&mut self, shader: ShaderId) {
        self.shaders.remove(shader);
        self.calls.push(DeviceCall::DestroyShaderModule(shader));
    }

    fn create_input_layout(
        &mut self,
        attributes: &[VertexAttribute],
        shader: &CompiledShader,
    ) -> Result<InputLayoutId> {
        if shader.stage != ShaderStage::Vertex {
            return Err(RenderError::Device("input layouts need a vertex shader".into()));
        }
        let layout = self.input_layouts.insert(attributes.to_vec());
        self.calls.push(DeviceCall::CreateInputLayout {
            layout,
            attributes: attributes.to_vec(),
        });
        Ok(layout)
    }

    fn destroy_input_layout(&mut self, layout: InputLayoutId) {
        self.input_layouts.remove(layout);
        self.calls.push(DeviceCall::DestroyInputLayout(layout));
    }

    fn set_shader_resource(&mut self, slot: u32, binding: Option<(ViewId, SamplerId)>) {
        self.calls.push(DeviceCall::SetShaderResource {
            slot,
            view: binding.map(|(view, _)| view),
            sampler: binding.map(|(_, sampler)| sampler),
        });
    }

    fn set_unordered_access(&mut self, slot: u32, view: Option<ViewId>) {
        self.calls.push(DeviceCall::SetUnorderedAccess { slot, view });
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, buffers: &[VertexBufferView]) {
        self.calls.push(DeviceCall::SetVertexBuffers {
            first_slot,
            buffers: buffers.to_vec(),
        });
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferId>, format: IndexFormat, offset: u64) {
        self.calls.push(DeviceCall::SetIndexBuffer { buffer, format, offset });
    }

    fn set_constant_buffers(&mut self, first_slot: u32, buffers: &[BufferId]) {
        self.calls.push(DeviceCall::SetConstantBuffers {
            first_slot,
            buffers: buffers.to_vec(),
        });
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderId>) {
        match stage {
            ShaderStage::Vertex => self.vertex_shader = shader,
            ShaderStage::Compute => self.compute_shader = shader,
            ShaderStage::Pixel => {}
        }
        self.calls.push(DeviceCall::SetShader { stage, shader });
    }

    fn set_input_layout(&mut self, layout: Option<InputLayoutId>) {
        self.calls.push(DeviceCall::SetInputLayout(layout));
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.calls.push(DeviceCall::SetPrimitiveTopology(topology));
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.calls.push(DeviceCall::SetViewport(*viewport));
    }

    fn set_render_targets(&mut self, colors: &[Option<ViewId>], depth: Option<ViewId>) -> Result<()> {
        self.check_failure(Command::SetRenderTargets)?;
        for view in colors.iter().flatten() {
            self.view_of_kind(*view, ViewKind::RenderTarget)?;
        }
        if let Some(view) = depth {
            self.view_of_kind(view, ViewKind::DepthStencil)?;
        }
        self.calls.push(DeviceCall::SetRenderTargets {
            colors: colors.to_vec(),
            depth,
        });
        Ok(())
    }

    fn clear_render_target(&mut self, view: ViewId, color: [f32; 4]) -> Result<()> {
        self.check_failure(Command::Clear)?;
        self.fill(view, ViewKind::RenderTarget, |format| encode_color(format, color))?;
        self.calls.push(DeviceCall::ClearRenderTarget { view, color });
        Ok(())
    }

    fn clear_depth_stencil(&mut self, view: ViewId, depth: f32) -> Result<()> {
        self.check_failure(Command::Clear)?;
        self.fill(view, ViewKind::DepthStencil, |format| encode_depth(format, depth))?;
        self.calls.push(DeviceCall::ClearDepthStencil { view, depth });
        Ok(())
    }

    /// Takes sample 0 of every pixel
    fn resolve_image(&mut self, dst: ImageId, src: ImageId, format: Format) -> Result<()> {
        self.check_failure(Command::Resolve)?;
        let source = self.image(src)?;
        if source.desc.samples < 2 {
            return Err(RenderError::Device("resolve from a single-sampled image".into()));
        }
        let plane_len = source.data.len() / source.desc.samples as usize;
        let plane = source.data[..plane_len].to_vec();

        let target = self.image_mut(dst)?;
        if target.desc.samples != 1 || target.desc.format != format {
            return Err(RenderError::Device(format!(
                "resolve into a {}x {:?} image, expected single-sampled {:?}",
                target.desc.samples, target.desc.format, format
            )));
        }
        let len = plane.len().min(target.data.len());
        target.data[..len].copy_from_slice(&plane[..len]);
        self.calls.push(DeviceCall::ResolveImage { dst, src, format });
        Ok(())
    }

    fn copy_image(&mut self, dst: ImageId, src: ImageId) -> Result<()> {
        self.check_failure(Command::Copy)?;
        let bytes = self.image(src)?.data.clone();
        let target = self.image_mut(dst)?;
        let len = bytes.len().min(target.data.len());
        target.data[..len].copy_from_slice(&bytes[..len]);
        self.calls.push(DeviceCall::CopyImage { dst, src });
        Ok(())
    }

    fn map_image(&mut self, image: ImageId) -> Result<MappedImage<'_>> {
        let target = self
            .images
            .get_mut(image)
            .ok_or_else(|| RenderError::Device(format!("unknown image {:?}", image)))?;
        if !target.desc.usage.contains(ImageUsage::CPU_READ) {
            return Err(RenderError::Device("mapping an image without CPU read access".into()));
        }
        target.mapped = true;
        self.calls.push(DeviceCall::MapImage(image));
        let target = &self.images[image];
        Ok(MappedImage {
            data: &target.data,
            row_pitch: target.row_pitch,
        })
    }

    fn unmap_image(&mut self, image: ImageId) {
        if let Some(target) = self.images.get_mut(image) {
            target.mapped = false;
        }
        self.calls.push(DeviceCall::UnmapImage(image));
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) -> Result<()> {
        if self.vertex_shader.is_none() {
            return Err(RenderError::Device("draw without a vertex shader".into()));
        }
        self.calls.push(DeviceCall::Draw {
            vertex_count,
            instance_count,
        });
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) -> Result<()> {
        if self.vertex_shader.is_none() {
            return Err(RenderError::Device("draw without a vertex shader".into()));
        }
        self.calls.push(DeviceCall::DrawIndexed {
            index_count,
            instance_count,
        });
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        if self.compute_shader.is_none() {
            return Err(RenderError::Device("dispatch without a compute shader".into()));
        }
        self.calls.push(DeviceCall::Dispatch { x, y, z });
        Ok(())
    }

    fn back_buffer(&mut self) -> Result<ImageId> {
        Ok(self.back_buffer)
    }

    fn back_buffer_format(&self) -> Format {
        self.back_buffer_format
    }

    fn swapchain_size(&self) -> (u32, u32) {
        self.swapchain_size
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.images.remove(self.back_buffer);
        self.back_buffer = self.allocate_back_buffer(width, height);
        self.swapchain_size = (width, height);
        self.calls.push(DeviceCall::ResizeSwapchain { width, height });
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        self.calls.push(DeviceCall::Present { vsync });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{ImageDimension, ViewDimension};

    fn desc(usage: ImageUsage) -> ImageDesc {
        ImageDesc {
            dimension: ImageDimension::D2,
            width: 4,
            height: 4,
            depth_or_layers: 1,
            format: Format::R8G8B8A8Unorm,
            samples: 1,
            usage,
            cube_compatible: false,
        }
    }

    #[test]
    fn views_require_matching_usage() {
        let mut device = NullDevice::new(8, 8).unwrap();
        let image = device.create_image(&desc(ImageUsage::SAMPLED), None).unwrap();
        let srv = ViewDesc {
            kind: ViewKind::ShaderResource,
            dimension: ViewDimension::D2,
            format: Format::R8G8B8A8Unorm,
        };
        assert!(device.create_view(image, &srv).is_ok());
        let uav = ViewDesc {
            kind: ViewKind::UnorderedAccess,
            ..srv
        };
        assert!(device.create_view(image, &uav).is_err());
    }

    #[test]
    fn back_buffer_is_not_a_live_caller_image() {
        let device = NullDevice::new(8, 8).unwrap();
        assert_eq!(device.live_counts(), LiveCounts::default());
    }

    #[test]
    fn writes_past_the_end_are_rejected() {
        let mut device = NullDevice::new(8, 8).unwrap();
        let buffer = device.create_buffer(BufferKind::Vertex, 4, None).unwrap();
        assert!(device.write_buffer(buffer, &[1, 2, 3, 4, 5]).is_err());
        device.write_buffer(buffer, &[9, 9]).unwrap();
        assert_eq!(device.buffer_data(buffer), Some(&[9, 9, 0, 0][..]));
    }

    #[test]
    fn render_targets_need_target_views() {
        let mut device = NullDevice::new(8, 8).unwrap();
        let image = device
            .create_image(&desc(ImageUsage::SAMPLED | ImageUsage::COLOR_TARGET), None)
            .unwrap();
        let srv = device
            .create_view(
                image,
                &ViewDesc {
                    kind: ViewKind::ShaderResource,
                    dimension: ViewDimension::D2,
                    format: Format::R8G8B8A8Unorm,
                },
            )
            .unwrap();
        assert!(device.set_render_targets(&[Some(srv)], None).is_err());
        assert!(device.clear_render_target(srv, [0.0; 4]).is_err());
    }

    #[test]
    fn resolve_takes_the_first_sample() {
        let mut device = NullDevice::new(8, 8).unwrap();
        let dst = device.create_image(&desc(ImageUsage::COLOR_TARGET), None).unwrap();
        let src = device
            .create_image(
                &ImageDesc {
                    samples: 4,
                    ..desc(ImageUsage::COLOR_TARGET)
                },
                None,
            )
            .unwrap();
        let rtv = device
            .create_view(
                src,
                &ViewDesc {
                    kind: ViewKind::RenderTarget,
                    dimension: ViewDimension::D2,
                    format: Format::R8G8B8A8Unorm,
                },
            )
            .unwrap();
        device.clear_render_target(rtv, [0.0, 1.0, 0.0, 1.0]).unwrap();
        device.resolve_image(dst, src, Format::R8G8B8A8Unorm).unwrap();

        let data = device.image_data(dst).unwrap();
        assert_eq!(data.len(), 64);
        assert!(data.chunks_exact(4).all(|pixel| pixel == [0, 255, 0, 255]));
        assert!(device.resolve_image(src, dst, Format::R8G8B8A8Unorm).is_err());
    }

    #[test]
    fn injected_failures_fire_once() {
        let mut device = NullDevice::new(8, 8).unwrap();
        device.fail_next(Command::SetRenderTargets);
        assert!(matches!(
            device.set_render_targets(&[], None),
            Err(RenderError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST))
        ));
        device.set_render_targets(&[], None).unwrap();
    }

    #[test]
    fn only_cpu_read_images_map() {
        let mut device = NullDevice::new(8, 8).unwrap();
        let sampled = device.create_image(&desc(ImageUsage::SAMPLED), None).unwrap();
        assert!(device.map_image(sampled).is_err());
        let staging = device.create_image(&desc(ImageUsage::CPU_READ), None).unwrap();
        let mapped = device.map_image(staging).unwrap();
        assert_eq!(mapped.row_pitch, 16);
        assert_eq!(mapped.data.len(), 64);
    }
}
