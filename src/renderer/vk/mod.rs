//! Vulkan implementation of [`Device`].
//!
//! Everything is recorded into a single command buffer that is submitted at
//! present, or earlier when the host needs to read results back. Image
//! layouts are tracked per image and fixed up right before the command that
//! depends on them, so nothing above this module deals with barriers.

pub mod convert;
pub mod descriptors;
pub mod device;
pub mod frame;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod swapchain;
pub mod transfer;
pub mod util;

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_descriptor::{DescriptorAllocator, DescriptorSetLayoutCreateFlags};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::renderer::config::{
    MAX_CONSTANT_BUFFER_SLOTS, MAX_RENDER_TARGETS, MAX_TEXTURE_SLOTS, MAX_UAV_SLOTS,
    MAX_VERTEX_BUFFER_SLOTS, RenderConfig,
};
use crate::renderer::device::{
    BufferId, Device, ImageData, ImageDesc, ImageDimension, ImageId, ImageUsage, InputLayoutId,
    MappedImage, PrimitiveTopology, SamplerId, ShaderId, VertexAttribute, VertexBufferView,
    ViewDesc, ViewDimension, ViewId, ViewKind, Viewport,
};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::format::Format;
use crate::renderer::resources::buffer::{BufferKind, IndexFormat};
use crate::renderer::resources::shader::{CompiledShader, ShaderStage};
use crate::renderer::resources::texture::WrapMode;
use crate::renderer::vk::descriptors::DescriptorAshDevice;
use crate::renderer::vk::device::{PhysicalDevice, Queue};
use crate::renderer::vk::frame::{Frame, Garbage};
use crate::renderer::vk::instance::Instance;
use crate::renderer::vk::memory::{GpuBuffer, GpuImage};
use crate::renderer::vk::pipeline::{
    GraphicsPipelineDesc, GraphicsPipelineKey, InputLayout, PipelineCache, ShaderModule,
};
use crate::renderer::vk::swapchain::{Swapchain, SwapchainTarget};
use crate::renderer::vk::transfer::Transfer;

struct GpuView {
    raw: vk::ImageView,
    image: ImageId,
    desc: ViewDesc,
}

#[derive(Debug, Clone, Copy)]
struct Attachment {
    image: ImageId,
    view: vk::ImageView,
    format: vk::Format,
}

/// The render targets in native form, resolved once when they are bound.
/// Empty color slots stay in place as `None`.
struct Attachments {
    colors: SmallVec<[Option<Attachment>; MAX_RENDER_TARGETS]>,
    depth: Option<Attachment>,
    extent: vk::Extent2D,
    samples: u32,
}

/// Everything set through the state-setting calls
struct Bindings {
    textures: [Option<(ViewId, SamplerId)>; MAX_TEXTURE_SLOTS],
    uavs: [Option<ViewId>; MAX_UAV_SLOTS],
    vertex_buffers: [Option<VertexBufferView>; MAX_VERTEX_BUFFER_SLOTS],
    index_buffer: Option<(BufferId, IndexFormat, u64)>,
    constant_buffers: [Option<BufferId>; MAX_CONSTANT_BUFFER_SLOTS],
    vertex_shader: Option<ShaderId>,
    pixel_shader: Option<ShaderId>,
    compute_shader: Option<ShaderId>,
    input_layout: Option<InputLayoutId>,
    topology: PrimitiveTopology,
    viewport: Viewport,
}

impl Bindings {
    fn new(width: u32, height: u32) -> Self {
        Self {
            textures: [None; MAX_TEXTURE_SLOTS],
            uavs: [None; MAX_UAV_SLOTS],
            vertex_buffers: [None; MAX_VERTEX_BUFFER_SLOTS],
            index_buffer: None,
            constant_buffers: [None; MAX_CONSTANT_BUFFER_SLOTS],
            vertex_shader: None,
            pixel_shader: None,
            compute_shader: None,
            input_layout: None,
            topology: PrimitiveTopology::default(),
            viewport: Viewport::from_size(width, height),
        }
    }

    fn forget_buffer(&mut self, buffer: BufferId) {
        for slot in &mut self.vertex_buffers {
            if slot.is_some_and(|view| view.buffer == buffer) {
                *slot = None;
            }
        }
        for slot in &mut self.constant_buffers {
            if *slot == Some(buffer) {
                *slot = None;
            }
        }
        if self.index_buffer.is_some_and(|(bound, ..)| bound == buffer) {
            self.index_buffer = None;
        }
    }

    fn forget_shader(&mut self, shader: ShaderId) {
        for bound in [&mut self.vertex_shader, &mut self.pixel_shader, &mut self.compute_shader] {
            if *bound == Some(shader) {
                *bound = None;
            }
        }
    }
}

enum Clear {
    Color([f32; 4]),
    Depth(f32),
}

pub struct VulkanDevice {
    name: String,
    instance: Instance,
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    physical: PhysicalDevice,
    device: Arc<ash::Device>,
    queue: Queue,
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,

    descriptor_device: DescriptorAshDevice,
    descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipelines: PipelineCache,

    transfer: Transfer,
    frame: Frame,

    swapchain: Swapchain,
    swapchain_images: Vec<ImageId>,
    present_semaphores: Vec<vk::Semaphore>,
    back_buffer_format: Format,
    requested_size: (u32, u32),
    acquired: Option<u32>,
    /// The acquire semaphore is signalled and no submission has waited on it yet
    acquire_pending: bool,

    images: SlotMap<ImageId, GpuImage>,
    views: SlotMap<ViewId, GpuView>,
    samplers: SlotMap<SamplerId, vk::Sampler>,
    buffers: SlotMap<BufferId, GpuBuffer>,
    shaders: SlotMap<ShaderId, ShaderModule>,
    input_layouts: SlotMap<InputLayoutId, InputLayout>,

    bindings: Bindings,
    attachments: Option<Attachments>,
    rendering: bool,
}

impl VulkanDevice {
    pub fn new(
        window: &(impl HasDisplayHandle + HasWindowHandle),
        size: (u32, u32),
        config: &RenderConfig,
    ) -> Result<Self> {
        let instance = Instance::new(&config.app_name, config.validation, window)?;
        let (surface, surface_loader) = instance.create_surface(window)?;
        let physical = device::select_physical_device(&instance.instance, surface, &surface_loader)?;
        let (logical, queue) = device::create_logical_device(&instance.instance, &physical)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical.clone(),
            physical_device: physical.handle,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        let device = Arc::new(logical);

        let (set_layout, pipeline_layout) = descriptors::create_slot_layouts(&device)?;
        let transfer = Transfer::new(queue, &device)?;
        let frame = Frame::new(queue, &device)?;

        let swapchain = Swapchain::new(
            &SwapchainTarget {
                instance: &instance.instance,
                device: &device,
                physical: physical.handle,
                surface,
                surface_loader: &surface_loader,
            },
            size,
            config.vsync,
            vk::SwapchainKHR::null(),
        )?;
        let back_buffer_format = back_buffer_format(&swapchain)?;

        let name = physical.name();
        log::info!("Using {} ({:?})", name, physical.properties.device_type);

        let mut this = Self {
            name,
            instance,
            surface,
            surface_loader,
            physical,
            descriptor_device: DescriptorAshDevice(device.clone()),
            device,
            queue,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            descriptor_allocator: DescriptorAllocator::new(1024),
            set_layout,
            pipeline_layout,
            pipelines: PipelineCache::default(),
            transfer,
            frame,
            swapchain,
            swapchain_images: Vec::new(),
            present_semaphores: Vec::new(),
            back_buffer_format,
            requested_size: size,
            acquired: None,
            acquire_pending: false,
            images: SlotMap::with_key(),
            views: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            input_layouts: SlotMap::with_key(),
            bindings: Bindings::new(size.0, size.1),
            attachments: None,
            rendering: false,
        };
        this.register_swapchain_images()?;
        Ok(this)
    }

    fn allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.allocator)
    }

    fn image(&self, image: ImageId) -> Result<&GpuImage> {
        self.images
            .get(image)
            .ok_or_else(|| RenderError::usage("image was already destroyed"))
    }

    fn view(&self, view: ViewId) -> Result<&GpuView> {
        self.views
            .get(view)
            .ok_or_else(|| RenderError::usage("view was already destroyed"))
    }

    fn shader(&self, shader: ShaderId) -> Result<&ShaderModule> {
        self.shaders
            .get(shader)
            .ok_or_else(|| RenderError::usage("shader was already destroyed"))
    }

    fn swapchain_target(&self) -> SwapchainTarget<'_> {
        SwapchainTarget {
            instance: &self.instance.instance,
            device: &self.device,
            physical: self.physical.handle,
            surface: self.surface,
            surface_loader: &self.surface_loader,
        }
    }

    /// Gives each swapchain image an id so it can be used like any other image
    fn register_swapchain_images(&mut self) -> Result<()> {
        for id in self.swapchain_images.drain(..) {
            self.images.remove(id);
        }
        for semaphore in self.present_semaphores.drain(..) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }

        let desc = ImageDesc {
            dimension: ImageDimension::D2,
            width: self.swapchain.extent.width,
            height: self.swapchain.extent.height,
            depth_or_layers: 1,
            format: self.back_buffer_format,
            samples: 1,
            usage: ImageUsage::COLOR_TARGET,
            cube_compatible: false,
        };
        for &raw in &self.swapchain.images {
            let image = GpuImage::borrowed(raw, desc, self.swapchain.surface_format.format);
            self.swapchain_images.push(self.images.insert(image));
            let semaphore =
                unsafe { self.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
            self.present_semaphores.push(semaphore);
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, size: (u32, u32), vsync: bool) -> Result<()> {
        self.flush()?;
        unsafe { self.device.device_wait_idle()? };

        let mut old = Swapchain::new(&self.swapchain_target(), size, vsync, self.swapchain.raw)?;
        std::mem::swap(&mut self.swapchain, &mut old);
        unsafe { old.destroy() };

        self.back_buffer_format = back_buffer_format(&self.swapchain)?;
        self.acquired = None;
        self.register_swapchain_images()
    }

    fn acquire(&mut self) -> Result<u32> {
        for attempt in 0..2 {
            let result = unsafe {
                self.swapchain.loader.acquire_next_image(
                    self.swapchain.raw,
                    u64::MAX,
                    self.frame.acquire_semaphore,
                    vk::Fence::null(),
                )
            };
            match result {
                Ok((index, suboptimal)) => {
                    if suboptimal {
                        log::debug!("Acquired a suboptimal swapchain image");
                    }
                    self.acquired = Some(index);
                    self.acquire_pending = true;
                    // Presentation leaves the contents undefined
                    if let Some(image) = self
                        .swapchain_images
                        .get(index as usize)
                        .and_then(|&id| self.images.get_mut(id))
                    {
                        image.layout = vk::ImageLayout::UNDEFINED;
                    }
                    return Ok(index);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) if attempt == 0 => {
                    log::debug!("Swapchain out of date on acquire, recreating");
                    self.recreate_swapchain(self.requested_size, self.swapchain.vsync)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RenderError::Device("swapchain stayed out of date after recreation".into()))
    }

    fn acquire_wait(&self) -> [vk::SemaphoreSubmitInfo<'static>; 1] {
        [vk::SemaphoreSubmitInfo::default()
            .semaphore(self.frame.acquire_semaphore)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)]
    }

    /// Submits everything recorded so far and waits for it
    fn flush(&mut self) -> Result<()> {
        self.end_rendering()?;
        if self.frame.is_recording() || self.acquire_pending {
            let wait = self.acquire_wait();
            let waits: &[_] = if self.acquire_pending { &wait } else { &[] };
            self.frame.submit(&self.device, self.queue, waits, &[])?;
            self.acquire_pending = false;
        }
        self.finish_frame()
    }

    fn finish_frame(&mut self) -> Result<()> {
        self.frame.wait(&self.device)?;
        let sets = std::mem::take(&mut self.frame.descriptor_sets);
        if !sets.is_empty() {
            unsafe { self.descriptor_allocator.free(&self.descriptor_device, sets) };
        }
        Ok(())
    }

    fn end_rendering(&mut self) -> Result<()> {
        if self.rendering {
            let cmd = self.frame.cmd(&self.device)?;
            unsafe { self.device.cmd_end_rendering(cmd) };
            self.rendering = false;
        }
        Ok(())
    }

    fn attachment(&self, view: ViewId) -> Result<(Attachment, &GpuImage)> {
        let view_entry = self.view(view)?;
        let image = self.image(view_entry.image)?;
        let attachment = Attachment {
            image: view_entry.image,
            view: view_entry.raw,
            format: convert::format(view_entry.desc.format),
        };
        Ok((attachment, image))
    }

    fn resolve_attachments(&self, colors: &[Option<ViewId>], depth: Option<ViewId>) -> Result<Option<Attachments>> {
        if colors.is_empty() && depth.is_none() {
            return Ok(None);
        }

        let mut attachments = Attachments {
            colors: SmallVec::new(),
            depth: None,
            extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            samples: 0,
        };
        let fit = |image: &GpuImage, attachments: &mut Attachments| {
            attachments.extent.width = attachments.extent.width.min(image.desc.width);
            attachments.extent.height = attachments.extent.height.min(image.desc.height);
        };

        for &view in colors {
            let Some(view) = view else {
                attachments.colors.push(None);
                continue;
            };
            let (attachment, image) = self.attachment(view)?;
            fit(image, &mut attachments);
            if attachments.samples == 0 {
                attachments.samples = image.desc.samples.max(1);
            }
            attachments.colors.push(Some(attachment));
        }
        if let Some(view) = depth {
            let (attachment, image) = self.attachment(view)?;
            let samples = image.desc.samples.max(1);
            if attachments.samples != 0 && attachments.samples != samples {
                log::warn!(
                    "Depth target has {} samples but color targets have {}; drawing without depth",
                    samples,
                    attachments.samples
                );
            } else {
                fit(image, &mut attachments);
                attachments.samples = samples;
                attachments.depth = Some(attachment);
            }
        }
        Ok(Some(attachments))
    }

    /// Moves bound images into the layouts the next draw or dispatch reads
    /// them in. Rendering is suspended if anything has to move.
    fn prepare_bound_images(&mut self, cmd: vk::CommandBuffer, graphics: bool) -> Result<()> {
        let mut wanted: SmallVec<[(ImageId, vk::ImageLayout); 32]> = SmallVec::new();
        for (view, _) in self.bindings.textures.iter().flatten() {
            if let Some(view) = self.views.get(*view) {
                wanted.push((view.image, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
            }
        }
        for view in self.bindings.uavs.iter().flatten() {
            if let Some(view) = self.views.get(*view) {
                wanted.push((view.image, vk::ImageLayout::GENERAL));
            }
        }
        if let Some(attachments) = self.attachments.as_ref().filter(|_| graphics) {
            for color in attachments.colors.iter().flatten() {
                wanted.push((color.image, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL));
            }
            if let Some(depth) = attachments.depth {
                wanted.push((depth.image, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
            }
        }

        let stale = wanted
            .iter()
            .any(|&(id, layout)| self.images.get(id).is_some_and(|image| image.layout != layout));
        if !stale {
            return Ok(());
        }

        self.end_rendering()?;
        for (id, layout) in wanted {
            if let Some(image) = self.images.get_mut(id) {
                util::transition_image(cmd, image, layout, &self.device);
            }
        }
        Ok(())
    }

    fn begin_rendering(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let attachments = self
            .attachments
            .as_ref()
            .ok_or_else(|| RenderError::usage("draw issued with no render targets bound"))?;

        let color_infos: SmallVec<[vk::RenderingAttachmentInfo<'_>; MAX_RENDER_TARGETS]> = attachments
            .colors
            .iter()
            .map(|color| match color {
                Some(color) => vk::RenderingAttachmentInfo::default()
                    .image_view(color.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE),
                // Writes to a null attachment are discarded
                None => vk::RenderingAttachmentInfo::default().image_view(vk::ImageView::null()),
            })
            .collect();
        let depth_info = attachments.depth.map(|depth| {
            vk::RenderingAttachmentInfo::default()
                .image_view(depth.view)
                .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: attachments.extent,
            })
            .layer_count(1)
            .color_attachments(&color_infos);
        if let Some(depth_info) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth_info);
            if attachments.depth.is_some_and(|depth| depth.format == vk::Format::D24_UNORM_S8_UINT) {
                rendering_info = rendering_info.stencil_attachment(depth_info);
            }
        }

        unsafe { self.device.cmd_begin_rendering(cmd, &rendering_info) };
        self.rendering = true;
        Ok(())
    }

    fn graphics_pipeline(&mut self, vertex_shader: ShaderId) -> Result<vk::Pipeline> {
        let attachments = self
            .attachments
            .as_ref()
            .ok_or_else(|| RenderError::usage("draw issued with no render targets bound"))?;
        let key = GraphicsPipelineKey {
            vertex_shader,
            pixel_shader: self.bindings.pixel_shader,
            input_layout: self.bindings.input_layout,
            topology: self.bindings.topology,
            color_formats: attachments
                .colors
                .iter()
                .map(|color| color.map_or(vk::Format::UNDEFINED, |color| color.format))
                .collect(),
            depth_format: attachments.depth.map(|depth| depth.format),
            samples: attachments.samples,
        };
        if let Some(pipeline) = self.pipelines.graphics(&key) {
            return Ok(pipeline);
        }

        let input_layout = match key.input_layout {
            Some(id) => Some(
                self.input_layouts
                    .get(id)
                    .ok_or_else(|| RenderError::usage("input layout was already destroyed"))?,
            ),
            None => None,
        };
        let pipeline = pipeline::create_graphics_pipeline(
            &GraphicsPipelineDesc {
                key: &key,
                vertex_shader: self.shader(vertex_shader)?,
                pixel_shader: key.pixel_shader.map(|id| self.shader(id)).transpose()?,
                input_layout,
                layout: self.pipeline_layout,
            },
            &self.device,
        )?;
        self.pipelines.insert_graphics(key, pipeline);
        Ok(pipeline)
    }

    fn compute_pipeline(&mut self, shader: ShaderId) -> Result<vk::Pipeline> {
        if let Some(pipeline) = self.pipelines.compute(shader) {
            return Ok(pipeline);
        }
        let pipeline = pipeline::create_compute_pipeline(self.shader(shader)?, self.pipeline_layout, &self.device)?;
        self.pipelines.insert_compute(shader, pipeline);
        Ok(pipeline)
    }

    /// Allocates a set for this frame and fills it from the bound slots
    fn write_descriptor_set(&mut self) -> Result<vk::DescriptorSet> {
        let mut sets = unsafe {
            self.descriptor_allocator.allocate(
                &self.descriptor_device,
                &self.set_layout,
                DescriptorSetLayoutCreateFlags::empty(),
                &descriptors::slot_set_counts(),
                1,
            )
        }
        .map_err(|e| RenderError::Device(format!("descriptor set allocation failed: {e:?}")))?;
        let set = sets
            .pop()
            .ok_or_else(|| RenderError::Device("descriptor allocator returned no set".into()))?;
        let raw = *set.raw();
        self.frame.descriptor_sets.push(set);

        let mut image_infos: SmallVec<[(u32, vk::DescriptorType, vk::DescriptorImageInfo); 20]> =
            SmallVec::new();
        for (slot, binding) in self.bindings.textures.iter().enumerate() {
            let Some((view, sampler)) = binding else { continue };
            let (Some(view), Some(sampler)) = (self.views.get(*view), self.samplers.get(*sampler)) else {
                continue;
            };
            image_infos.push((
                descriptors::TEXTURE_BINDING_BASE + slot as u32,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorImageInfo {
                    sampler: *sampler,
                    image_view: view.raw,
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            ));
        }
        for (slot, view) in self.bindings.uavs.iter().enumerate() {
            let Some(view) = view.and_then(|view| self.views.get(view)) else { continue };
            image_infos.push((
                descriptors::UAV_BINDING_BASE + slot as u32,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view.raw,
                    image_layout: vk::ImageLayout::GENERAL,
                },
            ));
        }
        let buffer_infos: SmallVec<[(u32, vk::DescriptorBufferInfo); MAX_CONSTANT_BUFFER_SLOTS]> = self
            .bindings
            .constant_buffers
            .iter()
            .enumerate()
            .filter_map(|(slot, buffer)| {
                let buffer = self.buffers.get((*buffer)?)?;
                Some((
                    descriptors::CONSTANT_BINDING_BASE + slot as u32,
                    vk::DescriptorBufferInfo {
                        buffer: buffer.raw,
                        offset: 0,
                        range: vk::WHOLE_SIZE,
                    },
                ))
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet<'_>> = image_infos
            .iter()
            .map(|(binding, ty, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(raw)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .image_info(std::slice::from_ref(info))
            })
            .chain(buffer_infos.iter().map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(raw)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
            }))
            .collect();
        if !writes.is_empty() {
            unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        }
        Ok(raw)
    }

    /// Everything a draw needs up to the draw command itself
    fn prepare_draw(&mut self) -> Result<vk::CommandBuffer> {
        let vertex_shader = self
            .bindings
            .vertex_shader
            .ok_or_else(|| RenderError::usage("draw issued with no vertex shader bound"))?;
        if self.attachments.is_none() {
            return Err(RenderError::usage("draw issued with no render targets bound"));
        }

        let cmd = self.frame.cmd(&self.device)?;
        self.prepare_bound_images(cmd, true)?;
        let pipeline = self.graphics_pipeline(vertex_shader)?;
        let set = self.write_descriptor_set()?;
        if !self.rendering {
            self.begin_rendering(cmd)?;
        }

        let vp = self.bindings.viewport;
        let viewport = vk::Viewport {
            x: vp.x,
            y: vp.y,
            width: vp.width,
            height: vp.height,
            min_depth: vp.min_depth,
            max_depth: vp.max_depth,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: vp.x.max(0.0) as i32,
                y: vp.y.max(0.0) as i32,
            },
            extent: vk::Extent2D {
                width: vp.width.max(0.0) as u32,
                height: vp.height.max(0.0) as u32,
            },
        };

        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[scissor]);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[set],
                &[],
            );
        }

        if let Some(layout) = self.bindings.input_layout.and_then(|id| self.input_layouts.get(id)) {
            for binding in &layout.bindings {
                let slot = binding.binding as usize;
                let Some(vertex_buffer) = self.bindings.vertex_buffers.get(slot).copied().flatten() else {
                    return Err(RenderError::usage(format!(
                        "vertex buffer slot {slot} is read by the input layout but not bound"
                    )));
                };
                let buffer = self
                    .buffers
                    .get(vertex_buffer.buffer)
                    .ok_or_else(|| RenderError::usage("vertex buffer was already destroyed"))?;
                unsafe {
                    self.device.cmd_bind_vertex_buffers2(
                        cmd,
                        binding.binding,
                        &[buffer.raw],
                        &[vertex_buffer.offset],
                        None,
                        Some(&[vertex_buffer.stride as vk::DeviceSize]),
                    );
                }
            }
        }
        Ok(cmd)
    }

    fn record_clear(&mut self, view: ViewId, clear: Clear) -> Result<()> {
        let image_id = self.view(view)?.image;
        self.end_rendering()?;
        let cmd = self.frame.cmd(&self.device)?;

        let image = image_entry(&mut self.images, image_id)?;
        util::transition_image(cmd, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &self.device);
        let range = vk::ImageSubresourceRange {
            aspect_mask: image.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };
        unsafe {
            match clear {
                Clear::Color(color) => {
                    let value = if image.desc.format == Format::R32Uint {
                        vk::ClearColorValue {
                            uint32: color.map(|c| c as u32),
                        }
                    } else {
                        vk::ClearColorValue { float32: color }
                    };
                    self.device.cmd_clear_color_image(
                        cmd,
                        image.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &value,
                        &[range],
                    );
                }
                Clear::Depth(depth) => self.device.cmd_clear_depth_stencil_image(
                    cmd,
                    image.raw,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &vk::ClearDepthStencilValue { depth, stencil: 0 },
                    &[range],
                ),
            }
        }
        Ok(())
    }

    /// Moves `src` and `dst` into transfer layouts, returning what a copy or
    /// resolve region needs
    fn prepare_transfer(
        &mut self,
        cmd: vk::CommandBuffer,
        dst: ImageId,
        src: ImageId,
    ) -> Result<(vk::Image, vk::Image, vk::ImageSubresourceLayers, vk::Extent3D)> {
        let src_image = image_entry(&mut self.images, src)?;
        util::transition_image(cmd, src_image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, &self.device);
        let (src_raw, layers, extent) = (src_image.raw, src_image.subresource_layers(), src_image.extent());

        let dst_image = image_entry(&mut self.images, dst)?;
        util::transition_image(cmd, dst_image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &self.device);
        Ok((dst_image.raw, src_raw, layers, extent))
    }

    fn record_resolve(&mut self, dst: ImageId, src: ImageId) -> Result<()> {
        self.end_rendering()?;
        let cmd = self.frame.cmd(&self.device)?;
        let (dst_raw, src_raw, layers, extent) = self.prepare_transfer(cmd, dst, src)?;
        let region = vk::ImageResolve::default()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(extent);
        unsafe {
            self.device.cmd_resolve_image(
                cmd,
                src_raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    fn record_copy(&mut self, dst: ImageId, src: ImageId) -> Result<()> {
        self.end_rendering()?;
        let cmd = self.frame.cmd(&self.device)?;
        let (dst_raw, src_raw, layers, extent) = self.prepare_transfer(cmd, dst, src)?;
        let region = vk::ImageCopy::default()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(extent);
        unsafe {
            self.device.cmd_copy_image(
                cmd,
                src_raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }
}

fn image_entry(images: &mut SlotMap<ImageId, GpuImage>, image: ImageId) -> Result<&mut GpuImage> {
    images
        .get_mut(image)
        .ok_or_else(|| RenderError::usage("image was already destroyed"))
}

fn back_buffer_format(swapchain: &Swapchain) -> Result<Format> {
    convert::from_vk_format(swapchain.surface_format.format).ok_or_else(|| {
        RenderError::Device(format!(
            "swapchain format {:?} has no matching format",
            swapchain.surface_format.format
        ))
    })
}

fn view_type(dimension: ViewDimension, layers: u32) -> vk::ImageViewType {
    match dimension {
        ViewDimension::D2 if layers > 1 => vk::ImageViewType::TYPE_2D_ARRAY,
        ViewDimension::D2 => vk::ImageViewType::TYPE_2D,
        ViewDimension::D3 => vk::ImageViewType::TYPE_3D,
        ViewDimension::Cube => vk::ImageViewType::CUBE,
    }
}

impl Device for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_image(&mut self, desc: &ImageDesc, data: Option<ImageData<'_>>) -> Result<ImageId> {
        let mut image = GpuImage::new(desc, "texture", self.allocator(), self.device.clone())?;

        if let Some(data) = data.filter(|data| !data.bytes.is_empty()) {
            let staging = GpuBuffer::staging(data.bytes, self.allocator(), self.device.clone())?;
            // Payload rows are tightly packed
            let region = vk::BufferImageCopy::default()
                .image_subresource(image.subresource_layers())
                .image_extent(image.extent());
            let resting = util::resting_layout(&image);
            self.transfer.immediate_submit(&self.device, |cmd, device| {
                util::transition_image(cmd, &mut image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, device);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging.raw,
                        image.raw,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                util::transition_image(cmd, &mut image, resting, device);
                Ok(())
            })?;
        }

        log::trace!("Created {}x{} {:?} image", desc.width, desc.height, desc.format);
        Ok(self.images.insert(image))
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(image) = self.images.remove(image) {
            self.frame.garbage.push(Garbage::Image(image));
        }
    }

    fn create_view(&mut self, image: ImageId, desc: &ViewDesc) -> Result<ViewId> {
        let target = self.image(image)?;
        let aspect_mask = match desc.kind {
            ViewKind::DepthStencil => target.aspect,
            _ => vk::ImageAspectFlags::COLOR,
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(target.raw)
            .view_type(view_type(desc.dimension, target.layer_count()))
            .format(convert::format(desc.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: vk::REMAINING_ARRAY_LAYERS,
            });
        let raw = unsafe { self.device.create_image_view(&view_info, None)? };
        Ok(self.views.insert(GpuView {
            raw,
            image,
            desc: *desc,
        }))
    }

    fn destroy_view(&mut self, view: ViewId) {
        if let Some(view) = self.views.remove(view) {
            self.frame.garbage.push(Garbage::View(view.raw));
        }
    }

    fn create_sampler(&mut self, wrap: WrapMode) -> Result<SamplerId> {
        let raw = unsafe { self.device.create_sampler(&convert::sampler_info(wrap), None)? };
        Ok(self.samplers.insert(raw))
    }

    fn destroy_sampler(&mut self, sampler: SamplerId) {
        if let Some(raw) = self.samplers.remove(sampler) {
            self.frame.garbage.push(Garbage::Sampler(raw));
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, size: u64, data: Option<&[u8]>) -> Result<BufferId> {
        let buffer = GpuBuffer::new(
            size,
            convert::buffer_usage(kind),
            "buffer",
            MemoryLocation::GpuOnly,
            self.allocator(),
            self.device.clone(),
        )?;

        if let Some(data) = data.filter(|data| !data.is_empty()) {
            let staging = GpuBuffer::staging(data, self.allocator(), self.device.clone())?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: data.len() as u64,
            };
            self.transfer.immediate_submit(&self.device, |cmd, device| {
                unsafe { device.cmd_copy_buffer(cmd, staging.raw, buffer.raw, &[region]) };
                Ok(())
            })?;
        }

        Ok(self.buffers.insert(buffer))
    }

    fn write_buffer(&mut self, buffer: BufferId, data: &[u8]) -> Result<()> {
        let target = self
            .buffers
            .get(buffer)
            .ok_or_else(|| RenderError::usage("buffer was already destroyed"))?;
        let (dst, capacity) = (target.raw, target.size);
        if data.len() as u64 > capacity {
            return Err(RenderError::BufferOverflow {
                len: data.len() as u64,
                capacity,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let staging = GpuBuffer::staging(data, self.allocator(), self.device.clone())?;
        self.end_rendering()?;
        let cmd = self.frame.cmd(&self.device)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: data.len() as u64,
        };
        util::memory_barrier(cmd, &self.device);
        unsafe { self.device.cmd_copy_buffer(cmd, staging.raw, dst, &[region]) };
        util::memory_barrier(cmd, &self.device);
        self.frame.garbage.push(Garbage::Buffer(staging));
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.bindings.forget_buffer(buffer);
        if let Some(buffer) = self.buffers.remove(buffer) {
            self.frame.garbage.push(Garbage::Buffer(buffer));
        }
    }

    fn create_shader_module(&mut self, shader: &CompiledShader) -> Result<ShaderId> {
        let entry_point = CString::new(shader.entry_point.as_str()).map_err(|_| {
            RenderError::Device(format!("entry point of {} contains a NUL byte", shader.name))
        })?;
        let module_info = vk::ShaderModuleCreateInfo::default().code(&shader.spirv);
        let raw = unsafe { self.device.create_shader_module(&module_info, None)? };
        log::debug!("Created {:?} shader module {}", shader.stage, shader.name);
        Ok(self.shaders.insert(ShaderModule {
            raw,
            stage: shader.stage,
            entry_point,
        }))
    }

    fn destroy_shader_module(&mut self, shader: ShaderId) {
        self.bindings.forget_shader(shader);
        for pipeline in self.pipelines.evict_shader(shader) {
            self.frame.garbage.push(Garbage::Pipeline(pipeline));
        }
        if let Some(module) = self.shaders.remove(shader) {
            self.frame.garbage.push(Garbage::ShaderModule(module.raw));
        }
    }

    fn create_input_layout(
        &mut self,
        attributes: &[VertexAttribute],
        _shader: &CompiledShader,
    ) -> Result<InputLayoutId> {
        Ok(self.input_layouts.insert(InputLayout::new(attributes)))
    }

    fn destroy_input_layout(&mut self, layout: InputLayoutId) {
        if self.bindings.input_layout == Some(layout) {
            self.bindings.input_layout = None;
        }
        for pipeline in self.pipelines.evict_input_layout(layout) {
            self.frame.garbage.push(Garbage::Pipeline(pipeline));
        }
        self.input_layouts.remove(layout);
    }

    fn set_shader_resource(&mut self, slot: u32, binding: Option<(ViewId, SamplerId)>) {
        if let Some(entry) = self.bindings.textures.get_mut(slot as usize) {
            *entry = binding;
        }
    }

    fn set_unordered_access(&mut self, slot: u32, view: Option<ViewId>) {
        if let Some(entry) = self.bindings.uavs.get_mut(slot as usize) {
            *entry = view;
        }
    }

    fn set_vertex_buffers(&mut self, first_slot: u32, buffers: &[VertexBufferView]) {
        for (i, buffer) in buffers.iter().enumerate() {
            if let Some(entry) = self.bindings.vertex_buffers.get_mut(first_slot as usize + i) {
                *entry = Some(*buffer);
            }
        }
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferId>, format: IndexFormat, offset: u64) {
        self.bindings.index_buffer = buffer.map(|buffer| (buffer, format, offset));
    }

    fn set_constant_buffers(&mut self, first_slot: u32, buffers: &[BufferId]) {
        for (i, buffer) in buffers.iter().enumerate() {
            if let Some(entry) = self.bindings.constant_buffers.get_mut(first_slot as usize + i) {
                *entry = Some(*buffer);
            }
        }
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderId>) {
        match stage {
            ShaderStage::Vertex => self.bindings.vertex_shader = shader,
            ShaderStage::Pixel => self.bindings.pixel_shader = shader,
            ShaderStage::Compute => self.bindings.compute_shader = shader,
        }
    }

    fn set_input_layout(&mut self, layout: Option<InputLayoutId>) {
        self.bindings.input_layout = layout;
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.bindings.topology = topology;
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.bindings.viewport = *viewport;
    }

    fn set_render_targets(&mut self, colors: &[Option<ViewId>], depth: Option<ViewId>) -> Result<()> {
        self.end_rendering()?;
        self.attachments = None;
        self.attachments = self.resolve_attachments(colors, depth)?;
        Ok(())
    }

    fn clear_render_target(&mut self, view: ViewId, color: [f32; 4]) -> Result<()> {
        self.record_clear(view, Clear::Color(color))
    }

    fn clear_depth_stencil(&mut self, view: ViewId, depth: f32) -> Result<()> {
        self.record_clear(view, Clear::Depth(depth))
    }

    fn resolve_image(&mut self, dst: ImageId, src: ImageId, _format: Format) -> Result<()> {
        self.record_resolve(dst, src)
    }

    fn copy_image(&mut self, dst: ImageId, src: ImageId) -> Result<()> {
        self.record_copy(dst, src)
    }

    fn map_image(&mut self, image: ImageId) -> Result<MappedImage<'_>> {
        if !self.image(image)?.desc.usage.contains(ImageUsage::CPU_READ) {
            return Err(RenderError::usage("only CPU-read images can be mapped"));
        }

        self.end_rendering()?;
        let cmd = self.frame.cmd(&self.device)?;
        let target = image_entry(&mut self.images, image)?;
        util::transition_image(cmd, target, vk::ImageLayout::GENERAL, &self.device);
        util::host_read_barrier(cmd, &self.device);
        self.flush()?;

        let target = self.image(image)?;
        let layout = unsafe {
            self.device.get_image_subresource_layout(
                target.raw,
                vk::ImageSubresource {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    array_layer: 0,
                },
            )
        };
        let mapped = target
            .mapped_slice()
            .ok_or_else(|| RenderError::Device("CPU-read image memory is not host visible".into()))?;
        let start = layout.offset as usize;
        let data = mapped
            .get(start..start + layout.size as usize)
            .ok_or_else(|| RenderError::Device("image layout exceeds its allocation".into()))?;
        Ok(MappedImage {
            data,
            row_pitch: layout.row_pitch,
        })
    }

    fn unmap_image(&mut self, image: ImageId) {
        // CPU-read memory stays mapped for the lifetime of the image
        log::trace!("Unmapped {:?}", image);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        let cmd = self.prepare_draw()?;
        unsafe {
            self.device
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        };
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        let (buffer, format, offset) = self
            .bindings
            .index_buffer
            .ok_or_else(|| RenderError::usage("indexed draw issued with no index buffer bound"))?;
        let raw = self
            .buffers
            .get(buffer)
            .ok_or_else(|| RenderError::usage("index buffer was already destroyed"))?
            .raw;

        let cmd = self.prepare_draw()?;
        unsafe {
            self.device
                .cmd_bind_index_buffer(cmd, raw, offset, convert::index_type(format));
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        let shader = self
            .bindings
            .compute_shader
            .ok_or_else(|| RenderError::usage("dispatch issued with no compute shader bound"))?;

        self.end_rendering()?;
        let cmd = self.frame.cmd(&self.device)?;
        self.prepare_bound_images(cmd, false)?;
        let pipeline = self.compute_pipeline(shader)?;
        let set = self.write_descriptor_set()?;
        unsafe {
            self.device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline);
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                &[set],
                &[],
            );
            self.device.cmd_dispatch(cmd, x, y, z);
        }
        util::memory_barrier(cmd, &self.device);
        Ok(())
    }

    fn back_buffer(&mut self) -> Result<ImageId> {
        let index = match self.acquired {
            Some(index) => index,
            None => self.acquire()?,
        };
        self.swapchain_images
            .get(index as usize)
            .copied()
            .ok_or_else(|| RenderError::Device(format!("swapchain image {index} is not registered")))
    }

    fn back_buffer_format(&self) -> Format {
        self.back_buffer_format
    }

    fn swapchain_size(&self) -> (u32, u32) {
        (self.swapchain.extent.width, self.swapchain.extent.height)
    }

    fn resize_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.requested_size = (width, height);
        self.recreate_swapchain((width, height), self.swapchain.vsync)
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        self.end_rendering()?;
        let index = match self.acquired {
            Some(index) => index,
            None => self.acquire()?,
        };

        let cmd = self.frame.cmd(&self.device)?;
        if let Some(image) = self
            .swapchain_images
            .get(index as usize)
            .and_then(|&id| self.images.get_mut(id))
        {
            util::transition_image(cmd, image, vk::ImageLayout::PRESENT_SRC_KHR, &self.device);
        }

        let render_finished = self
            .present_semaphores
            .get(index as usize)
            .copied()
            .ok_or_else(|| RenderError::Device(format!("swapchain image {index} has no semaphore")))?;
        let wait = self.acquire_wait();
        let waits: &[_] = if self.acquire_pending { &wait } else { &[] };
        let signals = [vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        self.frame.submit(&self.device, self.queue, waits, &signals)?;
        self.acquire_pending = false;
        self.acquired = None;

        let wait_semaphores = [render_finished];
        let swapchains = [self.swapchain.raw];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe { self.swapchain.loader.queue_present(self.queue.handle, &present_info) };

        self.finish_frame()?;

        let stale = match result {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => return Err(e.into()),
        };
        if stale || vsync != self.swapchain.vsync {
            log::debug!("Recreating swapchain (stale: {}, vsync: {})", stale, vsync);
            self.recreate_swapchain(self.requested_size, vsync)?;
        }
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("Failed to wait for the device to go idle: {}", e);
            }

            for pipeline in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline, None);
            }
            self.frame.destroy_garbage(&self.device);
            let sets = std::mem::take(&mut self.frame.descriptor_sets);
            self.descriptor_allocator.free(&self.descriptor_device, sets);
            self.descriptor_allocator.cleanup(&self.descriptor_device);

            for (_, view) in self.views.drain() {
                self.device.destroy_image_view(view.raw, None);
            }
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, module) in self.shaders.drain() {
                self.device.destroy_shader_module(module.raw, None);
            }
            self.input_layouts.clear();
            self.swapchain_images.clear();
            self.images.clear();
            self.buffers.clear();

            self.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
            for semaphore in self.present_semaphores.drain(..) {
                self.device.destroy_semaphore(semaphore, None);
            }
            self.frame.destroy(&self.device);
            self.transfer.destroy(&self.device);
            self.swapchain.destroy();
            self.surface_loader.destroy_surface(self.surface, None);

            // Frees every memory block; nothing may hold the allocator past this point
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy();
        }
        log::debug!("Vulkan device destroyed");
    }
}
