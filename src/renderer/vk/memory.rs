//! Buffers and images backed by gpu-allocator memory.
//!
//! Both wrappers free their memory and destroy the native handle on drop, so
//! the owning device must drop them before the allocator and the logical
//! device go away.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};

use crate::renderer::device::{ImageDesc, ImageDimension, ImageUsage};
use crate::renderer::error::{RenderError, Result};
use crate::renderer::vk::convert;

fn lock(allocator: &Mutex<Allocator>) -> Result<std::sync::MutexGuard<'_, Allocator>> {
    allocator
        .lock()
        .map_err(|e| RenderError::Device(format!("allocator lock poisoned: {e}")))
}

pub struct GpuBuffer {
    pub raw: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl GpuBuffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        location: MemoryLocation,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { device.create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.get_buffer_memory_requirements(raw) };
        let allocation = lock(&memory_allocator)?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(raw, None) };
                return Err(e.into());
            }
        };

        unsafe { device.bind_buffer_memory(raw, allocation.memory(), allocation.offset())? };

        Ok(Self {
            raw,
            size,
            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }

    /// Host-visible staging buffer holding a copy of `data`
    pub fn staging(
        data: &[u8],
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let mut buffer = Self::new(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "staging",
            MemoryLocation::CpuToGpu,
            memory_allocator,
            device,
        )?;
        buffer.write(data, 0)?;
        Ok(buffer)
    }

    /// Copies `data` into host-visible memory at `offset`
    pub fn write(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let allocation = self
            .allocation
            .as_mut()
            .ok_or_else(|| RenderError::Device("buffer has no memory".into()))?;
        presser::copy_from_slice_to_offset(data, allocation, offset)
            .map_err(|e| RenderError::Device(format!("buffer write failed: {e:?}")))?;
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match lock(&self.memory_allocator) {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free buffer memory: {}", e);
                    }
                }
                Err(e) => log::error!("{}", e),
            }
        }
        unsafe { self.device.destroy_buffer(self.raw, None) };
    }
}

/// Owner of an image's memory. Swapchain images have none.
struct ImageMemory {
    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

pub struct GpuImage {
    pub raw: vk::Image,
    pub desc: ImageDesc,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
    /// Layout after every command recorded so far
    pub layout: vk::ImageLayout,

    memory: Option<ImageMemory>,
}

impl GpuImage {
    pub fn new(
        desc: &ImageDesc,
        name: &str,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let format = convert::format(desc.format);
        let cpu_read = desc.usage.contains(ImageUsage::CPU_READ);
        let tiling = if cpu_read {
            vk::ImageTiling::LINEAR
        } else {
            vk::ImageTiling::OPTIMAL
        };
        let mut flags = vk::ImageCreateFlags::empty();
        if desc.cube_compatible {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(match desc.dimension {
                ImageDimension::D2 => vk::ImageType::TYPE_2D,
                ImageDimension::D3 => vk::ImageType::TYPE_3D,
            })
            .format(format)
            .extent(extent(desc))
            .mip_levels(1)
            .array_layers(layer_count(desc))
            .samples(convert::sample_count(desc.samples))
            .tiling(tiling)
            .usage(convert::image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { device.create_image(&image_info, None)? };

        let requirements = unsafe { device.get_image_memory_requirements(raw) };
        let allocation = lock(&memory_allocator)?.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: if cpu_read {
                MemoryLocation::GpuToCpu
            } else {
                MemoryLocation::GpuOnly
            },
            linear: cpu_read,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(raw, None) };
                return Err(e.into());
            }
        };

        unsafe { device.bind_image_memory(raw, allocation.memory(), allocation.offset())? };

        Ok(Self {
            raw,
            desc: *desc,
            format,
            aspect: convert::aspect(desc.format),
            layout: vk::ImageLayout::UNDEFINED,
            memory: Some(ImageMemory {
                allocation: Some(allocation),
                memory_allocator,
                device,
            }),
        })
    }

    /// Wraps an image owned by the swapchain
    pub fn borrowed(raw: vk::Image, desc: ImageDesc, format: vk::Format) -> Self {
        Self {
            raw,
            desc,
            format,
            aspect: vk::ImageAspectFlags::COLOR,
            layout: vk::ImageLayout::UNDEFINED,
            memory: None,
        }
    }

    pub fn extent(&self) -> vk::Extent3D {
        extent(&self.desc)
    }

    pub fn layer_count(&self) -> u32 {
        layer_count(&self.desc)
    }

    pub fn subresource_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(self.aspect)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(self.layer_count())
    }

    /// Host pointer of a CPU-read image
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.memory.as_ref()?.allocation.as_ref()?.mapped_slice()
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        let Some(memory) = self.memory.as_mut() else {
            return;
        };
        if let Some(allocation) = memory.allocation.take() {
            match lock(&memory.memory_allocator) {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free image memory: {}", e);
                    }
                }
                Err(e) => log::error!("{}", e),
            }
        }
        unsafe { memory.device.destroy_image(self.raw, None) };
    }
}

fn extent(desc: &ImageDesc) -> vk::Extent3D {
    vk::Extent3D {
        width: desc.width,
        height: desc.height,
        depth: match desc.dimension {
            ImageDimension::D3 => desc.depth_or_layers.max(1),
            ImageDimension::D2 => 1,
        },
    }
}

fn layer_count(desc: &ImageDesc) -> u32 {
    match desc.dimension {
        ImageDimension::D2 => desc.depth_or_layers.max(1),
        ImageDimension::D3 => 1,
    }
}
