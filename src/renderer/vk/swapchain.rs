use ash::vk;

use crate::renderer::error::{RenderError, Result};
use crate::renderer::vk::convert;

pub struct Swapchain {
    pub loader: ash::khr::swapchain::Device,
    pub raw: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub vsync: bool,
}

/// What a swapchain is created from. Kept by the device so the swapchain
/// can be rebuilt on resize or when vsync changes.
pub struct SwapchainTarget<'a> {
    pub instance: &'a ash::Instance,
    pub device: &'a ash::Device,
    pub physical: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: &'a ash::khr::surface::Instance,
}

impl Swapchain {
    pub fn new(
        target: &SwapchainTarget<'_>,
        requested: (u32, u32),
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let surface_capabilities = unsafe {
            target
                .surface_loader
                .get_physical_device_surface_capabilities(target.physical, target.surface)?
        };
        let surface_format = choose_surface_format(target)?;
        let present_mode = choose_present_mode(target, vsync)?;

        let extent = if surface_capabilities.current_extent.width != u32::MAX {
            surface_capabilities.current_extent
        } else {
            vk::Extent2D {
                width: requested.0.clamp(
                    surface_capabilities.min_image_extent.width,
                    surface_capabilities.max_image_extent.width,
                ),
                height: requested.1.clamp(
                    surface_capabilities.min_image_extent.height,
                    surface_capabilities.max_image_extent.height,
                ),
            }
        };

        let min_image_count = {
            let min = surface_capabilities.min_image_count;
            let max = surface_capabilities.max_image_count;
            if max > 0 && min + 1 > max { max } else { min + 1 }
        };
        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let loader = ash::khr::swapchain::Device::new(target.instance, target.device);
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(target.surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);

        let raw = unsafe { loader.create_swapchain(&swapchain_info, None)? };
        let images = match unsafe { loader.get_swapchain_images(raw) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(raw, None) };
                return Err(e.into());
            }
        };

        log::debug!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            present_mode
        );

        Ok(Self {
            loader,
            raw,
            images,
            surface_format,
            extent,
            vsync,
        })
    }

    pub unsafe fn destroy(&mut self) {
        unsafe { self.loader.destroy_swapchain(self.raw, None) };
        self.raw = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

fn choose_surface_format(target: &SwapchainTarget<'_>) -> Result<vk::SurfaceFormatKHR> {
    let formats = unsafe {
        target
            .surface_loader
            .get_physical_device_surface_formats(target.physical, target.surface)?
    };
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
        .or_else(|| formats.iter().find(|f| convert::from_vk_format(f.format).is_some()))
        .copied()
        .ok_or_else(|| RenderError::Device("surface offers no usable format".into()))
}

fn choose_present_mode(target: &SwapchainTarget<'_>, vsync: bool) -> Result<vk::PresentModeKHR> {
    if vsync {
        return Ok(vk::PresentModeKHR::FIFO);
    }
    let modes = unsafe {
        target
            .surface_loader
            .get_physical_device_surface_present_modes(target.physical, target.surface)?
    };
    Ok([vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO))
}
