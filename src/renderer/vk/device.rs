use std::ffi::{CStr, c_char};

use ash::vk;

use crate::renderer::error::{RenderError, Result};

/// The single queue everything is submitted to. It supports graphics,
/// compute and presentation to the window surface.
#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_family_index: u32,
}

impl PhysicalDevice {
    pub fn name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown device".into())
    }
}

/// Picks the most capable device with the required extensions and a queue
/// family that can both draw and present to `surface`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    devices
        .into_iter()
        .filter(|&device| {
            let supported_extensions = unsafe {
                instance
                    .enumerate_device_extension_properties(device)
                    .unwrap_or_default()
            };
            required_device_extensions().iter().all(|required| {
                let found = supported_extensions
                    .iter()
                    .any(|ext| ext.extension_name_as_c_str() == Ok(*required));
                if !found {
                    log::debug!("Device extension not supported: {:?}", required);
                }
                found
            })
        })
        .filter(|&device| {
            let properties = unsafe { instance.get_physical_device_properties(device) };
            properties.api_version >= vk::API_VERSION_1_3
        })
        .filter_map(|device| {
            let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
            let queue_family_index = families.iter().enumerate().position(|(i, family)| {
                let flags = family.queue_flags;
                let supports_present = unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, i as u32, surface)
                        .unwrap_or(false)
                };
                flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) && supports_present
            })?;
            Some(PhysicalDevice {
                handle: device,
                properties: unsafe { instance.get_physical_device_properties(device) },
                queue_family_index: queue_family_index as u32,
            })
        })
        .min_by_key(|device| match device.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
            vk::PhysicalDeviceType::CPU => 3,
            _ => 4,
        })
        .ok_or_else(|| RenderError::Device("no suitable physical device found".into()))
}

pub fn create_logical_device(
    instance: &ash::Instance,
    physical: &PhysicalDevice,
) -> Result<(ash::Device, Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(physical.queue_family_index)
        .queue_priorities(&queue_priorities)];

    let enabled_extension_names = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect::<Vec<*const c_char>>();

    let features = vk::PhysicalDeviceFeatures::default().sample_rate_shading(false);
    let mut vulkan12_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_binding_partially_bound(true);
    let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&enabled_extension_names)
        .enabled_features(&features)
        .push_next(&mut vulkan12_features)
        .push_next(&mut vulkan13_features);

    let device = unsafe { instance.create_device(physical.handle, &device_create_info, None)? };
    let queue = Queue {
        family_index: physical.queue_family_index,
        handle: unsafe { device.get_device_queue(physical.queue_family_index, 0) },
    };

    Ok((device, queue))
}

fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}
