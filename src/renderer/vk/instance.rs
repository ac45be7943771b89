use std::ffi::{CStr, c_char, c_void};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::renderer::error::Result;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Keeps the Vulkan entry, instance and optional debug messenger alive
pub struct Instance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    pub fn new(app_name: &str, validation: bool, display: &impl HasDisplayHandle) -> Result<Self> {
        let entry = ash::Entry::linked();

        let validation = validation && validation_layer_supported(&entry)?;

        let app_name = std::ffi::CString::new(app_name).unwrap_or_default();
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .engine_name(c"ember")
            .api_version(vk::API_VERSION_1_3);

        let enabled_layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };
        let enabled_extension_names = required_instance_extensions(display, validation)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let instance = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_utils_messenger_create_info(), None)?
            };
            Some((loader, messenger))
        } else {
            None
        };

        log::debug!("Created Vulkan instance (validation: {})", validation);
        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    pub fn create_surface(
        &self,
        window: &(impl HasDisplayHandle + HasWindowHandle),
    ) -> Result<(vk::SurfaceKHR, ash::khr::surface::Instance)> {
        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);
        Ok((surface, surface_loader))
    }

    /// Destroys the messenger and the instance. Everything created from the
    /// instance must already be gone.
    pub unsafe fn destroy(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn required_instance_extensions(
    display: &impl HasDisplayHandle,
    validation: bool,
) -> Result<Vec<&'static CStr>> {
    let mut exts = ash_window::enumerate_required_extensions(display.display_handle()?.as_raw())?
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(*ext) })
        .collect::<Vec<_>>();

    if validation {
        exts.push(ash::ext::debug_utils::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        exts.push(ash::khr::portability_enumeration::NAME);
        exts.push(ash::khr::get_physical_device_properties2::NAME);
    }

    Ok(exts)
}

fn validation_layer_supported(entry: &ash::Entry) -> Result<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let supported = layers
        .iter()
        .any(|props| props.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
    if !supported {
        log::warn!("Validation layer {:?} not available, continuing without it", VALIDATION_LAYER);
    }
    Ok(supported)
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe {
        if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::trace!("{} {}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::debug!("{} {}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{} {}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{} {}", msg_type, msg),
        _ => log::warn!("[Unknown]{} {}", msg_type, msg),
    }

    vk::FALSE
}

