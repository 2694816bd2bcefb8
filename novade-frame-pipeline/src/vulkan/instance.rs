use ash::extensions::ext::DebugUtils;
use ash::prelude::VkResult;
use ash::vk;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use tracing::info;

const VALIDATION_LAYER: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };
const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"NovaDE\0") };

/// Forwards validation output into `tracing` under the `vulkan` target.
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = *p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::debug!(target: "vulkan", "[VERBOSE] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "vulkan", "[INFO] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkan", "[WARNING] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkan", "[ERROR] type: {:?}, id: {} ({}), message: {}", message_type, message_id_name, message_id_number, message);
        }
        _ => {
            tracing::trace!(target: "vulkan", "[UNKNOWN] severity: {:?}, type: {:?}, id: {} ({}), message: {}", message_severity, message_type, message_id_name, message_id_number, message);
        }
    }
    vk::FALSE
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

/// An instance and, when validation is on, its debug messenger.
pub(crate) struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

/// Creates the instance with `VK_KHR_surface` plus `surface_extensions`.
///
/// With `enable_validation` the Khronos validation layer and
/// `VK_EXT_debug_utils` are enabled and instance creation itself is covered
/// by the messenger.
pub(crate) fn create_instance(
    entry: &ash::Entry,
    application_name: &CStr,
    enable_validation: bool,
    surface_extensions: &[&CStr],
) -> VkResult<InstanceBundle> {
    let app_info = vk::ApplicationInfo::builder()
        .application_name(application_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let mut instance_extensions: Vec<*const c_char> =
        vec![ash::extensions::khr::Surface::name().as_ptr()];
    instance_extensions.extend(surface_extensions.iter().map(|ext| ext.as_ptr()));
    if enable_validation {
        instance_extensions.push(DebugUtils::name().as_ptr());
    }

    let mut enabled_layer_names: Vec<*const c_char> = Vec::new();
    if enable_validation {
        enabled_layer_names.push(VALIDATION_LAYER.as_ptr());
    }

    let mut debug_messenger_create_info = debug_messenger_info();
    let mut instance_create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&instance_extensions)
        .enabled_layer_names(&enabled_layer_names);
    if enable_validation {
        instance_create_info = instance_create_info.push_next(&mut debug_messenger_create_info);
    }

    let instance = unsafe { entry.create_instance(&instance_create_info, None)? };
    info!("Vulkan instance created successfully.");

    let mut debug = None;
    if enable_validation {
        let loader = DebugUtils::new(entry, &instance);
        match unsafe { loader.create_debug_utils_messenger(&debug_messenger_info(), None) } {
            Ok(messenger) => {
                debug = Some((loader, messenger));
                info!("Vulkan debug messenger created successfully.");
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    }

    Ok(InstanceBundle { instance, debug })
}

/// Application name as a C string; interior NULs are dropped.
pub(crate) fn application_name(name: &str) -> CString {
    CString::new(name.replace('\0', "")).unwrap_or_default()
}
