use crate::config::PresentModePreference;
use crate::error::{RenderError, Result};
use ash::extensions::khr::{Surface, Swapchain};
use ash::prelude::VkResult;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;
use std::os::raw::c_char;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }
}

fn find_queue_families(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
    pdevice: vk::PhysicalDevice,
) -> QueueFamilyIndices {
    let queue_families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
    let mut indices = QueueFamilyIndices::default();

    for (i, queue_family) in queue_families.iter().enumerate() {
        let index = i as u32;
        if queue_family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && indices.graphics_family.is_none() {
            indices.graphics_family = Some(index);
        }
        let presentation_support = unsafe {
            surface_loader.get_physical_device_surface_support(pdevice, index, surface)
        }
        .unwrap_or(false);
        if presentation_support && indices.present_family.is_none() {
            indices.present_family = Some(index);
        }
        if indices.is_complete() {
            break;
        }
    }
    indices
}

fn supports_swapchain(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> bool {
    let Ok(available_extensions) = (unsafe { instance.enumerate_device_extension_properties(pdevice) }) else {
        return false;
    };
    available_extensions.iter().any(|ext_prop| {
        let available = unsafe { CStr::from_ptr(ext_prop.extension_name.as_ptr()) };
        available == Swapchain::name()
    })
}

/// Picks the highest scoring device that can render and present to `surface`.
/// Discrete GPUs beat integrated ones, which beat everything else.
pub(crate) fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(RenderError::vulkan("vkEnumeratePhysicalDevices"))?;
    info!("Found {} physical devices.", physical_devices.len());

    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilyIndices)> = None;
    for pdevice in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        let device_name =
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        info!("Evaluating device: {}", device_name);

        if !supports_swapchain(instance, pdevice) {
            info!("Device {} does not support VK_KHR_swapchain", device_name);
            continue;
        }
        let indices = find_queue_families(instance, surface_loader, surface, pdevice);
        if !indices.is_complete() {
            info!(
                "Device {} does not have all required queue families. Graphics: {:?}, Present: {:?}",
                device_name, indices.graphics_family, indices.present_family
            );
            continue;
        }

        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 500,
            _ => 1,
        };
        if best.map_or(true, |(best_score, _, _)| score > best_score) {
            best = Some((score, pdevice, indices));
        }
    }

    let (_, pdevice, indices) = best.ok_or_else(|| {
        RenderError::NoSuitableDevice(
            "no device supports graphics, presentation and VK_KHR_swapchain".to_string(),
        )
    })?;
    let properties = unsafe { instance.get_physical_device_properties(pdevice) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
    info!(
        "Best physical device: {} with queue families: Graphics: {:?}, Present: {:?}",
        name, indices.graphics_family, indices.present_family
    );
    Ok((pdevice, indices))
}

/// Creates the logical device and returns it with its graphics and present
/// queues (which may be the same queue).
pub(crate) fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    indices: &QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue, u32)> {
    let missing = || RenderError::NoSuitableDevice("queue family indices incomplete".to_string());
    let graphics_family_idx = indices.graphics_family.ok_or_else(missing)?;
    let present_family_idx = indices.present_family.ok_or_else(missing)?;

    let unique_queue_families: HashSet<u32> =
        [graphics_family_idx, present_family_idx].into_iter().collect();
    let queue_priorities = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_queue_families
        .into_iter()
        .map(|queue_family_index| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(queue_family_index)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    // Tessellated pipelines need the feature; enable it wherever it exists.
    let supported = unsafe { instance.get_physical_device_features(physical_device) };
    let physical_device_features = vk::PhysicalDeviceFeatures::builder()
        .tessellation_shader(supported.tessellation_shader == vk::TRUE);
    let device_extensions_names_raw: [*const c_char; 1] = [Swapchain::name().as_ptr()];

    let device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&physical_device_features)
        .enabled_extension_names(&device_extensions_names_raw);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .map_err(RenderError::vulkan("vkCreateDevice"))?;
    info!("Logical device created successfully.");

    let graphics_queue = unsafe { device.get_device_queue(graphics_family_idx, 0) };
    let present_queue = unsafe { device.get_device_queue(present_family_idx, 0) };
    Ok((device, graphics_queue, present_queue, graphics_family_idx))
}

/// Index of a memory type allowed by `type_bits` that has all of `flags`.
pub(crate) fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    properties.memory_types[..properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(flags)
        })
        .map(|(i, _)| i as u32)
}

/// First format usable as an optimally tiled depth attachment.
pub(crate) fn find_depth_format(
    instance: &ash::Instance,
    pdevice: vk::PhysicalDevice,
) -> VkResult<vk::Format> {
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ]
    .into_iter()
    .find(|&format| {
        let props = unsafe { instance.get_physical_device_format_properties(pdevice, format) };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
}

/// Prefers B8G8R8A8_SRGB with a non-linear sRGB color space, else the first
/// reported format.
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|fmt| {
            fmt.format == vk::Format::B8G8R8A8_SRGB
                && fmt.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// The preferred mode when supported; FIFO otherwise (always available).
pub(crate) fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    let wanted = match preference {
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    };
    if available.contains(&wanted) {
        wanted
    } else {
        vk::PresentModeKHR::FIFO
    }
}
