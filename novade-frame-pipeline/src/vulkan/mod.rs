//! The `ash` implementation of [`GpuDevice`].
//!
//! [`VulkanDevice`] owns the instance, the optional debug messenger, the
//! surface, the logical device with its queues, and a command pool. Every
//! other GPU object is created through the trait and owned by the pipeline
//! components, which hold an `Arc<VulkanDevice>` so the device is destroyed
//! last.

mod capture;
mod instance;
mod physical;
mod pipeline;
mod surface;

pub use surface::SurfaceProvider;
#[cfg(feature = "wayland")]
pub use surface::WaylandSurfaceProvider;

use crate::config::{PresentModePreference, RendererConfig};
use crate::device::{
    DepthImage, GpuDevice, PipelineDescriptor, PipelineHandles, StagingImage, SwapchainDesc,
};
use crate::error::{RenderError, Result};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain};
use ash::prelude::VkResult;
use ash::vk;
use physical::QueueFamilyIndices;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub struct VulkanDevice {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_family_indices: QueueFamilyIndices,
    device: ash::Device,
    swapchain_loader: Swapchain,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Guards the pool and both queues, which need external synchronization.
    command_pool: Mutex<vk::CommandPool>,
    present_mode: PresentModePreference,
}

impl VulkanDevice {
    /// Loads Vulkan, creates the instance and surface, and opens the best
    /// device that can present to it.
    pub fn new(config: &RendererConfig, surface_provider: &dyn SurfaceProvider) -> Result<Self> {
        let entry = unsafe { ash::Entry::load()? };
        let app_name = instance::application_name(&config.application_name);
        let bundle = instance::create_instance(
            &entry,
            &app_name,
            config.enable_validation,
            &surface_provider.instance_extensions(),
        )
        .map_err(RenderError::vulkan("vkCreateInstance"))?;
        let instance = bundle.instance;
        let debug = bundle.debug;
        let release_instance = |debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>| unsafe {
            if let Some((loader, messenger)) = debug {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface_loader = Surface::new(&entry, &instance);
        let surface = match surface_provider.create_surface(&entry, &instance) {
            Ok(surface) => surface,
            Err(e) => {
                release_instance(debug);
                return Err(RenderError::Vulkan {
                    call: "create surface",
                    result: e,
                });
            }
        };

        let opened = physical::select_physical_device(&instance, &surface_loader, surface)
            .and_then(|(physical_device, indices)| {
                let (device, graphics_queue, present_queue, graphics_family) =
                    physical::create_logical_device(&instance, physical_device, &indices)?;
                Ok((physical_device, indices, device, graphics_queue, present_queue, graphics_family))
            });
        let (physical_device, queue_family_indices, device, graphics_queue, present_queue, graphics_family) =
            match opened {
                Ok(opened) => opened,
                Err(e) => {
                    unsafe { surface_loader.destroy_surface(surface, None) };
                    release_instance(debug);
                    return Err(e);
                }
            };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                }
                release_instance(debug);
                return Err(RenderError::Vulkan {
                    call: "vkCreateCommandPool",
                    result: e,
                });
            }
        };

        let swapchain_loader = Swapchain::new(&instance, &device);
        info!("Vulkan device ready");

        Ok(Self {
            entry,
            instance,
            debug,
            surface_loader,
            surface,
            physical_device,
            memory_properties,
            queue_family_indices,
            device,
            swapchain_loader,
            graphics_queue,
            present_queue,
            command_pool: Mutex::new(command_pool),
            present_mode: config.present_mode,
        })
    }

    fn pool(&self) -> MutexGuard<'_, vk::CommandPool> {
        self.command_pool
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate_device_local_image(
        &self,
        info: &vk::ImageCreateInfo,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        let image = unsafe { self.device.create_image(info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let Some(memory_type_index) = physical::find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) else {
            unsafe { self.device.destroy_image(image, None) };
            return Err(vk::Result::ERROR_FEATURE_NOT_PRESENT);
        };
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { self.device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };
        if let Err(e) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.free_memory(memory, None);
                self.device.destroy_image(image, None);
            }
            return Err(e);
        }
        Ok((image, memory))
    }
}

impl GpuDevice for VulkanDevice {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn wait_idle(&self) -> VkResult<()> {
        let _queues = self.pool();
        unsafe { self.device.device_wait_idle() }
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
    }

    fn choose_surface_format(&self) -> VkResult<vk::SurfaceFormatKHR> {
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)?
        };
        physical::choose_surface_format(&formats).ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)?
        };
        let present_mode = physical::choose_present_mode(&present_modes, self.present_mode);

        let graphics_family_idx = self
            .queue_family_indices
            .graphics_family
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        let present_family_idx = self
            .queue_family_indices
            .present_family
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        let queue_family_indices = [graphics_family_idx, present_family_idx];

        let mut swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        if graphics_family_idx != present_family_idx {
            swapchain_create_info = swapchain_create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&queue_family_indices);
        } else {
            swapchain_create_info =
                swapchain_create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE);
        }

        let swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&swapchain_create_info, None)?
        };
        debug!(?present_mode, "VkSwapchainKHR created");
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let image_view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&image_view_create_info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let _queues = self.pool();
        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        }
    }

    fn depth_format(&self) -> VkResult<vk::Format> {
        physical::find_depth_format(&self.instance, self.physical_device)
    }

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> VkResult<vk::RenderPass> {
        pipeline::create_render_pass(&self.device, color_format, depth_format)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<DepthImage> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let (image, memory) = self.allocate_device_local_image(&info)?;
        Ok(DepthImage {
            image,
            memory,
            format,
        })
    }

    fn destroy_depth_image(&self, depth: DepthImage) {
        unsafe {
            self.device.destroy_image(depth.image, None);
            self.device.free_memory(depth.memory, None);
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&framebuffer_create_info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> VkResult<PipelineHandles> {
        pipeline::create_graphics_pipeline(&self.device, desc, render_pass, extent)
    }

    fn destroy_pipeline(&self, handles: PipelineHandles) {
        unsafe {
            self.device.destroy_pipeline(handles.pipeline, None);
            self.device.destroy_pipeline_layout(handles.layout, None);
        }
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let pool = self.pool();
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info)? };
        buffers.first().copied().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let pool = self.pool();
        unsafe { self.device.free_command_buffers(*pool, &[command_buffer]) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(command_buffer, &begin_info)
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
    }

    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [signal];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        let _queues = self.pool();
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        }
    }

    fn create_staging_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<StagingImage> {
        capture::create_staging_image(&self.device, &self.memory_properties, extent, format)
    }

    fn submit_copy_to_staging(
        &self,
        source: vk::Image,
        staging: &mut StagingImage,
        fence: vk::Fence,
    ) -> VkResult<()> {
        staging.copy_commands = self.allocate_command_buffer()?;
        capture::record_copy(&self.device, staging.copy_commands, source, staging)?;

        let command_buffers = [staging.copy_commands];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();
        let _queues = self.pool();
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        }
    }

    fn read_staging_image(&self, staging: &StagingImage, len: usize) -> VkResult<Vec<u8>> {
        capture::read_staging(&self.device, staging, len)
    }

    fn destroy_staging_image(&self, staging: StagingImage) {
        if staging.copy_commands != vk::CommandBuffer::null() {
            self.free_command_buffer(staging.copy_commands);
        }
        unsafe {
            self.device.destroy_image(staging.image, None);
            self.device.free_memory(staging.memory, None);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            let pool = *self.pool();
            self.device.destroy_command_pool(pool, None);

            info!("Destroying Vulkan logical device...");
            self.device.destroy_device(None);

            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
                info!("Vulkan debug messenger destroyed.");
            }

            info!("Destroying Vulkan instance...");
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HeadlessProvider;

    impl SurfaceProvider for HeadlessProvider {
        fn instance_extensions(&self) -> Vec<&'static std::ffi::CStr> {
            Vec::new()
        }

        fn create_surface(&self, _entry: &ash::Entry, _instance: &ash::Instance) -> VkResult<vk::SurfaceKHR> {
            Err(vk::Result::ERROR_INITIALIZATION_FAILED)
        }
    }

    #[test]
    fn device_creation_without_a_surface_fails_cleanly() {
        let _guard = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).try_init();

        match VulkanDevice::new(&RendererConfig::default(), &HeadlessProvider) {
            Ok(_) => panic!("a device must not be created without a surface"),
            Err(RenderError::Loading(e)) => {
                tracing::warn!("Vulkan loader unavailable in this environment: {}", e);
            }
            Err(e) => {
                tracing::warn!("VulkanDevice creation failed as expected: {}", e);
            }
        }
    }
}
