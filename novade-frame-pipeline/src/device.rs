//! The device contract shared by every pipeline component.
//!
//! [`GpuDevice`] is the narrow surface through which the scheduler, the
//! swapchain manager, the resource lifecycle and the capture service reach
//! the logical device, its queue and the presentation surface. The production
//! implementation is [`crate::vulkan::VulkanDevice`]; handles are plain `ash`
//! handles so either side of the trait speaks the same vocabulary.

use ash::prelude::VkResult;
use ash::vk;

/// Parameters for a swapchain (re)build.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Previous chain handed to the driver as a hint; null on first creation.
    pub old_swapchain: vk::SwapchainKHR,
}

/// A depth attachment and its backing memory.
#[derive(Debug, Clone, Copy)]
pub struct DepthImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
}

/// A linear, host-visible image that receives a copy of a presented image.
#[derive(Debug, Clone, Copy)]
pub struct StagingImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub extent: vk::Extent2D,
    /// Byte offset of the first texel inside `memory`.
    pub offset: u64,
    /// Bytes between the starts of consecutive rows.
    pub row_pitch: u64,
    /// One-shot command buffer of the copy; null until submitted.
    pub copy_commands: vk::CommandBuffer,
}

/// One SPIR-V stage of a pipeline.
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub spirv: Vec<u8>,
    pub entry_point: String,
}

/// Specialization constants applied to every stage of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct Specialization {
    pub entries: Vec<vk::SpecializationMapEntry>,
    pub data: Vec<u8>,
}

impl Specialization {
    /// Appends `value` to the data block under `constant_id`.
    pub fn constant(&mut self, constant_id: u32, value: &[u8]) {
        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset: self.data.len() as u32,
            size: value.len(),
        });
        self.data.extend_from_slice(value);
    }
}

/// Static, pre-validated description of a graphics pipeline.
///
/// Supplied once by the resource-configuration collaborator and rebuilt
/// verbatim against every new set of render targets.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub name: String,
    pub stages: Vec<ShaderStage>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    /// Required when `topology` is `PATCH_LIST`.
    pub tessellation_patch_control_points: Option<u32>,
    pub specialization: Option<Specialization>,
    pub depth_test: bool,
}

impl PipelineDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            push_constant_ranges: Vec::new(),
            set_layouts: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            tessellation_patch_control_points: None,
            specialization: None,
            depth_test: false,
        }
    }

    pub fn stage(mut self, stage: vk::ShaderStageFlags, spirv: impl Into<Vec<u8>>) -> Self {
        self.stages.push(ShaderStage {
            stage,
            spirv: spirv.into(),
            entry_point: "main".to_string(),
        });
        self
    }

    pub fn vertex_binding(mut self, binding: u32, stride: u32) -> Self {
        self.vertex_bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        self
    }

    pub fn vertex_attribute(mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        self.vertex_attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        });
        self
    }

    pub fn push_constants(mut self, stage_flags: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags,
            offset,
            size,
        });
        self
    }

    pub fn set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn primitive_restart(mut self, enabled: bool) -> Self {
        self.primitive_restart = enabled;
        self
    }

    /// Adds tessellation control and evaluation stages and switches the
    /// topology to patches of `patch_control_points` vertices.
    pub fn tessellation(
        mut self,
        control_spirv: impl Into<Vec<u8>>,
        evaluation_spirv: impl Into<Vec<u8>>,
        patch_control_points: u32,
    ) -> Self {
        self = self
            .stage(vk::ShaderStageFlags::TESSELLATION_CONTROL, control_spirv)
            .stage(vk::ShaderStageFlags::TESSELLATION_EVALUATION, evaluation_spirv);
        self.topology = vk::PrimitiveTopology::PATCH_LIST;
        self.tessellation_patch_control_points = Some(patch_control_points);
        self
    }

    /// Sets specialization constant `constant_id` to the bytes of `value`.
    pub fn specialization_constant(mut self, constant_id: u32, value: &[u8]) -> Self {
        self.specialization
            .get_or_insert_with(Specialization::default)
            .constant(constant_id, value);
        self
    }

    pub fn depth_test(mut self, enabled: bool) -> Self {
        self.depth_test = enabled;
        self
    }

    pub fn is_tessellated(&self) -> bool {
        self.topology == vk::PrimitiveTopology::PATCH_LIST
    }

    /// Patch size of a tessellated pipeline, `None` for other topologies.
    /// A patch list without a non-zero patch size cannot be built.
    pub fn patch_control_points(&self) -> VkResult<Option<u32>> {
        match (self.is_tessellated(), self.tessellation_patch_control_points) {
            (true, Some(points)) if points > 0 => Ok(Some(points)),
            (true, _) => Err(vk::Result::ERROR_INITIALIZATION_FAILED),
            (false, _) => Ok(None),
        }
    }
}

/// A built pipeline and the layout it was created with.
#[derive(Debug, Clone, Copy)]
pub struct PipelineHandles {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

/// Logical device, queue and surface operations used by the frame pipeline.
///
/// Methods mirror single Vulkan calls (or short fixed sequences of them, such
/// as the staging copy) and return raw `vk::Result` codes; callers decide
/// which codes are recoverable. `destroy_*` methods must tolerate being
/// called with handles that are no longer referenced by pending GPU work
/// only; callers guarantee that through fences or `wait_idle`.
pub trait GpuDevice: Send + Sync + 'static {
    // Synchronization.
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns `Err(vk::Result::TIMEOUT)` if the fence is still unsignaled.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn wait_idle(&self) -> VkResult<()>;

    // Surface and swapchain.
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn choose_surface_format(&self) -> VkResult<vk::SurfaceFormatKHR>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Returns the image index and whether the chain is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the chain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // Render targets and pipelines.
    fn depth_format(&self) -> VkResult<vk::Format>;
    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<DepthImage>;
    fn destroy_depth_image(&self, depth: DepthImage);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> VkResult<PipelineHandles>;
    fn destroy_pipeline(&self, handles: PipelineHandles);

    // Command recording and submission.
    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
    /// Resets the buffer and begins one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    /// Submits with `wait` at COLOR_ATTACHMENT_OUTPUT, signalling `signal` and `fence`.
    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()>;

    // Capture.
    /// Linear, host-visible image matching the source image's format.
    fn create_staging_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<StagingImage>;
    /// Records the layout transitions and copy from a presented image into
    /// `staging` on a one-shot command buffer and submits it signalling `fence`.
    fn submit_copy_to_staging(
        &self,
        source: vk::Image,
        staging: &mut StagingImage,
        fence: vk::Fence,
    ) -> VkResult<()>;
    /// Maps the staging memory and copies `len` bytes starting at its offset.
    fn read_staging_image(&self, staging: &StagingImage, len: usize) -> VkResult<Vec<u8>>;
    fn destroy_staging_image(&self, staging: StagingImage);
}
