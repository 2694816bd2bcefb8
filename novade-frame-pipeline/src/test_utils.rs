//! A CPU-side [`GpuDevice`] for unit tests.
//!
//! `MockDevice` mints unique handles, records every call in order, tracks
//! which handles are alive, and simulates the queue: a submitted fence stays
//! unsignaled until something waits on it (or the device is idled), at which
//! point the "GPU" completes it. Acquire and present results can be scripted.

use crate::device::{
    DepthImage, GpuDevice, PipelineDescriptor, PipelineHandles, StagingImage, SwapchainDesc,
};
use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    WaitIdle,
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        old: vk::SwapchainKHR,
        extent: vk::Extent2D,
        image_count: u32,
    },
    DestroySwapchain(vk::SwapchainKHR),
    Acquire(vk::SwapchainKHR),
    Present { swapchain: vk::SwapchainKHR, image_index: u32 },
    CreateRenderPass(vk::RenderPass),
    DestroyRenderPass(vk::RenderPass),
    CreateDepthImage(vk::Extent2D),
    DestroyDepthImage,
    CreateFramebuffer(vk::Extent2D),
    DestroyFramebuffer(vk::Framebuffer),
    CreatePipeline(String),
    DestroyPipeline(vk::Pipeline),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: usize,
    },
    SetViewportAndScissor(vk::Extent2D),
    EndRenderPass(vk::CommandBuffer),
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    CopyToStaging { source: vk::Image },
    DestroyStagingImage,
}

#[derive(Default)]
struct FenceState {
    signaled: bool,
    pending: bool,
    frame: bool,
}

struct MockState {
    calls: Vec<Call>,
    live: HashMap<u64, &'static str>,
    invalid_destroys: Vec<(&'static str, u64)>,
    fences: HashMap<u64, FenceState>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: u32,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    capabilities: vk::SurfaceCapabilitiesKHR,
    surface_format: vk::SurfaceFormatKHR,
    row_pitch: Option<u64>,
    pixel: Option<[u8; 4]>,
    copies: u64,
    copy_hangs: bool,
    fail_next_create: Option<vk::Result>,
    max_frames_in_flight: usize,
    built_pipelines: Vec<PipelineDescriptor>,
}

pub struct MockDevice {
    state: Mutex<MockState>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            // Undefined: the application chooses the extent, as on Wayland.
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        Self {
            state: Mutex::new(MockState {
                calls: Vec::new(),
                live: HashMap::new(),
                invalid_destroys: Vec::new(),
                fences: HashMap::new(),
                swapchain_images: HashMap::new(),
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                capabilities,
                surface_format: vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                row_pitch: None,
                pixel: None,
                copies: 0,
                copy_hangs: false,
                fail_next_create: None,
                max_frames_in_flight: 0,
                built_pipelines: Vec::new(),
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    // Scripting.

    pub fn script_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.state().present_script.push_back(result);
    }

    pub fn set_capabilities(&self, f: impl FnOnce(&mut vk::SurfaceCapabilitiesKHR)) {
        f(&mut self.state().capabilities);
    }

    pub fn set_surface_format(&self, format: vk::Format) {
        self.state().surface_format.format = format;
    }

    pub fn set_row_pitch(&self, row_pitch: u64) {
        self.state().row_pitch = Some(row_pitch);
    }

    /// Fills staged images with this BGRA pixel instead of the copy counter.
    pub fn set_pixel(&self, pixel: [u8; 4]) {
        self.state().pixel = Some(pixel);
    }

    /// Staging copies never complete.
    pub fn hang_copies(&self) {
        self.state().copy_hangs = true;
    }

    pub fn fail_next_create(&self, result: vk::Result) {
        self.state().fail_next_create = Some(result);
    }

    // Inspection.

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(*c)).count()
    }

    /// Every descriptor a pipeline was built from, in build order.
    pub fn built_pipelines(&self) -> Vec<PipelineDescriptor> {
        self.state().built_pipelines.clone()
    }

    pub fn live_handle_count(&self) -> usize {
        self.state().live.len()
    }

    pub fn live_of_kind(&self, kind: &str) -> usize {
        self.state().live.values().filter(|k| **k == kind).count()
    }

    pub fn invalid_destroys(&self) -> Vec<(&'static str, u64)> {
        self.state().invalid_destroys.clone()
    }

    /// Highest number of frame submissions whose fences were unsignaled at once.
    pub fn max_frames_in_flight(&self) -> usize {
        self.state().max_frames_in_flight
    }

    pub fn frames_in_flight(&self) -> usize {
        self.state()
            .fences
            .values()
            .filter(|f| f.pending && f.frame)
            .count()
    }

    // Helpers.

    fn mint(&self, state: &mut MockState, kind: &'static str) -> VkResult<u64> {
        if let Some(result) = state.fail_next_create.take() {
            return Err(result);
        }
        // Handles are unique across kinds; 0 stays reserved for null.
        static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
        let raw = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        state.live.insert(raw, kind);
        Ok(raw)
    }

    fn release(state: &mut MockState, kind: &'static str, raw: u64) {
        match state.live.remove(&raw) {
            Some(k) if k == kind => {}
            _ => state.invalid_destroys.push((kind, raw)),
        }
    }

    fn complete(state: &mut MockState, fence: u64) {
        if let Some(f) = state.fences.get_mut(&fence) {
            if f.pending {
                f.pending = false;
                f.signaled = true;
            }
        }
    }
}

impl GpuDevice for MockDevice {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state();
        let raw = self.mint(&mut state, "fence")?;
        state.fences.insert(
            raw,
            FenceState {
                signaled,
                ..Default::default()
            },
        );
        let fence = vk::Fence::from_raw(raw);
        state.calls.push(Call::CreateFence(fence));
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence.as_raw());
        Self::release(&mut state, "fence", fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::WaitFence(fence));
        let hangs = state.copy_hangs;
        let Some(f) = state.fences.get_mut(&fence.as_raw()) else {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        };
        if f.pending && !(hangs && !f.frame) {
            f.pending = false;
            f.signaled = true;
        }
        if f.signaled {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::ResetFence(fence));
        if let Some(f) = state.fences.get_mut(&fence.as_raw()) {
            f.signaled = false;
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state();
        Ok(vk::Semaphore::from_raw(self.mint(&mut state, "semaphore")?))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        Self::release(&mut self.state(), "semaphore", semaphore.as_raw());
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::WaitIdle);
        let pending: Vec<u64> = state
            .fences
            .iter()
            .filter(|(_, f)| f.pending && f.frame)
            .map(|(raw, _)| *raw)
            .collect();
        for raw in pending {
            Self::complete(&mut state, raw);
        }
        Ok(())
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state().capabilities)
    }

    fn choose_surface_format(&self) -> VkResult<vk::SurfaceFormatKHR> {
        Ok(self.state().surface_format)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let swapchain = vk::SwapchainKHR::from_raw(self.mint(&mut state, "swapchain")?);
        let mut images = Vec::new();
        for _ in 0..desc.image_count {
            // Presentable images belong to the chain and are not tracked as live.
            let raw = self.mint(&mut state, "image")?;
            state.live.remove(&raw);
            images.push(vk::Image::from_raw(raw));
        }
        state.swapchain_images.insert(swapchain.as_raw(), images);
        state.calls.push(Call::CreateSwapchain {
            swapchain,
            old: desc.old_swapchain,
            extent: desc.extent,
            image_count: desc.image_count,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.state()
            .swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.swapchain_images.remove(&swapchain.as_raw());
        state.calls.push(Call::DestroySwapchain(swapchain));
        Self::release(&mut state, "swapchain", swapchain.as_raw());
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut state = self.state();
        Ok(vk::ImageView::from_raw(self.mint(&mut state, "image_view")?))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        Self::release(&mut self.state(), "image_view", view.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state();
        state.calls.push(Call::Acquire(swapchain));
        if let Some(result) = state.acquire_script.pop_front() {
            return result;
        }
        let count = state
            .swapchain_images
            .get(&swapchain.as_raw())
            .map(|images| images.len() as u32)
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let index = state.next_image % count;
        state.next_image = state.next_image.wrapping_add(1);
        Ok((index, false))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state();
        state.calls.push(Call::Present {
            swapchain,
            image_index,
        });
        state.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn depth_format(&self) -> VkResult<vk::Format> {
        Ok(vk::Format::D32_SFLOAT)
    }

    fn create_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: vk::Format,
    ) -> VkResult<vk::RenderPass> {
        let mut state = self.state();
        let render_pass = vk::RenderPass::from_raw(self.mint(&mut state, "render_pass")?);
        state.calls.push(Call::CreateRenderPass(render_pass));
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state();
        state.calls.push(Call::DestroyRenderPass(render_pass));
        Self::release(&mut state, "render_pass", render_pass.as_raw());
    }

    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> VkResult<DepthImage> {
        let mut state = self.state();
        let image = vk::Image::from_raw(self.mint(&mut state, "depth_image")?);
        let memory = vk::DeviceMemory::from_raw(self.mint(&mut state, "memory")?);
        state.calls.push(Call::CreateDepthImage(extent));
        Ok(DepthImage {
            image,
            memory,
            format,
        })
    }

    fn destroy_depth_image(&self, depth: DepthImage) {
        let mut state = self.state();
        state.calls.push(Call::DestroyDepthImage);
        Self::release(&mut state, "depth_image", depth.image.as_raw());
        Self::release(&mut state, "memory", depth.memory.as_raw());
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut state = self.state();
        let framebuffer = vk::Framebuffer::from_raw(self.mint(&mut state, "framebuffer")?);
        state.calls.push(Call::CreateFramebuffer(extent));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state();
        state.calls.push(Call::DestroyFramebuffer(framebuffer));
        Self::release(&mut state, "framebuffer", framebuffer.as_raw());
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
        _render_pass: vk::RenderPass,
        _extent: vk::Extent2D,
    ) -> VkResult<PipelineHandles> {
        desc.patch_control_points()?;
        let mut state = self.state();
        let layout = vk::PipelineLayout::from_raw(self.mint(&mut state, "pipeline_layout")?);
        let pipeline = vk::Pipeline::from_raw(self.mint(&mut state, "pipeline")?);
        state.calls.push(Call::CreatePipeline(desc.name.clone()));
        state.built_pipelines.push(desc.clone());
        Ok(PipelineHandles { layout, pipeline })
    }

    fn destroy_pipeline(&self, handles: PipelineHandles) {
        let mut state = self.state();
        state.calls.push(Call::DestroyPipeline(handles.pipeline));
        Self::release(&mut state, "pipeline", handles.pipeline.as_raw());
        Self::release(&mut state, "pipeline_layout", handles.layout.as_raw());
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state();
        Ok(vk::CommandBuffer::from_raw(
            self.mint(&mut state, "command_buffer")?,
        ))
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        Self::release(&mut self.state(), "command_buffer", command_buffer.as_raw());
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state()
            .calls
            .push(Call::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state().calls.push(Call::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        self.state().calls.push(Call::BeginRenderPass {
            framebuffer,
            extent,
            clear_values: clear_values.len(),
        });
    }

    fn cmd_set_viewport_and_scissor(&self, _command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        self.state().calls.push(Call::SetViewportAndScissor(extent));
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state().calls.push(Call::EndRenderPass(command_buffer));
    }

    fn queue_submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Submit {
            command_buffer,
            wait,
            signal,
            fence,
        });
        if let Some(f) = state.fences.get_mut(&fence.as_raw()) {
            if f.signaled {
                // Submitting with a signaled fence is invalid usage.
                return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
            }
            f.pending = true;
            f.frame = true;
        }
        let in_flight = state
            .fences
            .values()
            .filter(|f| f.pending && f.frame)
            .count();
        state.max_frames_in_flight = state.max_frames_in_flight.max(in_flight);
        Ok(())
    }

    fn create_staging_image(&self, extent: vk::Extent2D, _format: vk::Format) -> VkResult<StagingImage> {
        let mut state = self.state();
        let image = vk::Image::from_raw(self.mint(&mut state, "staging_image")?);
        let memory = vk::DeviceMemory::from_raw(self.mint(&mut state, "memory")?);
        let row_pitch = state.row_pitch.unwrap_or(extent.width as u64 * 4);
        Ok(StagingImage {
            image,
            memory,
            extent,
            offset: 0,
            row_pitch,
            copy_commands: vk::CommandBuffer::null(),
        })
    }

    fn submit_copy_to_staging(
        &self,
        source: vk::Image,
        staging: &mut StagingImage,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state();
        staging.copy_commands = vk::CommandBuffer::from_raw(self.mint(&mut state, "command_buffer")?);
        state.calls.push(Call::CopyToStaging { source });
        state.copies += 1;
        if let Some(f) = state.fences.get_mut(&fence.as_raw()) {
            f.pending = true;
        }
        Ok(())
    }

    fn read_staging_image(&self, _staging: &StagingImage, len: usize) -> VkResult<Vec<u8>> {
        let state = self.state();
        Ok(match state.pixel {
            Some(pixel) => pixel.iter().copied().cycle().take(len).collect(),
            None => vec![state.copies as u8; len],
        })
    }

    fn destroy_staging_image(&self, staging: StagingImage) {
        let mut state = self.state();
        state.calls.push(Call::DestroyStagingImage);
        if staging.copy_commands != vk::CommandBuffer::null() {
            Self::release(&mut state, "command_buffer", staging.copy_commands.as_raw());
        }
        Self::release(&mut state, "staging_image", staging.image.as_raw());
        Self::release(&mut state, "memory", staging.memory.as_raw());
    }
}
