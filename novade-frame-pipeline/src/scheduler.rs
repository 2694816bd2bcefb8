//! The double-buffered frame driver.
//!
//! [`FrameScheduler`] alternates two frame slots. Each `begin_frame` waits
//! for the slot's previous submission, acquires an image (rebuilding the
//! swapchain when it is out of date) and opens the render pass; `end_frame`
//! submits and presents. At most two submissions are in flight at any time.

use crate::command::{CommandRecorder, RenderPassScope};
use crate::device::{GpuDevice, PipelineDescriptor, PipelineHandles};
use crate::error::{RenderError, Result};
use crate::lifecycle::{lookup, NamedPipeline, ResourceLifecycle};
use crate::swapchain::{Acquired, Presented, SwapchainManager};
use crate::sync::{create_frame_sync_list, FrameSync, Semaphore};
use ash::vk;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const FRAMES_IN_FLIGHT: usize = 2;

/// Where a slot is in its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presented,
}

struct FrameSlot<D: GpuDevice> {
    device: Arc<D>,
    command_buffer: vk::CommandBuffer,
    sync: FrameSync<D>,
    /// The fence has an outstanding submission. False on first use, so the
    /// never-signaled fence is not waited on.
    submitted: bool,
    state: SlotState,
}

impl<D: GpuDevice> FrameSlot<D> {
    fn new(device: &Arc<D>, sync: FrameSync<D>) -> Result<Self> {
        let command_buffer = device
            .allocate_command_buffer()
            .map_err(RenderError::vulkan("vkAllocateCommandBuffers"))?;
        Ok(Self {
            device: Arc::clone(device),
            command_buffer,
            sync,
            submitted: false,
            state: SlotState::Idle,
        })
    }
}

impl<D: GpuDevice> Drop for FrameSlot<D> {
    fn drop(&mut self) {
        self.device.free_command_buffer(self.command_buffer);
    }
}

/// A presented image that can be copied out by the capture service.
///
/// Valid until the next swapchain rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentedImage {
    pub image: vk::Image,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub frame_number: u64,
}

/// The recording context of one frame, handed to draw collaborators between
/// `begin_frame` and `end_frame`.
#[must_use = "a begun frame must be finished with end_frame"]
pub struct FrameContext {
    slot: usize,
    frame_number: u64,
    scope: RenderPassScope,
    pipelines: Arc<Vec<NamedPipeline>>,
}

impl FrameContext {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.scope.command_buffer()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.scope.extent()
    }

    pub fn image_index(&self) -> u32 {
        self.scope.image_index()
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// The pipeline built from the descriptor called `name`.
    pub fn pipeline(&self, name: &str) -> Option<PipelineHandles> {
        lookup(&self.pipelines, name)
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("slot", &self.slot)
            .field("frame_number", &self.frame_number)
            .field("image_index", &self.scope.image_index())
            .finish()
    }
}

pub struct FrameScheduler<D: GpuDevice> {
    device: Arc<D>,
    slots: Vec<FrameSlot<D>>,
    recorder: CommandRecorder<D>,
    // Declared before `swapchain` so dependents drop before the chain.
    lifecycle: ResourceLifecycle<D>,
    swapchain: SwapchainManager<D>,
    current: usize,
    requested_extent: vk::Extent2D,
    pending_resize: Option<vk::Extent2D>,
    recreate_requested: bool,
    minimized: bool,
    frame_count: u64,
    last_presented: Option<PresentedImage>,
}

impl<D: GpuDevice> FrameScheduler<D> {
    pub fn new(
        device: Arc<D>,
        extent: vk::Extent2D,
        pipelines: Vec<PipelineDescriptor>,
    ) -> Result<Self> {
        let swapchain = SwapchainManager::new(Arc::clone(&device), extent)?;
        let lifecycle = ResourceLifecycle::new(Arc::clone(&device), &swapchain, pipelines)?;
        let slots = create_frame_sync_list(&device, FRAMES_IN_FLIGHT)?
            .into_iter()
            .map(|sync| FrameSlot::new(&device, sync))
            .collect::<Result<Vec<_>>>()?;
        let minimized = !has_area(extent);
        info!(
            width = extent.width,
            height = extent.height,
            frames_in_flight = FRAMES_IN_FLIGHT,
            "Frame scheduler initialized"
        );
        Ok(Self {
            recorder: CommandRecorder::new(Arc::clone(&device)),
            device,
            slots,
            lifecycle,
            swapchain,
            current: 0,
            requested_extent: extent,
            pending_resize: None,
            recreate_requested: false,
            minimized,
            frame_count: 0,
            last_presented: None,
        })
    }

    /// Records a surface resize, applied at the next `begin_frame`.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some(vk::Extent2D { width, height });
    }

    /// Forces a recreate at the next `begin_frame`, e.g. after the surface
    /// was invalidated.
    pub fn request_recreate(&mut self) {
        self.recreate_requested = true;
    }

    /// Starts a frame. Returns `Ok(None)` while the surface has zero area.
    pub fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        if self.slots[self.current].state != SlotState::Idle {
            self.discard_abandoned_frame()?;
        }
        self.apply_pending_resize()?;
        if self.minimized {
            return Ok(None);
        }

        let slot = &mut self.slots[self.current];
        if slot.submitted {
            slot.sync
                .in_flight
                .wait(u64::MAX)
                .map_err(RenderError::vulkan("vkWaitForFences"))?;
            slot.submitted = false;
        }
        slot.state = SlotState::Acquiring;
        let image_available = slot.sync.image_available.raw();

        let image_index = match self.swapchain.acquire(image_available)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    self.recreate_requested = true;
                }
                index
            }
            Acquired::OutOfDate => {
                debug!("Acquire reported out of date, recreating");
                if !self.recreate()? {
                    self.slots[self.current].state = SlotState::Idle;
                    return Ok(None);
                }
                match self.swapchain.acquire(image_available)? {
                    Acquired::Image { index, suboptimal } => {
                        if suboptimal {
                            self.recreate_requested = true;
                        }
                        index
                    }
                    Acquired::OutOfDate => return Err(RenderError::SwapchainOutOfDate),
                }
            }
        };

        let targets = self.lifecycle.targets().ok_or(RenderError::RecreateFailed {
            stage: "render targets",
            result: vk::Result::ERROR_UNKNOWN,
        })?;
        let pipelines = self
            .lifecycle
            .pipelines()
            .map(|set| set.table())
            .unwrap_or_default();
        let slot = &mut self.slots[self.current];
        let scope = self.recorder.begin(slot.command_buffer, targets, image_index)?;
        slot.state = SlotState::Recording;

        Ok(Some(FrameContext {
            slot: self.current,
            frame_number: self.frame_count,
            scope,
            pipelines,
        }))
    }

    /// Finishes the frame begun by `begin_frame`: closes the render pass,
    /// submits and presents. An out-of-date or suboptimal present rebuilds
    /// the swapchain and is not reported as an error.
    pub fn end_frame(&mut self, ctx: FrameContext) -> Result<()> {
        let slot = &mut self.slots[self.current];
        if ctx.slot != self.current || slot.state != SlotState::Recording {
            return Err(RenderError::FrameMismatch {
                expected: self.current,
                got: ctx.slot,
            });
        }
        let image_index = ctx.image_index();
        let extent = ctx.extent();

        self.recorder.end(ctx.scope)?;
        slot.sync.in_flight.reset()?;
        self.recorder.submit(slot.command_buffer, &slot.sync)?;
        slot.submitted = true;
        slot.state = SlotState::Submitted;

        let presented = self
            .swapchain
            .present(image_index, slot.sync.render_finished.raw())?;
        slot.state = SlotState::Presented;

        let chain = self.swapchain.current();
        self.last_presented = chain.images().get(image_index as usize).map(|&image| PresentedImage {
            image,
            extent,
            format: chain.format(),
            frame_number: self.frame_count,
        });
        self.frame_count += 1;

        match presented {
            Presented::Ok => {}
            Presented::Suboptimal | Presented::OutOfDate => {
                debug!(?presented, "Present requested a recreate");
                self.recreate()?;
            }
        }

        self.slots[self.current].state = SlotState::Idle;
        self.current = (self.current + 1) % FRAMES_IN_FLIGHT;
        Ok(())
    }

    fn apply_pending_resize(&mut self) -> Result<()> {
        if let Some(extent) = self.pending_resize.take() {
            self.requested_extent = extent;
            if !has_area(extent) {
                if !self.minimized {
                    info!("Surface has zero area, pausing frames");
                }
                self.minimized = true;
                return Ok(());
            }
            self.recreate_requested = true;
        }
        // A surface that reported zero area during a recreate may have come
        // back without a resize event; retry while a size is requested.
        if self.minimized && has_area(self.requested_extent) {
            self.recreate_requested = true;
        }
        if self.recreate_requested {
            self.recreate_requested = false;
            self.recreate()?;
        }
        Ok(())
    }

    /// Recovers a slot whose [`FrameContext`] was dropped without
    /// `end_frame`. Its image-available semaphore was signaled by an acquire
    /// that nothing waited on, and the acquired image was never presented, so
    /// both the semaphore and the swapchain are replaced.
    fn discard_abandoned_frame(&mut self) -> Result<()> {
        let slot = &mut self.slots[self.current];
        warn!(
            slot = self.current,
            state = ?slot.state,
            "Frame was abandoned before end_frame, discarding it"
        );
        self.device
            .wait_idle()
            .map_err(RenderError::vulkan("vkDeviceWaitIdle"))?;
        slot.sync.image_available = Semaphore::new(&self.device)?;
        slot.state = SlotState::Idle;
        self.recreate_requested = true;
        Ok(())
    }

    fn recreate(&mut self) -> Result<bool> {
        let rebuilt = self
            .lifecycle
            .recreate(&mut self.swapchain, self.requested_extent)?;
        if rebuilt {
            if self.minimized {
                info!("Surface has area again, resuming frames");
            }
            self.minimized = false;
            // The previous chain's images are gone.
            self.last_presented = None;
        } else {
            self.minimized = true;
        }
        Ok(rebuilt)
    }

    /// The most recently presented image, if the swapchain has not been
    /// rebuilt since.
    pub fn last_presented(&self) -> Option<PresentedImage> {
        self.last_presented
    }

    /// Number of frames submitted and presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn current_extent(&self) -> vk::Extent2D {
        self.swapchain.current().extent()
    }

    pub fn requested_extent(&self) -> vk::Extent2D {
        self.requested_extent
    }

    pub fn generation(&self) -> u64 {
        self.swapchain.current().generation()
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.current().image_count()
    }

    pub fn recreate_count(&self) -> u64 {
        self.lifecycle.recreate_count()
    }

    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .wait_idle()
            .map_err(RenderError::vulkan("vkDeviceWaitIdle"))
    }
}

fn has_area(extent: vk::Extent2D) -> bool {
    extent.width != 0 && extent.height != 0
}

impl<D: GpuDevice> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            warn!("Device did not go idle before teardown: {}", e);
        }
    }
}
