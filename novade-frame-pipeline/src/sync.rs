//! Fences and semaphores with scoped ownership.
//!
//! Each handle keeps the device alive and releases itself on drop, so a frame
//! slot or a staging copy can never outlive (or leak) its primitives.

use crate::device::GpuDevice;
use crate::error::{RenderError, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use tracing::debug;

/// A CPU-waitable GPU completion signal.
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    raw: vk::Fence,
}

impl<D: GpuDevice> Fence<D> {
    pub fn new(device: &Arc<D>, signaled: bool) -> Result<Self> {
        let raw = device
            .create_fence(signaled)
            .map_err(RenderError::vulkan("vkCreateFence"))?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> vk::Fence {
        self.raw
    }

    /// Blocks until the fence is signaled or `timeout_ns` elapses.
    ///
    /// A timeout surfaces as `Err(vk::Result::TIMEOUT)` so callers can map it
    /// to their own error.
    pub fn wait(&self, timeout_ns: u64) -> VkResult<()> {
        self.device.wait_for_fence(self.raw, timeout_ns)
    }

    pub fn reset(&self) -> Result<()> {
        self.device
            .reset_fence(self.raw)
            .map_err(RenderError::vulkan("vkResetFences"))
    }
}

impl<D: GpuDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.raw);
    }
}

/// A GPU-to-GPU ordering signal.
pub struct Semaphore<D: GpuDevice> {
    device: Arc<D>,
    raw: vk::Semaphore,
}

impl<D: GpuDevice> Semaphore<D> {
    pub fn new(device: &Arc<D>) -> Result<Self> {
        let raw = device
            .create_semaphore()
            .map_err(RenderError::vulkan("vkCreateSemaphore"))?;
        Ok(Self {
            device: Arc::clone(device),
            raw,
        })
    }

    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }
}

impl<D: GpuDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.raw);
    }
}

/// The synchronization primitives owned by one frame slot.
pub struct FrameSync<D: GpuDevice> {
    /// Signaled by the presentation engine when the acquired image is ready.
    pub image_available: Semaphore<D>,
    /// Signaled by the queue when the frame's commands have executed.
    pub render_finished: Semaphore<D>,
    /// Signaled together with `render_finished`; guards command buffer reuse.
    pub in_flight: Fence<D>,
}

impl<D: GpuDevice> FrameSync<D> {
    /// Creates the slot primitives. The fence starts unsignaled; the owning
    /// slot skips the wait on its first use instead.
    pub fn new(device: &Arc<D>) -> Result<Self> {
        let sync = Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, false)?,
        };
        debug!("Created frame sync primitives (2 semaphores, 1 unsignaled fence)");
        Ok(sync)
    }
}

/// Creates one [`FrameSync`] per frame in flight.
pub fn create_frame_sync_list<D: GpuDevice>(
    device: &Arc<D>,
    frames_in_flight: usize,
) -> Result<Vec<FrameSync<D>>> {
    (0..frames_in_flight).map(|_| FrameSync::new(device)).collect()
}
