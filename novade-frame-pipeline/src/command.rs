//! Per-frame command recording and queue submission.

use crate::device::GpuDevice;
use crate::error::{RenderError, Result};
use crate::lifecycle::RenderTargetSet;
use crate::sync::FrameSync;
use ash::vk;
use std::sync::Arc;

/// Opaque black.
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
/// Far plane.
pub const CLEAR_DEPTH: f32 = 1.0;

/// An open render pass on a command buffer.
///
/// Produced by [`CommandRecorder::begin`] and consumed by
/// [`CommandRecorder::end`], which closes the pass exactly once.
#[must_use = "an open render pass must be closed with CommandRecorder::end"]
#[derive(Debug)]
pub struct RenderPassScope {
    command_buffer: vk::CommandBuffer,
    image_index: u32,
    extent: vk::Extent2D,
}

impl RenderPassScope {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

pub struct CommandRecorder<D: GpuDevice> {
    device: Arc<D>,
}

impl<D: GpuDevice> CommandRecorder<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }

    /// Resets and begins `command_buffer`, opens the render pass on the
    /// framebuffer of `image_index` with the standard clear values, and sets
    /// a full-extent viewport and scissor.
    pub fn begin(
        &self,
        command_buffer: vk::CommandBuffer,
        targets: &RenderTargetSet<D>,
        image_index: u32,
    ) -> Result<RenderPassScope> {
        let framebuffer = targets.framebuffer(image_index).ok_or(RenderError::Vulkan {
            call: "vkCmdBeginRenderPass",
            result: vk::Result::ERROR_UNKNOWN,
        })?;
        let extent = targets.extent();

        self.device
            .begin_command_buffer(command_buffer)
            .map_err(RenderError::vulkan("vkBeginCommandBuffer"))?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: CLEAR_DEPTH,
                    stencil: 0,
                },
            },
        ];
        self.device.cmd_begin_render_pass(
            command_buffer,
            targets.render_pass(),
            framebuffer,
            extent,
            &clear_values,
        );
        self.device.cmd_set_viewport_and_scissor(command_buffer, extent);

        Ok(RenderPassScope {
            command_buffer,
            image_index,
            extent,
        })
    }

    /// Closes the render pass and ends the command buffer.
    pub fn end(&self, scope: RenderPassScope) -> Result<()> {
        self.device.cmd_end_render_pass(scope.command_buffer);
        self.device
            .end_command_buffer(scope.command_buffer)
            .map_err(RenderError::vulkan("vkEndCommandBuffer"))
    }

    /// Submits `command_buffer`, waiting on `image_available` at the color
    /// output stage and signalling `render_finished` and the in-flight fence.
    pub fn submit(&self, command_buffer: vk::CommandBuffer, sync: &FrameSync<D>) -> Result<()> {
        self.device
            .queue_submit(
                command_buffer,
                sync.image_available.raw(),
                sync.render_finished.raw(),
                sync.in_flight.raw(),
            )
            .map_err(RenderError::vulkan("vkQueueSubmit"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swapchain::SwapchainManager;
    use crate::test_utils::{Call, MockDevice};

    #[test]
    fn records_one_pass_with_clear_values_and_closes_it() {
        let device = MockDevice::shared();
        let swapchain = SwapchainManager::new(
            device.clone(),
            vk::Extent2D {
                width: 320,
                height: 240,
            },
        )
        .unwrap();
        let targets = RenderTargetSet::new(&device, swapchain.current()).unwrap();
        let sync = FrameSync::new(&device).unwrap();
        let cb = device.allocate_command_buffer().unwrap();
        let recorder = CommandRecorder::new(device.clone());
        device.clear_calls();

        let scope = recorder.begin(cb, &targets, 1).unwrap();
        assert_eq!(scope.image_index(), 1);
        recorder.end(scope).unwrap();
        recorder.submit(cb, &sync).unwrap();

        let calls = device.calls();
        let extent = vk::Extent2D {
            width: 320,
            height: 240,
        };
        assert_eq!(
            calls,
            vec![
                Call::BeginCommandBuffer(cb),
                Call::BeginRenderPass {
                    framebuffer: targets.framebuffer(1).unwrap(),
                    extent,
                    clear_values: 2,
                },
                Call::SetViewportAndScissor(extent),
                Call::EndRenderPass(cb),
                Call::EndCommandBuffer(cb),
                Call::Submit {
                    command_buffer: cb,
                    wait: sync.image_available.raw(),
                    signal: sync.render_finished.raw(),
                    fence: sync.in_flight.raw(),
                },
            ]
        );
        device.free_command_buffer(cb);
    }

    #[test]
    fn unknown_image_index_is_rejected() {
        let device = MockDevice::shared();
        let swapchain = SwapchainManager::new(
            device.clone(),
            vk::Extent2D {
                width: 320,
                height: 240,
            },
        )
        .unwrap();
        let targets = RenderTargetSet::new(&device, swapchain.current()).unwrap();
        let recorder = CommandRecorder::new(device.clone());
        assert!(recorder.begin(vk::CommandBuffer::null(), &targets, 7).is_err());
    }
}
