//! Swapchain-dependent resources and their atomic recreate.
//!
//! The render pass, depth buffer and framebuffers ([`RenderTargetSet`]) and
//! every graphics pipeline ([`PipelineSet`]) are derived from one swapchain
//! generation. [`ResourceLifecycle::recreate`] tears them down and rebuilds
//! them as a unit, so a frame never observes a partial set.

use crate::device::{DepthImage, GpuDevice, PipelineDescriptor, PipelineHandles};
use crate::error::{RenderError, Result};
use crate::swapchain::{Swapchain, SwapchainManager};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use tracing::{debug, info};

/// Render pass, depth attachment and one framebuffer per swapchain image.
pub struct RenderTargetSet<D: GpuDevice> {
    device: Arc<D>,
    render_pass: vk::RenderPass,
    depth: Option<DepthImage>,
    depth_view: vk::ImageView,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    generation: u64,
}

impl<D: GpuDevice> RenderTargetSet<D> {
    /// Builds the targets for `swapchain`. On failure everything created so
    /// far is released.
    pub fn new(device: &Arc<D>, swapchain: &Swapchain<D>) -> VkResult<Self> {
        let extent = swapchain.extent();
        let mut set = Self {
            device: Arc::clone(device),
            render_pass: vk::RenderPass::null(),
            depth: None,
            depth_view: vk::ImageView::null(),
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            extent,
            generation: swapchain.generation(),
        };

        let depth_format = device.depth_format()?;
        set.render_pass = device.create_render_pass(swapchain.format(), depth_format)?;
        let depth = device.create_depth_image(extent, depth_format)?;
        set.depth = Some(depth);
        set.depth_view =
            device.create_image_view(depth.image, depth_format, vk::ImageAspectFlags::DEPTH)?;

        for &color_view in swapchain.image_views() {
            let framebuffer =
                device.create_framebuffer(set.render_pass, &[color_view, set.depth_view], extent)?;
            set.framebuffers.push(framebuffer);
        }
        debug!(
            framebuffers = set.framebuffers.len(),
            generation = set.generation,
            "Render targets created"
        );
        Ok(set)
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Swapchain generation these targets were built against.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<D: GpuDevice> Drop for RenderTargetSet<D> {
    fn drop(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
        if self.depth_view != vk::ImageView::null() {
            self.device.destroy_image_view(self.depth_view);
        }
        if let Some(depth) = self.depth.take() {
            self.device.destroy_depth_image(depth);
        }
        if self.render_pass != vk::RenderPass::null() {
            self.device.destroy_render_pass(self.render_pass);
        }
        debug!(generation = self.generation, "Render targets destroyed");
    }
}

/// A built pipeline, looked up by the name of its descriptor.
#[derive(Debug, Clone)]
pub struct NamedPipeline {
    pub name: String,
    pub handles: PipelineHandles,
}

/// Every pipeline built from the static descriptor list for one target set.
///
/// The table is shared with frame contexts so draw collaborators can look up
/// pipelines without borrowing the scheduler.
pub struct PipelineSet<D: GpuDevice> {
    device: Arc<D>,
    table: Arc<Vec<NamedPipeline>>,
}

impl<D: GpuDevice> PipelineSet<D> {
    pub fn new(
        device: &Arc<D>,
        descriptors: &[PipelineDescriptor],
        targets: &RenderTargetSet<D>,
    ) -> VkResult<Self> {
        let mut built = Vec::with_capacity(descriptors.len());
        for desc in descriptors {
            match device.create_pipeline(desc, targets.render_pass(), targets.extent()) {
                Ok(handles) => built.push(NamedPipeline {
                    name: desc.name.clone(),
                    handles,
                }),
                Err(result) => {
                    for pipeline in built {
                        device.destroy_pipeline(pipeline.handles);
                    }
                    return Err(result);
                }
            }
        }
        Ok(Self {
            device: Arc::clone(device),
            table: Arc::new(built),
        })
    }

    pub fn table(&self) -> Arc<Vec<NamedPipeline>> {
        Arc::clone(&self.table)
    }

    pub fn get(&self, name: &str) -> Option<PipelineHandles> {
        lookup(&self.table, name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

pub(crate) fn lookup(table: &[NamedPipeline], name: &str) -> Option<PipelineHandles> {
    table.iter().find(|p| p.name == name).map(|p| p.handles)
}

impl<D: GpuDevice> Drop for PipelineSet<D> {
    fn drop(&mut self) {
        for pipeline in self.table.iter() {
            self.device.destroy_pipeline(pipeline.handles);
        }
    }
}

/// Owns the swapchain-dependent resources and sequences their rebuild.
pub struct ResourceLifecycle<D: GpuDevice> {
    device: Arc<D>,
    descriptors: Vec<PipelineDescriptor>,
    // Declared before `targets` so pipelines drop first.
    pipelines: Option<PipelineSet<D>>,
    targets: Option<RenderTargetSet<D>>,
    recreate_count: u64,
}

impl<D: GpuDevice> ResourceLifecycle<D> {
    /// Builds the initial targets and pipelines against the active chain.
    pub fn new(
        device: Arc<D>,
        swapchain: &SwapchainManager<D>,
        descriptors: Vec<PipelineDescriptor>,
    ) -> Result<Self> {
        let targets = RenderTargetSet::new(&device, swapchain.current())
            .map_err(RenderError::vulkan("create render targets"))?;
        let pipelines = PipelineSet::new(&device, &descriptors, &targets)
            .map_err(RenderError::vulkan("vkCreateGraphicsPipelines"))?;
        Ok(Self {
            device,
            descriptors,
            pipelines: Some(pipelines),
            targets: Some(targets),
            recreate_count: 0,
        })
    }

    /// Rebuilds the swapchain and everything derived from it for `requested`.
    ///
    /// Returns `Ok(false)` without touching anything when the resolved extent
    /// has zero area. Otherwise waits for the device to go idle, destroys the
    /// pipelines and then the render targets, rebuilds the swapchain (the old
    /// one is passed as a hint), builds new targets and pipelines, and only
    /// then destroys the retired swapchain. A failure after the wait leaves
    /// the pipeline unusable and is reported as [`RenderError::RecreateFailed`].
    pub fn recreate(
        &mut self,
        swapchain: &mut SwapchainManager<D>,
        requested: vk::Extent2D,
    ) -> Result<bool> {
        let Some(extent) = swapchain.resolve_extent(requested)? else {
            debug!(
                width = requested.width,
                height = requested.height,
                "Zero-area extent, recreate skipped"
            );
            return Ok(false);
        };

        self.device
            .wait_idle()
            .map_err(RenderError::vulkan("vkDeviceWaitIdle"))?;

        drop(self.pipelines.take());
        drop(self.targets.take());

        let retired = swapchain
            .rebuild(extent)
            .map_err(|result| RenderError::RecreateFailed {
                stage: "swapchain",
                result,
            })?;
        let targets = RenderTargetSet::new(&self.device, swapchain.current()).map_err(|result| {
            RenderError::RecreateFailed {
                stage: "render targets",
                result,
            }
        })?;
        let pipelines = PipelineSet::new(&self.device, &self.descriptors, &targets).map_err(
            |result| RenderError::RecreateFailed {
                stage: "pipelines",
                result,
            },
        )?;
        self.targets = Some(targets);
        self.pipelines = Some(pipelines);
        drop(retired);

        self.recreate_count += 1;
        info!(
            width = extent.width,
            height = extent.height,
            recreates = self.recreate_count,
            "Swapchain-dependent resources recreated"
        );
        Ok(true)
    }

    pub fn targets(&self) -> Option<&RenderTargetSet<D>> {
        self.targets.as_ref()
    }

    pub fn pipelines(&self) -> Option<&PipelineSet<D>> {
        self.pipelines.as_ref()
    }

    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }
}
