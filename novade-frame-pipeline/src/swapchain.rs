//! The presentable image chain.
//!
//! [`SwapchainManager`] is the only owner of the active [`Swapchain`]. It
//! performs acquire and present, translating the recoverable result codes
//! into [`Acquired`] / [`Presented`] values, and provides the extent
//! resolution and rebuild steps that [`crate::lifecycle::ResourceLifecycle`]
//! sequences into an atomic recreate.

use crate::device::{GpuDevice, SwapchainDesc};
use crate::error::{RenderError, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use tracing::{debug, info};

/// One generation of presentable images and their views.
pub struct Swapchain<D: GpuDevice> {
    device: Arc<D>,
    raw: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    generation: u64,
}

impl<D: GpuDevice> Swapchain<D> {
    fn create(device: &Arc<D>, desc: &SwapchainDesc, generation: u64) -> VkResult<Self> {
        let raw = device.create_swapchain(desc)?;
        let mut swapchain = Self {
            device: Arc::clone(device),
            raw,
            surface_format: desc.surface_format,
            extent: desc.extent,
            images: Vec::new(),
            image_views: Vec::new(),
            generation,
        };
        swapchain.images = device.swapchain_images(raw)?;
        for &image in &swapchain.images {
            let view = device.create_image_view(
                image,
                desc.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            swapchain.image_views.push(view);
        }
        Ok(swapchain)
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Incremented on every rebuild; dependents record the generation they
    /// were built against.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<D: GpuDevice> Drop for Swapchain<D> {
    fn drop(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.device.destroy_swapchain(self.raw);
        debug!(generation = self.generation, "Swapchain destroyed");
    }
}

/// Outcome of an image acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Outcome of a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Ok,
    Suboptimal,
    OutOfDate,
}

/// Resolves a requested extent against the surface capabilities.
///
/// The request is first clamped to the maximum extent; a zero-area result
/// means the surface is minimized and yields `None`. A defined
/// `current_extent` then wins over the request; otherwise the request is
/// clamped up to the minimum extent.
pub fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> Option<vk::Extent2D> {
    let max = capabilities.max_image_extent;
    let clamped = vk::Extent2D {
        width: requested.width.min(max.width),
        height: requested.height.min(max.height),
    };
    if clamped.width == 0 || clamped.height == 0 {
        return None;
    }

    let current = capabilities.current_extent;
    if current.width != u32::MAX {
        if current.width == 0 || current.height == 0 {
            return None;
        }
        return Some(current);
    }

    let min = capabilities.min_image_extent;
    Some(vk::Extent2D {
        width: clamped.width.max(min.width),
        height: clamped.height.max(min.height),
    })
}

/// One more image than the minimum, bounded by the maximum (0 = unbounded).
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

/// Owns the active swapchain.
pub struct SwapchainManager<D: GpuDevice> {
    device: Arc<D>,
    current: Swapchain<D>,
}

impl<D: GpuDevice> SwapchainManager<D> {
    /// Creates the first chain for `requested`. A zero-area request (a window
    /// that starts minimized) falls back to the surface's minimum extent.
    pub fn new(device: Arc<D>, requested: vk::Extent2D) -> Result<Self> {
        let capabilities = device
            .surface_capabilities()
            .map_err(RenderError::vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        let extent = resolve_extent(&capabilities, requested).unwrap_or(vk::Extent2D {
            width: capabilities.min_image_extent.width.max(1),
            height: capabilities.min_image_extent.height.max(1),
        });
        let desc = Self::describe(&device, &capabilities, extent, vk::SwapchainKHR::null())
            .map_err(RenderError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
        let current = Swapchain::create(&device, &desc, 0)
            .map_err(RenderError::vulkan("vkCreateSwapchainKHR"))?;
        info!(
            width = extent.width,
            height = extent.height,
            images = current.image_count(),
            "Swapchain created"
        );
        Ok(Self { device, current })
    }

    fn describe(
        device: &Arc<D>,
        capabilities: &vk::SurfaceCapabilitiesKHR,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VkResult<SwapchainDesc> {
        Ok(SwapchainDesc {
            extent,
            surface_format: device.choose_surface_format()?,
            image_count: image_count(capabilities),
            pre_transform: capabilities.current_transform,
            old_swapchain,
        })
    }

    pub fn current(&self) -> &Swapchain<D> {
        &self.current
    }

    /// Queries the surface and resolves `requested`; `None` means the
    /// surface currently has no drawable area.
    pub fn resolve_extent(&self, requested: vk::Extent2D) -> Result<Option<vk::Extent2D>> {
        let capabilities = self
            .device
            .surface_capabilities()
            .map_err(RenderError::vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        Ok(resolve_extent(&capabilities, requested))
    }

    /// Builds a new chain at `extent`, handing the active one to the driver as
    /// `old_swapchain`, and returns the retired chain.
    ///
    /// The caller destroys the retired chain (by dropping it) once everything
    /// built against the new one is in place.
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> VkResult<Swapchain<D>> {
        let capabilities = self.device.surface_capabilities()?;
        let desc = Self::describe(&self.device, &capabilities, extent, self.current.raw)?;
        let next = Swapchain::create(&self.device, &desc, self.current.generation + 1)?;
        let retired = std::mem::replace(&mut self.current, next);
        info!(
            width = extent.width,
            height = extent.height,
            images = self.current.image_count(),
            generation = self.current.generation,
            "Swapchain rebuilt"
        );
        Ok(retired)
    }

    /// Acquires the next image, signalling `signal` when it is ready.
    pub fn acquire(&self, signal: vk::Semaphore) -> Result<Acquired> {
        match self.device.acquire_next_image(self.current.raw, signal) {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    /// Presents `image_index` once `wait` is signaled.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<Presented> {
        match self.device.queue_present(self.current.raw, image_index, wait) {
            Ok(false) => Ok(Presented::Ok),
            Ok(true) => Ok(Presented::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(result) => Err(RenderError::Vulkan {
                call: "vkQueuePresentKHR",
                result,
            }),
        }
    }
}
