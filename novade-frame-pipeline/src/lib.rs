//! # NovaDE Frame Pipeline (`novade-frame-pipeline`)
//!
//! Drives one presentable surface through a double-buffered Vulkan frame
//! loop and captures presented frames to disk without stalling it.
//!
//! ## Components
//!
//! - **Synchronization** (`sync`): RAII fences and semaphores, one
//!   [`sync::FrameSync`] per frame slot.
//! - **Swapchain** (`swapchain`): extent resolution against surface
//!   capabilities, acquire and present with out-of-date reporting, rebuilds
//!   that hand the retired chain back to the caller.
//! - **Resource lifecycle** (`lifecycle`): render pass, depth buffer,
//!   framebuffers and pipelines rebuilt in a fixed order whenever the
//!   swapchain changes.
//! - **Command submission** (`command`): render pass scopes and the queue
//!   submit that ties a frame to its semaphores and fence.
//! - **Frame scheduling** (`scheduler`): at most two frames in flight,
//!   resize handling and minimized-window pauses.
//! - **Capture** (`capture`): screenshots to PNG and MJPEG recording on
//!   bounded background queues, written in request order.
//! - **Renderer** (`renderer`): the single per-process context that owns all
//!   of the above and routes window events.
//!
//! Every component talks to the GPU through the [`GpuDevice`] trait;
//! [`VulkanDevice`] is the `ash` implementation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use novade_frame_pipeline::{
//!     logging, PipelineDescriptor, Renderer, RendererConfig, VulkanDevice, WindowId,
//!     WaylandSurfaceProvider,
//! };
//! use std::sync::Arc;
//!
//! let config = RendererConfig::load(std::path::Path::new("renderer.toml"))?;
//! logging::init_logging(&config.logging)?;
//!
//! let provider = unsafe { WaylandSurfaceProvider::new(display, surface) };
//! let device = Arc::new(VulkanDevice::new(&config, &provider)?);
//! let pipelines = vec![PipelineDescriptor::new("triangle")
//!     .stage(ash::vk::ShaderStageFlags::VERTEX, vert_spv)
//!     .stage(ash::vk::ShaderStageFlags::FRAGMENT, frag_spv)];
//! let mut renderer = Renderer::new(
//!     device,
//!     WindowId(1),
//!     ash::vk::Extent2D { width: 800, height: 600 },
//!     &config,
//!     pipelines,
//! )?;
//!
//! loop {
//!     if let Some(frame) = renderer.begin_frame()? {
//!         // record draws into frame.command_buffer()
//!         renderer.end_frame(frame)?;
//!     }
//! }
//! ```

pub mod capture;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logging;
pub mod renderer;
pub mod scheduler;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod test_utils;

pub use capture::{CaptureService, FrameEncoder, MjpegEncoder};
pub use config::{CaptureConfig, LogFormat, LoggingConfig, PresentModePreference, RendererConfig};
pub use device::{GpuDevice, PipelineDescriptor, PipelineHandles, Specialization};
pub use error::{ConfigError, RenderError, Result};
pub use events::{event_channel, EventQueue, EventSender, SurfaceEvent, WindowId};
pub use renderer::Renderer;
pub use scheduler::{FrameContext, FrameScheduler, PresentedImage, FRAMES_IN_FLIGHT};
pub use vulkan::{SurfaceProvider, VulkanDevice};
#[cfg(feature = "wayland")]
pub use vulkan::WaylandSurfaceProvider;
