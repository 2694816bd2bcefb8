//! The renderer context.
//!
//! [`Renderer`] owns the frame scheduler, the capture service and the event
//! queue for the single surface of the process. Only one may be alive at a
//! time; creating a second fails with [`RenderError::ContextAlreadyExists`].
//! Dropping it drains pending captures and waits for the device before the
//! GPU objects are released.

use crate::capture::CaptureService;
use crate::config::RendererConfig;
use crate::device::{GpuDevice, PipelineDescriptor};
use crate::error::{RenderError, Result};
use crate::events::{event_channel, EventQueue, EventSender, SurfaceEvent, WindowId};
use crate::scheduler::{FrameContext, FrameScheduler, PresentedImage};
use ash::vk;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

static CONTEXT_ALIVE: AtomicBool = AtomicBool::new(false);

/// Marks the process-wide renderer slot as taken until dropped.
struct ContextGuard;

impl ContextGuard {
    fn acquire() -> Result<Self> {
        CONTEXT_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ContextGuard)
            .map_err(|_| RenderError::ContextAlreadyExists)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_ALIVE.store(false, Ordering::Release);
    }
}

pub struct Renderer<D: GpuDevice> {
    window: WindowId,
    events: EventQueue,
    sender: EventSender,
    capture: CaptureService,
    scheduler: FrameScheduler<D>,
    device: Arc<D>,
    last_recorded_frame: Option<u64>,
    // Released last, after every GPU object.
    _guard: ContextGuard,
}

impl<D: GpuDevice> Renderer<D> {
    /// Builds the swapchain, render targets, pipelines and frame slots for
    /// `window` at `extent`.
    pub fn new(
        device: Arc<D>,
        window: WindowId,
        extent: vk::Extent2D,
        config: &RendererConfig,
        pipelines: Vec<PipelineDescriptor>,
    ) -> Result<Self> {
        let guard = ContextGuard::acquire()?;
        config.validate()?;

        let scheduler = FrameScheduler::new(Arc::clone(&device), extent, pipelines)?;
        let capture = CaptureService::new(config.capture.clone());
        let (sender, events) = event_channel();
        info!(window = window.0, "Renderer initialized");

        Ok(Self {
            window,
            events,
            sender,
            capture,
            scheduler,
            device,
            last_recorded_frame: None,
            _guard: guard,
        })
    }

    /// A handle the windowing collaborator uses to deliver events.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    fn process_events(&mut self) {
        for event in self.events.drain() {
            if event.window != self.window {
                warn!(
                    window = event.window.0,
                    expected = self.window.0,
                    "Ignoring event for a foreign window"
                );
                continue;
            }
            match event.event {
                SurfaceEvent::Resized { width, height } => {
                    debug!(width, height, "Resize event");
                    self.scheduler.notify_resize(width, height);
                }
                SurfaceEvent::Invalidated => {
                    debug!("Surface invalidated");
                    self.scheduler.request_recreate();
                }
            }
        }
    }

    /// Starts a frame; `Ok(None)` while the window is minimized.
    ///
    /// While recording, the previously presented frame is captured before the
    /// next image is acquired.
    pub fn begin_frame(&mut self) -> Result<Option<FrameContext>> {
        self.process_events();

        if self.capture.is_recording() {
            if let Some(presented) = self.scheduler.last_presented() {
                if self.last_recorded_frame != Some(presented.frame_number) {
                    self.capture.record_video_frame(&self.device, &presented)?;
                    self.last_recorded_frame = Some(presented.frame_number);
                }
            }
        }

        self.scheduler.begin_frame()
    }

    /// Like [`Renderer::begin_frame`], treating a size different from the
    /// last requested one as a resize.
    pub fn begin_frame_with_extent(&mut self, width: u32, height: u32) -> Result<Option<FrameContext>> {
        let requested = self.scheduler.requested_extent();
        if requested.width != width || requested.height != height {
            self.scheduler.notify_resize(width, height);
        }
        self.begin_frame()
    }

    pub fn end_frame(&mut self, ctx: FrameContext) -> Result<()> {
        self.scheduler.end_frame(ctx)
    }

    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.scheduler.notify_resize(width, height);
    }

    /// Writes the most recently presented frame to `path` as a PNG.
    pub fn screenshot(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let presented = self.last_presented().ok_or(RenderError::NothingPresented)?;
        self.capture.screenshot(&self.device, &presented, path)
    }

    pub fn start_recording(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.last_recorded_frame = None;
        self.capture.start_recording(path)
    }

    /// Returns the number of frames written.
    pub fn stop_recording(&mut self) -> Result<u64> {
        self.capture.stop_recording()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    pub fn last_presented(&self) -> Option<PresentedImage> {
        self.scheduler.last_presented()
    }

    pub fn scheduler(&self) -> &FrameScheduler<D> {
        &self.scheduler
    }

    pub fn capture(&self) -> &CaptureService {
        &self.capture
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Drains captures and idles the device. Also run on drop.
    pub fn shutdown(&mut self) -> Result<()> {
        self.capture.drain()?;
        self.scheduler.wait_idle()
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Renderer shutdown incomplete: {}", e);
        }
        info!("Renderer destroyed");
    }
}
