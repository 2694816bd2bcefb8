//! Screenshot and video capture of presented frames.
//!
//! Capturing has two halves. Staging runs on the render thread: the presented
//! image is copied into a host-visible image, waited on with a bounded
//! timeout, and read back into a [`CaptureRequest`]. Encoding runs on one OS
//! thread per request, tracked by a bounded [`CaptureQueue`] so a caller that
//! outpaces the encoders blocks instead of piling up work.
//!
//! Screenshots are independent PNG files. Video frames are encoded in any
//! order but appended to the output strictly in capture order: each task
//! holds an [`OrderToken`] and writes only after its predecessor finished.

use crate::config::CaptureConfig;
use crate::device::{GpuDevice, StagingImage};
use crate::error::{RenderError, Result};
use crate::scheduler::PresentedImage;
use crate::sync::Fence;
use anyhow::{anyhow, Context};
use ash::vk;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Host copy of one presented image, ready for encoding.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Tightly packed 4-byte texels in `format` channel order.
    pub pixels: Vec<u8>,
    pub extent: vk::Extent2D,
    pub row_pitch: u64,
    pub format: vk::Format,
    /// Monotonic across all captures of one service.
    pub sequence: u64,
    /// Frame number of the presented image.
    pub frame_number: u64,
}

impl CaptureRequest {
    fn is_bgra(&self) -> bool {
        matches!(
            self.format,
            vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SNORM
        )
    }

    /// RGBA8 with alpha forced opaque.
    pub fn to_rgba(&self) -> Vec<u8> {
        let swap = self.is_bgra();
        let mut out = Vec::with_capacity(self.pixels.len());
        for px in self.pixels.chunks_exact(4) {
            if swap {
                out.extend_from_slice(&[px[2], px[1], px[0], 255]);
            } else {
                out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        out
    }

    /// RGB8, dropping alpha.
    pub fn to_rgb(&self) -> Vec<u8> {
        let swap = self.is_bgra();
        let mut out = Vec::with_capacity(self.pixels.len() / 4 * 3);
        for px in self.pixels.chunks_exact(4) {
            if swap {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            } else {
                out.extend_from_slice(&[px[0], px[1], px[2]]);
            }
        }
        out
    }
}

/// Releases a staging image on every exit path of [`stage`].
struct StagingGuard<'a, D: GpuDevice> {
    device: &'a D,
    image: Option<StagingImage>,
}

impl<D: GpuDevice> StagingGuard<'_, D> {
    /// Gives up ownership without destroying, for images the GPU may still
    /// be writing to.
    fn leak(mut self) {
        self.image = None;
    }
}

impl<D: GpuDevice> Drop for StagingGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(image) = self.image.take() {
            self.device.destroy_staging_image(image);
        }
    }
}

/// Copies `source` into host memory.
///
/// Blocks for at most `timeout_ms` on the GPU copy; running out of time is
/// fatal ([`RenderError::CaptureTimeout`]). A staging image whose rows are
/// not exactly `width * 4` bytes apart is rejected as
/// [`RenderError::UnsupportedRowPitch`].
pub fn stage<D: GpuDevice>(
    device: &Arc<D>,
    source: &PresentedImage,
    timeout_ms: u64,
    sequence: u64,
) -> Result<CaptureRequest> {
    let fence = Fence::new(device, false)?;
    let staging = device
        .create_staging_image(source.extent, source.format)
        .map_err(RenderError::vulkan("create staging image"))?;
    let mut guard = StagingGuard {
        device: device.as_ref(),
        image: Some(staging),
    };

    let expected = source.extent.width as u64 * 4;
    if staging.row_pitch != expected {
        return Err(RenderError::UnsupportedRowPitch {
            row_pitch: staging.row_pitch,
            expected,
        });
    }

    if let Some(image) = guard.image.as_mut() {
        device
            .submit_copy_to_staging(source.image, image, fence.raw())
            .map_err(RenderError::vulkan("vkQueueSubmit"))?;
    }

    match fence.wait(timeout_ms.saturating_mul(1_000_000)) {
        Ok(()) => {}
        Err(vk::Result::TIMEOUT) => {
            error!(timeout_ms, "Staging copy timed out");
            // The copy may still land; neither target may be freed under it.
            guard.leak();
            std::mem::forget(fence);
            return Err(RenderError::CaptureTimeout { timeout_ms });
        }
        Err(result) => {
            return Err(RenderError::Vulkan {
                call: "vkWaitForFences",
                result,
            })
        }
    }

    let len = expected as usize * source.extent.height as usize;
    let pixels = device
        .read_staging_image(&staging, len)
        .map_err(RenderError::vulkan("vkMapMemory"))?;
    debug!(sequence, frame = source.frame_number, bytes = len, "Frame staged");

    Ok(CaptureRequest {
        pixels,
        extent: source.extent,
        row_pitch: staging.row_pitch,
        format: source.format,
        sequence,
        frame_number: source.frame_number,
    })
}

type TaskHandle = JoinHandle<anyhow::Result<()>>;

/// Bounded FIFO of running capture tasks.
///
/// When full, the oldest task is joined before a new one is admitted, so at
/// most `capacity` tasks are ever outstanding.
pub struct CaptureQueue {
    name: &'static str,
    capacity: usize,
    tasks: VecDeque<TaskHandle>,
    forced_waits: u64,
    failures: u64,
}

impl CaptureQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            tasks: VecDeque::with_capacity(capacity),
            forced_waits: 0,
            failures: 0,
        }
    }

    /// Joins the oldest tasks until a new one fits.
    pub fn make_room(&mut self) {
        while self.tasks.len() >= self.capacity {
            let Some(oldest) = self.tasks.pop_front() else {
                break;
            };
            self.forced_waits += 1;
            debug!(queue = self.name, "Capture queue full, waiting for oldest task");
            self.join(oldest);
        }
    }

    /// Starts `task` on its own thread once there is room.
    pub fn spawn<F>(&mut self, thread_name: String, task: F) -> std::io::Result<()>
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.make_room();
        let handle = thread::Builder::new().name(thread_name).spawn(task)?;
        self.tasks.push_back(handle);
        Ok(())
    }

    /// Joins every outstanding task in submission order.
    pub fn drain(&mut self) {
        while let Some(task) = self.tasks.pop_front() {
            self.join(task);
        }
    }

    fn join(&mut self, task: TaskHandle) {
        match task.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.failures += 1;
                warn!(queue = self.name, "Capture task failed: {:#}", e);
            }
            Err(_) => {
                self.failures += 1;
                warn!(queue = self.name, "Capture task panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times a caller had to wait for a full queue.
    pub fn forced_waits(&self) -> u64 {
        self.forced_waits
    }

    /// Tasks that returned an error or panicked.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

/// Orders the side effects of concurrently running video tasks.
///
/// Each token carries the completion signal of its predecessor and its own.
/// A predecessor whose task ended without completing (error or panic) counts
/// as complete once its token is dropped; dropping a token first waits for
/// its own predecessor, so the chain stays ordered through failures.
pub struct OrderToken {
    predecessor: Option<Receiver<()>>,
    done: SyncSender<()>,
}

impl OrderToken {
    /// Blocks until every earlier token has completed or been dropped.
    pub fn wait_for_predecessor(&mut self) {
        if let Some(predecessor) = self.predecessor.take() {
            // A disconnected sender means the predecessor is gone.
            let _ = predecessor.recv();
        }
    }

    /// Signals the successor.
    pub fn complete(mut self) {
        self.wait_for_predecessor();
        let _ = self.done.try_send(());
    }
}

impl Drop for OrderToken {
    fn drop(&mut self) {
        self.wait_for_predecessor();
    }
}

/// Hands out [`OrderToken`]s linked in creation order.
#[derive(Default)]
pub struct OrderChain {
    tail: Option<Receiver<()>>,
}

impl OrderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_token(&mut self) -> OrderToken {
        let (done, signal) = sync_channel(1);
        OrderToken {
            predecessor: self.tail.replace(signal),
            done,
        }
    }
}

/// Turns a staged frame into the bytes appended to a video file.
pub trait FrameEncoder: Send + Sync + 'static {
    fn encode(&self, frame: &CaptureRequest) -> anyhow::Result<Vec<u8>>;
}

/// Encodes each frame as a baseline JPEG; the concatenation is a
/// Motion-JPEG elementary stream.
#[derive(Debug, Clone, Copy)]
pub struct MjpegEncoder {
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameEncoder for MjpegEncoder {
    fn encode(&self, frame: &CaptureRequest) -> anyhow::Result<Vec<u8>> {
        let rgb = frame.to_rgb();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .write_image(
                &rgb,
                frame.extent.width,
                frame.extent.height,
                ExtendedColorType::Rgb8,
            )
            .context("Failed to encode JPEG frame")?;
        Ok(out)
    }
}

struct VideoWriter {
    out: BufWriter<File>,
    frames_written: u64,
}

struct Recording {
    path: PathBuf,
    writer: Arc<Mutex<VideoWriter>>,
    chain: OrderChain,
    frames_requested: u64,
}

fn write_png(request: &CaptureRequest, path: &Path) -> anyhow::Result<()> {
    let rgba = request.to_rgba();
    let file = File::create(path)
        .with_context(|| format!("Failed to create screenshot file {}", path.display()))?;
    let writer = BufWriter::new(file);

    let mut encoder = png::Encoder::new(writer, request.extent.width, request.extent.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut png_writer = encoder
        .write_header()
        .context("Failed to write PNG header")?;
    png_writer
        .write_image_data(&rgba)
        .context("Failed to write PNG data")?;
    png_writer.finish().context("Failed to finish PNG")?;

    info!("Screenshot saved: {}", path.display());
    Ok(())
}

/// Screenshot and video capture with bounded asynchronous encoding.
pub struct CaptureService {
    config: CaptureConfig,
    encoder: Arc<dyn FrameEncoder>,
    screenshots: CaptureQueue,
    video: CaptureQueue,
    recording: Option<Recording>,
    next_sequence: u64,
}

impl CaptureService {
    /// Creates a service that records video as Motion-JPEG.
    pub fn new(config: CaptureConfig) -> Self {
        let encoder = Arc::new(MjpegEncoder::new(config.video_quality));
        Self::with_encoder(config, encoder)
    }

    pub fn with_encoder(config: CaptureConfig, encoder: Arc<dyn FrameEncoder>) -> Self {
        Self {
            screenshots: CaptureQueue::new("screenshot", config.screenshot_queue_capacity),
            video: CaptureQueue::new("video", config.video_queue_capacity),
            config,
            encoder,
            recording: None,
            next_sequence: 0,
        }
    }

    fn stage<D: GpuDevice>(&mut self, device: &Arc<D>, source: &PresentedImage) -> Result<CaptureRequest> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        stage(device, source, self.config.staging_timeout_ms, sequence)
    }

    /// Captures `source` and writes it to `path` as an RGBA8 PNG in the
    /// background. Blocks only while the screenshot queue is full and for the
    /// staging copy.
    pub fn screenshot<D: GpuDevice>(
        &mut self,
        device: &Arc<D>,
        source: &PresentedImage,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        self.screenshots.make_room();
        let request = self.stage(device, source)?;
        let path = path.as_ref().to_path_buf();
        let task_path = path.clone();
        self.screenshots
            .spawn(format!("screenshot-{}", request.sequence), move || {
                write_png(&request, &task_path)
            })
            .map_err(|source| RenderError::CaptureIo { path, source })
    }

    /// Opens `path` (truncating it) as the output of a new recording. An
    /// active recording is stopped first.
    pub fn start_recording(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.recording.is_some() {
            self.stop_recording()?;
        }
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| RenderError::CaptureIo {
            path: path.clone(),
            source,
        })?;
        info!("Recording video to {}", path.display());
        self.recording = Some(Recording {
            path,
            writer: Arc::new(Mutex::new(VideoWriter {
                out: BufWriter::new(file),
                frames_written: 0,
            })),
            chain: OrderChain::new(),
            frames_requested: 0,
        });
        Ok(())
    }

    /// Captures `source` as the next video frame. Does nothing while no
    /// recording is active.
    pub fn record_video_frame<D: GpuDevice>(
        &mut self,
        device: &Arc<D>,
        source: &PresentedImage,
    ) -> Result<()> {
        if self.recording.is_none() {
            return Ok(());
        }
        self.video.make_room();
        let request = self.stage(device, source)?;
        let Some(recording) = self.recording.as_mut() else {
            return Ok(());
        };

        let mut token = recording.chain.next_token();
        let writer = Arc::clone(&recording.writer);
        let encoder = Arc::clone(&self.encoder);
        recording.frames_requested += 1;
        let sequence = request.sequence;

        self.video
            .spawn(format!("video-frame-{}", sequence), move || {
                let encoded = encoder
                    .encode(&request)
                    .with_context(|| format!("Failed to encode video frame {}", sequence))?;
                token.wait_for_predecessor();
                let mut writer = writer
                    .lock()
                    .map_err(|_| anyhow!("Video writer lock poisoned"))?;
                writer
                    .out
                    .write_all(&encoded)
                    .with_context(|| format!("Failed to append video frame {}", sequence))?;
                writer.frames_written += 1;
                drop(writer);
                token.complete();
                Ok(())
            })
            .map_err(|source| RenderError::CaptureIo {
                path: recording.path.clone(),
                source,
            })
    }

    /// Waits for every outstanding video frame, then flushes and closes the
    /// file. Returns the number of frames written; 0 when not recording.
    pub fn stop_recording(&mut self) -> Result<u64> {
        let Some(recording) = self.recording.take() else {
            return Ok(0);
        };
        self.video.drain();

        let mut writer = recording
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writer
            .out
            .flush()
            .map_err(|source| RenderError::CaptureIo {
                path: recording.path.clone(),
                source,
            })?;
        let written = writer.frames_written;
        if written != recording.frames_requested {
            warn!(
                requested = recording.frames_requested,
                written, "Some video frames were not written"
            );
        }
        info!(frames = written, "Recording finished: {}", recording.path.display());
        Ok(written)
    }

    /// Waits for all screenshots and finishes any recording.
    pub fn drain(&mut self) -> Result<()> {
        self.screenshots.drain();
        self.stop_recording().map(|_| ())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn pending_screenshots(&self) -> usize {
        self.screenshots.len()
    }

    pub fn pending_video_frames(&self) -> usize {
        self.video.len()
    }

    pub fn screenshot_queue(&self) -> &CaptureQueue {
        &self.screenshots
    }

    pub fn video_queue(&self) -> &CaptureQueue {
        &self.video
    }
}

impl Drop for CaptureService {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            warn!("Capture output was not finalized: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{Call, MockDevice};
    use std::time::Duration;

    fn presented(width: u32, height: u32) -> PresentedImage {
        PresentedImage {
            image: vk::Image::null(),
            extent: vk::Extent2D { width, height },
            format: vk::Format::B8G8R8A8_SRGB,
            frame_number: 0,
        }
    }

    #[test]
    fn staging_copies_and_releases() {
        let device = MockDevice::shared();
        device.set_pixel([1, 2, 3, 4]);
        let request = stage(&device, &presented(8, 4), 100, 7).unwrap();
        assert_eq!(request.pixels.len(), 8 * 4 * 4);
        assert_eq!(&request.pixels[..4], &[1, 2, 3, 4]);
        assert_eq!(request.sequence, 7);
        assert_eq!(device.count_calls(|c| matches!(c, Call::CopyToStaging { .. })), 1);
        assert_eq!(device.live_handle_count(), 0);
    }

    #[test]
    fn padded_row_pitch_is_fatal() {
        let device = MockDevice::shared();
        device.set_row_pitch(800 * 4 + 128);
        let err = stage(&device, &presented(800, 600), 100, 0).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UnsupportedRowPitch {
                row_pitch: 3328,
                expected: 3200
            }
        ));
        assert!(err.is_fatal());
        assert_eq!(device.count_calls(|c| matches!(c, Call::CopyToStaging { .. })), 0);
        assert_eq!(device.live_handle_count(), 0);
    }

    #[test]
    fn copy_timeout_is_fatal() {
        let device = MockDevice::shared();
        device.hang_copies();
        let err = stage(&device, &presented(4, 4), 100, 0).unwrap_err();
        assert!(matches!(err, RenderError::CaptureTimeout { timeout_ms: 100 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn swizzles_bgra_and_forces_opaque_alpha() {
        let request = CaptureRequest {
            pixels: vec![10, 20, 30, 0],
            extent: vk::Extent2D { width: 1, height: 1 },
            row_pitch: 4,
            format: vk::Format::B8G8R8A8_UNORM,
            sequence: 0,
            frame_number: 0,
        };
        assert_eq!(request.to_rgba(), vec![30, 20, 10, 255]);
        assert_eq!(request.to_rgb(), vec![30, 20, 10]);

        let rgba = CaptureRequest {
            format: vk::Format::R8G8B8A8_UNORM,
            ..request
        };
        assert_eq!(rgba.to_rgba(), vec![10, 20, 30, 255]);
    }

    #[test]
    fn queue_never_exceeds_capacity_and_counts_forced_waits() {
        let mut queue = CaptureQueue::new("test", 16);
        for i in 0..20 {
            queue
                .spawn(format!("task-{}", i), || {
                    thread::sleep(Duration::from_millis(5));
                    Ok(())
                })
                .unwrap();
            assert!(queue.len() <= 16);
        }
        assert_eq!(queue.forced_waits(), 4);
        queue.drain();
        assert!(queue.is_empty());
        assert_eq!(queue.failures(), 0);
    }

    #[test]
    fn failed_tasks_are_counted_not_propagated() {
        let mut queue = CaptureQueue::new("test", 2);
        queue
            .spawn("fails".to_string(), || Err(anyhow!("disk full")))
            .unwrap();
        queue.drain();
        assert_eq!(queue.failures(), 1);
    }

    #[test]
    fn order_tokens_serialize_out_of_order_completion() {
        let mut chain = OrderChain::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..6u64 {
            let mut token = chain.next_token();
            let log = Arc::clone(&log);
            handles.push(thread::spawn(move || {
                // Later tasks finish their work first.
                thread::sleep(Duration::from_millis((6 - i) * 10));
                token.wait_for_predecessor();
                log.lock().unwrap().push(i);
                token.complete();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn dropped_token_releases_successor_after_its_predecessor() {
        let mut chain = OrderChain::new();
        let first = chain.next_token();
        let second = chain.next_token();
        let mut third = chain.next_token();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_first = Arc::clone(&log);
        let first_task = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            log_first.lock().unwrap().push(1);
            first.complete();
        });
        // The second task fails without completing.
        let second_task = thread::spawn(move || drop(second));
        third.wait_for_predecessor();
        log.lock().unwrap().push(3);

        first_task.join().unwrap();
        second_task.join().unwrap();
        assert_eq!(*log.lock().unwrap(), vec![1, 3]);
    }

    /// Emits the sequence number as one byte, slower for earlier frames.
    struct SlowFirstEncoder;

    impl FrameEncoder for SlowFirstEncoder {
        fn encode(&self, frame: &CaptureRequest) -> anyhow::Result<Vec<u8>> {
            thread::sleep(Duration::from_millis(8u64.saturating_sub(frame.sequence) * 5));
            Ok(vec![frame.sequence as u8])
        }
    }

    #[test]
    fn video_frames_are_written_in_capture_order() {
        let device = MockDevice::shared();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mjpeg");
        let mut service =
            CaptureService::with_encoder(CaptureConfig::default(), Arc::new(SlowFirstEncoder));

        service.start_recording(&path).unwrap();
        for _ in 0..8 {
            service.record_video_frame(&device, &presented(4, 4)).unwrap();
        }
        assert_eq!(service.stop_recording().unwrap(), 8);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(!service.is_recording());
    }

    #[test]
    fn stop_recording_writes_exactly_the_captured_frames() {
        let device = MockDevice::shared();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let mut service = CaptureService::new(CaptureConfig::default());

        assert_eq!(service.stop_recording().unwrap(), 0);
        service.start_recording(&path).unwrap();
        for _ in 0..5 {
            service.record_video_frame(&device, &presented(16, 8)).unwrap();
        }
        assert_eq!(service.stop_recording().unwrap(), 5);

        let bytes = std::fs::read(&path).unwrap();
        let frames = bytes.windows(2).filter(|w| *w == [0xFF, 0xD8]).count();
        assert_eq!(frames, 5);
    }

    #[test]
    fn video_frames_are_ignored_when_not_recording() {
        let device = MockDevice::shared();
        let mut service = CaptureService::new(CaptureConfig::default());
        service.record_video_frame(&device, &presented(4, 4)).unwrap();
        assert_eq!(device.count_calls(|c| matches!(c, Call::CopyToStaging { .. })), 0);
    }

    #[test]
    fn screenshot_is_written_as_rgba_png() {
        let device = MockDevice::shared();
        device.set_pixel([10, 20, 30, 0]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        let mut service = CaptureService::new(CaptureConfig::default());

        service.screenshot(&device, &presented(3, 2), &path).unwrap();
        service.drain().unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (3, 2));
        assert_eq!(info.color_type, png::ColorType::Rgba);
        assert_eq!(&buf[..4], &[30, 20, 10, 255]);
    }

    #[test]
    fn twenty_screenshots_force_four_waits() {
        let device = MockDevice::shared();
        let dir = tempfile::tempdir().unwrap();
        let mut service = CaptureService::new(CaptureConfig::default());
        for i in 0..20 {
            service
                .screenshot(&device, &presented(4, 4), dir.path().join(format!("{}.png", i)))
                .unwrap();
            assert!(service.pending_screenshots() <= 16);
        }
        assert_eq!(service.screenshot_queue().forced_waits(), 4);
        service.drain().unwrap();
        assert_eq!(service.pending_screenshots(), 0);
        assert_eq!(service.screenshot_queue().failures(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 20);
    }
}
