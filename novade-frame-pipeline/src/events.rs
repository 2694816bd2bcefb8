//! Window events delivered to the renderer.
//!
//! The windowing collaborator pushes [`WindowEvent`]s through an
//! [`EventSender`] from whatever thread its event loop runs on; the renderer
//! drains its [`EventQueue`] once at the start of every frame.

use std::sync::mpsc::{self, Receiver, Sender};

/// Identity of the window a renderer presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// New framebuffer size in pixels. Zero in either dimension means the
    /// window is minimized.
    Resized { width: u32, height: u32 },
    /// The surface contents must be rebuilt even though the size is unchanged.
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvent {
    pub window: WindowId,
    pub event: SurfaceEvent,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<WindowEvent>,
}

impl EventSender {
    /// Queues an event. Returns `false` once the renderer is gone.
    pub fn send(&self, window: WindowId, event: SurfaceEvent) -> bool {
        self.tx.send(WindowEvent { window, event }).is_ok()
    }

    pub fn resized(&self, window: WindowId, width: u32, height: u32) -> bool {
        self.send(window, SurfaceEvent::Resized { width, height })
    }
}

#[derive(Debug)]
pub struct EventQueue {
    rx: Receiver<WindowEvent>,
}

impl EventQueue {
    /// Takes every event queued so far without blocking.
    pub fn drain(&self) -> Vec<WindowEvent> {
        self.rx.try_iter().collect()
    }
}

pub fn event_channel() -> (EventSender, EventQueue) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventQueue { rx })
}
