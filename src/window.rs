use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::trace;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a browsing context that can post messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    pub fn next() -> Self {
        Self(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// A message observed on a window's message bus
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEvent {
    /// Window that posted the message
    pub source: WindowId,
    /// Target origin given by the poster
    pub target_origin: String,
    pub data: Value,
}

pub type MessageBusReceiver = mpsc::UnboundedReceiver<WindowEvent>;

/// Create a message bus for `window`. The poster side goes into the page
/// realm, the receiver side to whoever listens on that window.
pub fn message_bus(window: WindowId) -> (PagePoster, MessageBusReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PagePoster { window, bus: tx }, rx)
}

/// Posts messages onto a window's bus as that window.
#[derive(Debug, Clone)]
pub struct PagePoster {
    window: WindowId,
    bus: mpsc::UnboundedSender<WindowEvent>,
}

impl PagePoster {
    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Post `data` with target origin `*`.
    pub fn post(&self, data: Value) {
        self.post_to(data, "*");
    }

    pub fn post_to(&self, data: Value, target_origin: &str) {
        let event = WindowEvent {
            source: self.window,
            target_origin: target_origin.to_string(),
            data,
        };
        // Nobody listening is the same as an unattended window
        if self.bus.send(event).is_err() {
            trace!(window = %self.window, "message bus closed, message dropped");
        }
    }
}
