use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::RuntimeMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Could not establish connection. Receiving end does not exist.")]
    Disconnected,

    #[error("Extension context invalidated.")]
    ContextInvalidated,
}

/// Outcome of a best-effort send.
///
/// Callers are free to ignore it; it exists so the attempt itself can be
/// observed without the failure ever propagating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped(ChannelError),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// The extension runtime's messaging channel as seen from a content context
#[async_trait]
pub trait RuntimeChannel: Send + Sync {
    async fn send_message(&self, message: RuntimeMessage) -> Result<(), ChannelError>;
}

/// Sending half of an in-process runtime channel
#[derive(Debug, Clone)]
pub struct RuntimePort {
    tx: mpsc::UnboundedSender<RuntimeMessage>,
}

/// Receiving half, owned by the panel
#[derive(Debug)]
pub struct RuntimeInbox {
    rx: mpsc::UnboundedReceiver<RuntimeMessage>,
}

pub fn runtime_channel() -> (RuntimePort, RuntimeInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RuntimePort { tx }, RuntimeInbox { rx })
}

#[async_trait]
impl RuntimeChannel for RuntimePort {
    async fn send_message(&self, message: RuntimeMessage) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .map_err(|_| ChannelError::Disconnected)
    }
}

impl RuntimeInbox {
    pub async fn recv(&mut self) -> Option<RuntimeMessage> {
        self.rx.recv().await
    }

    /// Take every message already queued without waiting.
    pub fn drain(&mut self) -> Vec<RuntimeMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            out.push(message);
        }
        out
    }
}
