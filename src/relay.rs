//! Content-side relay between a page's message bus and the extension runtime.

use serde_json::Value;
use tracing::{debug, trace};

use crate::channel::{Delivery, RuntimeChannel};
use crate::protocol::{self, ProbeResponse, RuntimeMessage};
use crate::window::{MessageBusReceiver, WindowEvent, WindowId};

/// What happened to one locally posted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Not ours: wrong window or no protocol tag
    Ignored,
    /// Accepted and handed to the runtime channel
    Forwarded(Delivery),
}

/// Counters for a bridge's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub ignored: usize,
    pub delivered: usize,
    pub dropped: usize,
}

impl RelayStats {
    fn record(&mut self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Ignored => self.ignored += 1,
            RelayOutcome::Forwarded(Delivery::Delivered) => self.delivered += 1,
            RelayOutcome::Forwarded(Delivery::Dropped(_)) => self.dropped += 1,
        }
    }
}

/// Relay attached to a single window.
pub struct RelayBridge<C> {
    window: WindowId,
    channel: C,
}

impl<C: RuntimeChannel> RelayBridge<C> {
    pub fn new(window: WindowId, channel: C) -> Self {
        Self { window, channel }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Returns the message to forward if `event` was posted by this window
    /// and carries the protocol tag.
    pub fn accept(&self, event: &WindowEvent) -> Option<RuntimeMessage> {
        if event.source != self.window {
            return None;
        }
        if !protocol::is_signed(&event.data) {
            return None;
        }
        Some(RuntimeMessage::from_signed(&event.data))
    }

    pub async fn receive_local(&self, event: &WindowEvent) -> RelayOutcome {
        match self.accept(event) {
            Some(message) => RelayOutcome::Forwarded(self.forward(message).await),
            None => RelayOutcome::Ignored,
        }
    }

    /// Best-effort hand-off to the runtime channel; never fails.
    pub async fn forward(&self, message: RuntimeMessage) -> Delivery {
        match self.channel.send_message(message).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                trace!(window = %self.window, "forward dropped: {}", e);
                Delivery::Dropped(e)
            }
        }
    }

    /// Answer runtime requests addressed to this content context.
    /// Only the liveness probe gets a response.
    pub fn handle_runtime_request(&self, request: &RuntimeMessage) -> Option<ProbeResponse> {
        if request.is_ping() {
            debug!(window = %self.window, "answering liveness probe");
            Some(ProbeResponse::ok())
        } else {
            None
        }
    }

    /// Same as [`handle_runtime_request`](Self::handle_runtime_request) with
    /// the reply already in wire form.
    pub fn respond(&self, request: &RuntimeMessage) -> Option<Value> {
        self.handle_runtime_request(request)
            .map(|r| serde_json::json!({ "status": r.status }))
    }

    /// Relay every message posted on the bus until the page goes away.
    pub async fn run(&self, mut bus: MessageBusReceiver) -> RelayStats {
        let mut stats = RelayStats::default();
        while let Some(event) = bus.recv().await {
            let outcome = self.receive_local(&event).await;
            stats.record(&outcome);
        }
        debug!(window = %self.window, ?stats, "message bus closed, relay stopped");
        stats
    }
}
