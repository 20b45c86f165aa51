//! In-process channel adapter.
//!
//! Two sessions joined by a pair of unbounded queues. Packets are moved, not
//! serialised. Dropping one side fails the other side's pending calls.

use std::sync::Arc;

use packets::Packet;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::handlers::Handlers;
use crate::session::{Session, WeakSession};
use crate::transport::{Delivered, ReplyContext, Transport};

pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Packet>,
}

impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn physical_send(&self, packet: Packet) -> Result<(), TransportError> {
        self.tx.send(packet).map_err(|_| TransportError::Closed)
    }

    fn physical_respond(
        &self,
        packet: Packet,
        _ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError> {
        self.tx.send(packet).map_err(|_| TransportError::Closed)?;
        delivered.notify();
        Ok(())
    }
}

/// Build two connected sessions.
#[must_use]
pub fn pair(
    left_handlers: Handlers,
    left_config: SessionConfig,
    right_handlers: Handlers,
    right_config: SessionConfig,
) -> (Session, Session) {
    let (to_right, from_left) = mpsc::unbounded_channel();
    let (to_left, from_right) = mpsc::unbounded_channel();

    let left = Session::new(Arc::new(ChannelTransport { tx: to_right }), left_handlers, left_config);
    let right = Session::new(Arc::new(ChannelTransport { tx: to_left }), right_handlers, right_config);

    tokio::spawn(pump(left.downgrade(), from_right));
    tokio::spawn(pump(right.downgrade(), from_left));
    (left, right)
}

async fn pump(session: WeakSession, mut rx: mpsc::UnboundedReceiver<Packet>) {
    while let Some(packet) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        session.handle_message(packet, ReplyContext::stream());
    }
    if let Some(session) = session.upgrade() {
        session.cancel_all("Channel closed", Value::Null);
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
