//! Streaming transport shared by the WebSocket server and client.
//!
//! The session side pushes encoded frames into an unbounded queue; the
//! connection task owns the socket, writes each frame and then notifies the
//! frame's delivery hook. Text frames carry JSON and binary frames carry
//! protobuf, in both directions.

use packets::Packet;
use tokio::sync::mpsc;

use crate::config::Encoding;
use crate::error::TransportError;
use crate::session::Session;
use crate::transport::{Delivered, ReplyContext, Transport};

pub(crate) enum SocketFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// One frame waiting for the connection task.
pub(crate) struct Outbound {
    pub frame: SocketFrame,
    pub delivered: Delivered,
}

pub(crate) struct SocketTransport {
    name: &'static str,
    encoding: Encoding,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SocketTransport {
    pub(crate) fn new(name: &'static str, encoding: Encoding) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { name, encoding, tx }, rx)
    }

    fn push(&self, packet: &Packet, delivered: Delivered) -> Result<(), TransportError> {
        let frame = match self.encoding {
            Encoding::Json => SocketFrame::Text(packets::encode_json(packet)?),
            Encoding::Protobuf => SocketFrame::Binary(packets::encode_packet(packet)),
        };
        self.tx
            .send(Outbound { frame, delivered })
            .map_err(|_| TransportError::Closed)
    }
}

impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn physical_send(&self, packet: Packet) -> Result<(), TransportError> {
        self.push(&packet, Delivered::none())
    }

    fn physical_respond(
        &self,
        packet: Packet,
        _ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError> {
        self.push(&packet, delivered)
    }
}

/// Route an incoming text frame.
pub(crate) fn receive_text(session: &Session, text: &str) {
    session.handle_bytes(text.as_bytes(), ReplyContext::stream());
}

/// Route an incoming binary frame.
pub(crate) fn receive_binary(session: &Session, bytes: &[u8]) {
    match packets::decode_packet(bytes) {
        Ok(packet) => session.handle_message(packet, ReplyContext::stream()),
        Err(err) => session.report(err.into()),
    }
}

#[cfg(test)]
#[path = "socket_test.rs"]
mod tests;
