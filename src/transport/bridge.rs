//! Pub/sub bridge adapter.
//!
//! A [`Bus`] stands in for a window's message event target: anything posted
//! to it reaches every listener. A host and an embedded frame (or worker)
//! each own one bus; each side listens on its own bus and posts to the
//! other's.

use std::sync::Arc;

use packets::Packet;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::handlers::Handlers;
use crate::session::{Session, WeakSession};
use crate::transport::{Delivered, ReplyContext, Transport};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Packet>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Post a packet to every current listener.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] when nobody is listening.
    pub fn post(&self, packet: Packet) -> Result<(), TransportError> {
        self.tx.send(packet).map(|_| ()).map_err(|_| TransportError::Closed)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Packet> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct BridgeTransport {
    dest: Bus,
}

impl Transport for BridgeTransport {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn is_streaming(&self) -> bool {
        true
    }

    fn physical_send(&self, packet: Packet) -> Result<(), TransportError> {
        self.dest.post(packet)
    }

    fn physical_respond(
        &self,
        packet: Packet,
        _ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError> {
        self.dest.post(packet)?;
        delivered.notify();
        Ok(())
    }
}

/// Session that listens on `source` and posts to `dest`.
#[must_use]
pub fn attach(source: &Bus, dest: &Bus, handlers: Handlers, config: SessionConfig) -> Session {
    let rx = source.subscribe();
    let session = Session::new(Arc::new(BridgeTransport { dest: dest.clone() }), handlers, config);
    tokio::spawn(listen(session.downgrade(), rx));
    session
}

async fn listen(session: WeakSession, mut rx: broadcast::Receiver<Packet>) {
    loop {
        let packet = match rx.recv().await {
            Ok(packet) => packet,
            Err(RecvError::Lagged(missed)) => {
                let Some(session) = session.upgrade() else {
                    return;
                };
                session.report(TransportError::Lagged(missed).into());
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(session) = session.upgrade() else {
            return;
        };
        session.handle_message(packet, ReplyContext::stream());
    }
    if let Some(session) = session.upgrade() {
        session.cancel_all("Bus closed", Value::Null);
    }
}

#[cfg(test)]
#[path = "bridge_test.rs"]
mod tests;
