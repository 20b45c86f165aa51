//! Transport adapters and the contract they implement.
//!
//! ARCHITECTURE
//! ============
//! A [`crate::Session`] owns exactly one [`Transport`]. The session decides
//! *what* to send and *when*; the transport only moves packets:
//!
//! - `physical_send` carries a call (or a poll) to the remote side.
//! - `physical_respond` carries replies back over the physical reply handle
//!   captured in a [`ReplyContext`].
//!
//! Both hooks run while the session holds its state lock, so they must not
//! block and must never call back into the session. Adapters that need I/O
//! hand the packet to a task through a channel.

pub mod bridge;
pub mod channel;
pub mod http_client;
pub mod http_server;
pub mod socket;
pub mod ws_client;
pub mod ws_server;

use std::sync::{Arc, Mutex, PoisonError};

use packets::Packet;
use tokio::sync::oneshot;

use crate::error::TransportError;

/// The adapter seam between a session and a concrete carrier.
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Streaming transports can push any number of messages in either
    /// direction at any time; request/response transports answer once per
    /// physical request.
    fn is_streaming(&self) -> bool;

    /// Transmit a call or a poll.
    ///
    /// # Errors
    ///
    /// Returns an error when the adapter cannot originate messages or the
    /// carrier is closed.
    fn physical_send(&self, packet: Packet) -> Result<(), TransportError>;

    /// Transmit one flush of replies. `delivered` must be notified once the
    /// bytes have been handed off.
    ///
    /// # Errors
    ///
    /// Returns an error when the reply handle is spent or the carrier is
    /// closed.
    fn physical_respond(
        &self,
        packet: Packet,
        ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError>;

    /// Request/response clients send a fresh `poll` after a final,
    /// non-terminal reply so the server has somewhere to put the next one.
    fn repoll_on_progress(&self) -> bool {
        false
    }
}

// =============================================================================
// REPLY CONTEXT
// =============================================================================

type ReplySlot = Arc<Mutex<Option<oneshot::Sender<Packet>>>>;

/// Handle to the physical request a reply should travel on.
///
/// Streaming transports use an empty context. Request/response servers
/// create a one-shot context per physical request: the first flush consumes
/// it, and dropping every clone unanswered closes the receiver.
#[derive(Clone, Default)]
pub struct ReplyContext {
    slot: Option<ReplySlot>,
}

impl ReplyContext {
    /// Context for streaming transports.
    #[must_use]
    pub fn stream() -> Self {
        Self::default()
    }

    /// Context backed by a one-shot reply slot.
    #[must_use]
    pub fn one_shot() -> (Self, oneshot::Receiver<Packet>) {
        let (tx, rx) = oneshot::channel();
        (Self { slot: Some(Arc::new(Mutex::new(Some(tx)))) }, rx)
    }

    #[must_use]
    pub fn is_one_shot(&self) -> bool {
        self.slot.is_some()
    }

    /// Whether the one-shot slot is still unanswered.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|tx| !tx.is_closed())
        })
    }

    /// Consume the one-shot slot with `packet`.
    ///
    /// # Errors
    ///
    /// [`TransportError::ReplyAlreadySent`] if the slot was already used or
    /// the context is a streaming one, [`TransportError::Closed`] if the
    /// waiting request has gone away.
    pub fn reply(&self, packet: Packet) -> Result<(), TransportError> {
        let Some(slot) = &self.slot else {
            return Err(TransportError::ReplyAlreadySent);
        };
        let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(sender) = sender else {
            return Err(TransportError::ReplyAlreadySent);
        };
        sender.send(packet).map_err(|_| TransportError::Closed)
    }
}

impl std::fmt::Debug for ReplyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyContext")
            .field("one_shot", &self.is_one_shot())
            .field("open", &self.is_open())
            .finish()
    }
}

// =============================================================================
// DELIVERY ACKNOWLEDGEMENT
// =============================================================================

/// Fired by an adapter once a flush has been handed to the carrier.
///
/// The session builds this from the acknowledgement callbacks of every item
/// in the flush. Dropping it without calling [`Delivered::notify`] means the
/// bytes never left.
#[derive(Default)]
pub struct Delivered(Option<Box<dyn FnOnce() + Send>>);

impl Delivered {
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn notify(self) {
        if let Some(f) = self.0 {
            f();
        }
    }
}

impl std::fmt::Debug for Delivered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Delivered").field(&self.0.is_some()).finish()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
