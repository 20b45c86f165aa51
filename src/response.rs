//! Aggregation of replies for one incoming call.
//!
//! A handler can emit any number of items. On request/response transports a
//! physical reply handle can carry exactly one message, so items queue up and
//! are flushed as one packet (a `list` when there is more than one) each time
//! the remote side offers a fresh handle. The `fresh` flag tracks whether the
//! current handle is unused; `held` keeps the queue closed while the handler
//! is still running synchronously so its first burst leaves as one batch.
//!
//! Streaming transports flush every item the moment it is emitted.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use packets::{Packet, PacketList, ResponsePacket, Status};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::transport::ReplyContext;

/// Acknowledgement hook attached to one queued item.
pub type Ack = Box<dyn FnOnce() + Send>;

/// One reply waiting for a transmission opportunity.
pub(crate) struct Item {
    pub packet: ResponsePacket,
    pub ack: Option<Ack>,
}

/// Everything one physical transmission needs.
pub(crate) struct Flush {
    pub items: Vec<ResponsePacket>,
    pub acks: Vec<Ack>,
    pub ctx: ReplyContext,
    /// The flush carries the terminal item; the response must be retired.
    pub terminal: bool,
}

impl Flush {
    /// Single item as itself, several as a `list`, none as nothing.
    pub(crate) fn into_packet(items: Vec<ResponsePacket>) -> Option<Packet> {
        match items.len() {
            0 => None,
            1 => items.into_iter().next().map(Packet::Response),
            _ => Some(Packet::List(PacketList::new(
                items.into_iter().map(Packet::Response).collect(),
            ))),
        }
    }
}

pub(crate) struct ResponseState {
    id: String,
    method: String,
    ctx: ReplyContext,
    queue: VecDeque<Item>,
    fresh: bool,
    held: bool,
    completed: bool,
    touched: Instant,
}

impl ResponseState {
    pub(crate) fn new(id: String, method: String, ctx: ReplyContext, held: bool) -> Self {
        Self {
            id,
            method,
            ctx,
            queue: VecDeque::new(),
            fresh: true,
            held,
            completed: false,
            touched: Instant::now(),
        }
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    /// A terminal item has been queued; nothing more may follow.
    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    /// Time since the handler last emitted or the remote side last polled.
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.touched)
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Append one item.
    pub(crate) fn push(
        &mut self,
        status: Status,
        data: Value,
        progress: Option<f64>,
        ack: Option<Ack>,
    ) -> Result<(), ProtocolError> {
        if self.completed {
            return Err(ProtocolError::ResponseCompleted { id: self.id.clone() });
        }
        self.completed = status.is_terminal();
        self.touched = Instant::now();
        let packet = ResponsePacket { id: self.id.clone(), status, data, progress };
        self.queue.push_back(Item { packet, ack });
        Ok(())
    }

    /// A poll arrived: adopt its reply handle.
    pub(crate) fn rearm(&mut self, ctx: ReplyContext) {
        self.ctx = ctx;
        self.fresh = true;
        self.touched = Instant::now();
    }

    pub(crate) fn release(&mut self) {
        self.held = false;
    }

    /// Drain the queue if a transmission is allowed right now.
    pub(crate) fn take_flush(&mut self, streaming: bool) -> Option<Flush> {
        if self.queue.is_empty() || self.held {
            return None;
        }
        if !streaming && !self.fresh {
            return None;
        }
        if !streaming {
            self.fresh = false;
        }

        let mut items = Vec::with_capacity(self.queue.len());
        let mut acks = Vec::new();
        let mut terminal = false;
        for item in self.queue.drain(..) {
            terminal |= item.packet.status.is_terminal();
            acks.extend(item.ack);
            items.push(item.packet);
        }
        Some(Flush { items, acks, ctx: self.ctx.clone(), terminal })
    }
}

#[cfg(test)]
#[path = "response_test.rs"]
mod tests;
