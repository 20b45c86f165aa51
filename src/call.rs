//! Outgoing calls and the registry of calls awaiting replies.
//!
//! Ids are `{seed}-{counter}`: the seed is the session tag (random unless
//! configured) and the counter increases per call, so ids are unique for the
//! lifetime of one session. A call stays registered until a terminal reply
//! arrives or the session cancels everything.

use std::collections::HashMap;
use std::sync::Arc;

use packets::{CallPacket, ResponsePacket, Status};
use serde_json::Value;

use crate::error::BoxError;

/// Payload handed to a callback.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub data: Value,
    /// Fraction of work done, when the handler reported one.
    pub progress: Option<f64>,
}

impl Reply {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self { data, progress: None }
    }
}

impl From<&ResponsePacket> for Reply {
    fn from(packet: &ResponsePacket) -> Self {
        Self { data: packet.data.clone(), progress: packet.progress }
    }
}

pub type Callback = Arc<dyn Fn(Reply) -> Result<(), BoxError> + Send + Sync>;

/// Per-status callbacks for one call. `success` is mandatory.
#[derive(Clone)]
pub struct Callbacks {
    success: Callback,
    progress: Option<Callback>,
    fail: Option<Callback>,
}

impl Callbacks {
    pub fn on_success<F>(f: F) -> Self
    where
        F: Fn(Reply) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Self { success: Arc::new(f), progress: None, fail: None }
    }

    #[must_use]
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(Reply) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_fail<F>(mut self, f: F) -> Self
    where
        F: Fn(Reply) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.fail = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn for_status(&self, status: Status) -> Option<&Callback> {
        match status {
            Status::Success => Some(&self.success),
            Status::Progress => self.progress.as_ref(),
            Status::Fail => self.fail.as_ref(),
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("progress", &self.progress.is_some())
            .field("fail", &self.fail.is_some())
            .finish_non_exhaustive()
    }
}

/// A call this side originated and is still waiting on.
#[derive(Debug)]
pub struct Call {
    pub id: String,
    pub method: String,
    pub callbacks: Callbacks,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// What to do with an incoming reply.
pub(crate) enum Resolution {
    /// No pending call has this id.
    Unknown,
    /// Run `callback` with the reply. `retired` when the reply was terminal.
    Deliver { method: String, callback: Callback, retired: bool },
    /// Progress with no progress callback; the call stays pending.
    Ignored,
    /// Terminal reply with no callback for its status; the call is retired.
    MissingCallback { method: String },
}

pub(crate) struct CallRegistry {
    seed: String,
    counter: u64,
    calls: HashMap<String, Call>,
}

impl CallRegistry {
    pub(crate) fn new(seed: impl Into<String>) -> Self {
        Self { seed: seed.into(), counter: 0, calls: HashMap::new() }
    }

    /// Allocate the next id and build the wire packet for it.
    pub(crate) fn prepare(&mut self, method: &str, data: Value) -> CallPacket {
        let id = format!("{}-{}", self.seed, self.counter);
        self.counter += 1;
        CallPacket { id, method: method.to_owned(), data }
    }

    pub(crate) fn insert(&mut self, call: Call) {
        self.calls.insert(call.id.clone(), call);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Call> {
        self.calls.remove(id)
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }

    /// Empty the registry, returning every pending call.
    pub(crate) fn drain(&mut self) -> Vec<Call> {
        self.calls.drain().map(|(_, call)| call).collect()
    }

    /// Match a reply against its pending call, retiring the call on a
    /// terminal status.
    pub(crate) fn resolve(&mut self, reply: &ResponsePacket) -> Resolution {
        let Some(call) = self.calls.get(&reply.id) else {
            return Resolution::Unknown;
        };
        let callback = call.callbacks.for_status(reply.status).cloned();
        let method = call.method.clone();

        let retired = reply.status.is_terminal();
        if retired {
            self.calls.remove(&reply.id);
        }

        match callback {
            Some(callback) => Resolution::Deliver { method, callback, retired },
            None if retired => Resolution::MissingCallback { method },
            None => Resolution::Ignored,
        }
    }
}

#[cfg(test)]
#[path = "call_test.rs"]
mod tests;
