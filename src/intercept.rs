//! Packet interceptors.
//!
//! An interceptor sees every packet crossing the session boundary in either
//! direction and can veto it by returning `false`. A vetoed packet is
//! dropped silently; the session does not answer or report it. An
//! interceptor that panics vetoes the packet too, and the panic is reported
//! as an `interceptorError`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use packets::{CallPacket, PollPacket, ResponsePacket};

use crate::dispatch::panic_message;
use crate::error::ProtocolError;

pub trait Interceptor: Send + Sync {
    /// Outgoing call, before it is registered.
    fn on_send(&self, _call: &CallPacket) -> bool {
        true
    }

    /// Outgoing reply, as it leaves in a flush.
    fn on_respond(&self, _reply: &ResponsePacket) -> bool {
        true
    }

    /// Incoming call, before the handler is looked up.
    fn on_call(&self, _call: &CallPacket) -> bool {
        true
    }

    /// Incoming reply, before it is matched to a pending call.
    fn on_response(&self, _reply: &ResponsePacket) -> bool {
        true
    }

    /// Incoming poll.
    fn on_poll(&self, _poll: &PollPacket) -> bool {
        true
    }
}

/// Logs every packet at debug level and lets it through.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketTrace;

impl Interceptor for PacketTrace {
    fn on_send(&self, call: &CallPacket) -> bool {
        tracing::debug!(id = %call.id, method = %call.method, "rpc: send call");
        true
    }

    fn on_respond(&self, reply: &ResponsePacket) -> bool {
        tracing::debug!(id = %reply.id, status = %reply.status, "rpc: send reply");
        true
    }

    fn on_call(&self, call: &CallPacket) -> bool {
        tracing::debug!(id = %call.id, method = %call.method, "rpc: recv call");
        true
    }

    fn on_response(&self, reply: &ResponsePacket) -> bool {
        tracing::debug!(id = %reply.id, status = %reply.status, "rpc: recv reply");
        true
    }

    fn on_poll(&self, poll: &PollPacket) -> bool {
        tracing::debug!(id = %poll.id, "rpc: recv poll");
        true
    }
}

/// `Ok(true)` when every interceptor lets the packet through. A panicking
/// interceptor stops the chain with an error naming `hook`.
pub(crate) fn allows(
    interceptors: &[Arc<dyn Interceptor>],
    hook: &'static str,
    check: impl Fn(&dyn Interceptor) -> bool,
) -> Result<bool, ProtocolError> {
    for interceptor in interceptors {
        match catch_unwind(AssertUnwindSafe(|| check(interceptor.as_ref()))) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(panic) => {
                return Err(ProtocolError::Interceptor { hook, msg: panic_message(panic.as_ref()) });
            }
        }
    }
    Ok(true)
}
