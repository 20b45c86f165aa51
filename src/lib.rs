//! Transport-agnostic RPC.
//!
//! A [`Session`] sends calls, answers calls through registered
//! [`Handlers`], and aggregates streamed replies so the same handler works
//! over buffered HTTP, WebSockets, in-process channels and pub/sub bridges.
//! Wire types live in the `packets` crate and are re-exported here.

pub mod call;
pub mod config;
mod dispatch;
pub mod error;
pub mod handlers;
pub mod intercept;
mod response;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use call::{Callback, Callbacks, Reply};
pub use config::{Encoding, HttpClientConfig, HttpServerConfig, SessionConfig, SocketConfig};
pub use dispatch::ErrorSink;
pub use error::{BoxError, CallError, ErrorCode, ProtocolError, TransportError, error_payload};
pub use handlers::{Handler, Handlers};
pub use intercept::{Interceptor, PacketTrace};
pub use packets::{CallPacket, Packet, PacketList, PollPacket, ResponsePacket, Status};
pub use response::Ack;
pub use session::{Responder, Session, WeakSession};
pub use transport::{Delivered, ReplyContext, Transport};
