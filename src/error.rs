//! Error taxonomy for sessions and transports.
//!
//! Every error that has to cross the wire is rendered by [`error_payload`]
//! into the `{error, msg, options}` shape that `fail` callbacks receive.
//! Nothing in here is fatal to a session: protocol errors are reported to the
//! session's error sink and, when there is a call id to answer, turned into a
//! `fail` reply.

use packets::{CodecError, Status};
use serde_json::{Value, json};

/// Boxed error returned by application handlers and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Payload key carrying the grepable error code.
pub const ERROR_KEY: &str = "error";

/// Payload key carrying the human readable message.
pub const MSG_KEY: &str = "msg";

/// Payload key carrying caller supplied context.
pub const OPTIONS_KEY: &str = "options";

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured `fail` payloads.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Render an error into the wire payload delivered to `fail` callbacks.
#[must_use]
pub fn error_payload(err: &(impl ErrorCode + ?Sized), options: Value) -> Value {
    json!({
        ERROR_KEY: err.error_code(),
        MSG_KEY: err.to_string(),
        OPTIONS_KEY: options,
    })
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Failures raised by a transport adapter's physical hooks.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The underlying channel or socket is gone.
    #[error("transport closed")]
    Closed,
    /// The adapter has no way to originate calls.
    #[error("{0} cannot send")]
    CannotSend(&'static str),
    /// The adapter has no way to answer calls.
    #[error("{0} cannot respond")]
    CannotRespond(&'static str),
    /// The physical request this reply belonged to was already answered.
    #[error("reply already sent for this request")]
    ReplyAlreadySent,
    /// A pub/sub listener fell behind and lost messages.
    #[error("bridge listener lagged by {0} messages")]
    Lagged(u64),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("websocket failed: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// =============================================================================
// PROTOCOL
// =============================================================================

/// Everything a session can report to its error sink.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Response without call: {id}")]
    ResponseWithoutCall { id: String },
    #[error("Poll without response: {id}")]
    PollWithoutResponse { id: String },
    #[error("Unknown method: {method}")]
    UnknownMethod { id: String, method: String },
    #[error("Poll received on a streaming transport: {id}")]
    PollOnStreaming { id: String },
    #[error("No callback registered {method} {status}")]
    MissingCallback { id: String, method: String, status: Status },
    #[error("Response already completed: {id}")]
    ResponseCompleted { id: String },
    #[error("Invalid params for {method}: {msg}")]
    InvalidParams { method: String, msg: String },
    #[error("{msg}")]
    Connection { msg: String },
    #[error("Handler {method} failed: {msg}")]
    Handler { id: String, method: String, msg: String },
    #[error("Callback {context} failed: {msg}")]
    Callback { context: String, msg: String },
    #[error("ParseError: {0}")]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Send rejected: {method}")]
    SendRejected { method: String },
    #[error("Interceptor {hook} panicked: {msg}")]
    Interceptor { hook: &'static str, msg: String },
}

impl ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ResponseWithoutCall { .. } => "responseWithoutCall",
            Self::PollWithoutResponse { .. } => "pollWithoutResponse",
            Self::UnknownMethod { .. } => "unknownMethod",
            Self::PollOnStreaming { .. } => "pollOnStreaming",
            Self::MissingCallback { .. } => "missingCallback",
            Self::ResponseCompleted { .. } => "responseCompleted",
            Self::InvalidParams { .. } => "invalidParams",
            Self::Connection { .. } => "connectionError",
            Self::Handler { .. } => "handlerError",
            Self::Callback { .. } => "callbackError",
            Self::Codec(_) => "parseError",
            Self::Transport(_) => "transportError",
            Self::SendRejected { .. } => "sendRejected",
            Self::Interceptor { .. } => "interceptorError",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Transport(_))
    }
}

impl ProtocolError {
    /// Call id the error is about, when there is one to answer.
    #[must_use]
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ResponseWithoutCall { id }
            | Self::PollWithoutResponse { id }
            | Self::UnknownMethod { id, .. }
            | Self::PollOnStreaming { id }
            | Self::MissingCallback { id, .. }
            | Self::ResponseCompleted { id }
            | Self::Handler { id, .. } => Some(id),
            _ => None,
        }
    }
}

// =============================================================================
// TYPED CALLS
// =============================================================================

/// Outcome of a typed [`crate::Session::request`].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The remote side answered with `fail`; carries its payload.
    #[error("call failed: {0}")]
    Failed(Value),
    /// The call was retired without a terminal reply reaching us.
    #[error("call dropped before completion")]
    Dropped,
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Session(#[from] ProtocolError),
}

impl CallError {
    /// Error code carried by a `fail` payload, if it has one.
    #[must_use]
    pub fn remote_code(&self) -> Option<&str> {
        let Self::Failed(payload) = self else {
            return None;
        };
        payload.get(ERROR_KEY).and_then(Value::as_str)
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
