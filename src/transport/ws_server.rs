//! WebSocket server adapter.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → new Session over a socket transport, sharing the port's
//!    method table; `on_connect` sees the session so the server can call
//!    the client too
//! 2. `select!` loop: inbound frames → session, queued outbound frames →
//!    socket (then the frame's delivery hook fires)
//! 3. Close or socket error → `cancel_all("Connection closed")`

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{SessionConfig, SocketConfig};
use crate::handlers::Handlers;
use crate::session::Session;
use crate::transport::socket::{self, SocketFrame, SocketTransport};

pub type OnConnect = Arc<dyn Fn(Session) + Send + Sync>;

/// Accepts WebSocket connections and runs one session per connection.
#[derive(Clone)]
pub struct WsServerPort {
    handlers: Handlers,
    socket: SocketConfig,
    session: SessionConfig,
    on_connect: Option<OnConnect>,
}

impl WsServerPort {
    #[must_use]
    pub fn new(handlers: Handlers, socket: SocketConfig, session: SessionConfig) -> Self {
        Self { handlers, socket, session, on_connect: None }
    }

    #[must_use]
    pub fn on_connect(mut self, f: impl Fn(Session) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Router serving the upgrade endpoint at `path`.
    pub fn router(self, path: &str) -> Router {
        Router::new().route(path, get(handle_upgrade)).with_state(self)
    }
}

pub async fn handle_upgrade(State(port): State<WsServerPort>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(socket, port))
}

async fn run_connection(mut socket: WebSocket, port: WsServerPort) {
    let connection_id = Uuid::new_v4();
    let (transport, mut outbound) = SocketTransport::new("ws server", port.socket.encoding);
    let session = Session::new(Arc::new(transport), port.handlers.clone(), port.session.clone());

    info!(%connection_id, session = session.tag(), "ws: client connected");
    if let Some(on_connect) = &port.on_connect {
        on_connect(session.clone());
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(%connection_id, error = %e, "ws: receive failed");
                        break;
                    }
                };
                match msg {
                    Message::Text(text) => socket::receive_text(&session, text.as_str()),
                    Message::Binary(bytes) => socket::receive_binary(&session, &bytes),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(out) = outbound.recv() => {
                if socket.send(to_message(out.frame)).await.is_err() {
                    break;
                }
                out.delivered.notify();
            }
        }
    }

    session.cancel_all("Connection closed", json!({ "connection_id": connection_id.to_string() }));
    info!(%connection_id, "ws: client disconnected");
}

fn to_message(frame: SocketFrame) -> Message {
    match frame {
        SocketFrame::Text(text) => Message::Text(text.into()),
        SocketFrame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

#[cfg(test)]
#[path = "ws_server_test.rs"]
mod tests;
