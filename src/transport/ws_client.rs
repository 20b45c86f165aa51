//! WebSocket client adapter.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, SocketConfig};
use crate::error::TransportError;
use crate::handlers::Handlers;
use crate::session::Session;
use crate::transport::socket::{self, SocketFrame, SocketTransport};

/// Connect to `url` and run a streaming session over the socket.
///
/// The connection task holds the session weakly: dropping every handle
/// closes the socket. A remote close fails all pending calls.
///
/// # Errors
///
/// Returns [`TransportError::WebSocket`] if the handshake fails.
pub async fn connect(
    url: &str,
    handlers: Handlers,
    socket: SocketConfig,
    config: SessionConfig,
) -> Result<Session, TransportError> {
    let (mut stream, _) = connect_async(url).await?;
    let (transport, mut outbound) = SocketTransport::new("ws client", socket.encoding);
    let session = Session::new(Arc::new(transport), handlers, config);
    let weak = session.downgrade();
    info!(%url, session = session.tag(), "ws: connected");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else { break };
                    let msg = match msg {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "ws: receive failed");
                            break;
                        }
                    };
                    let Some(session) = weak.upgrade() else { break };
                    match msg {
                        Message::Text(text) => socket::receive_text(&session, text.as_str()),
                        Message::Binary(bytes) => socket::receive_binary(&session, &bytes),
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                out = outbound.recv() => {
                    // Every session handle is gone.
                    let Some(out) = out else { break };
                    if let Err(e) = stream.send(to_message(out.frame)).await {
                        warn!(error = %e, "ws: send failed");
                        break;
                    }
                    out.delivered.notify();
                }
            }
        }

        if let Some(session) = weak.upgrade() {
            session.cancel_all("Connection closed", Value::Null);
        }
        let _ = stream.close(None).await;
        debug!("ws: connection task finished");
    });

    Ok(session)
}

fn to_message(frame: SocketFrame) -> Message {
    match frame {
        SocketFrame::Text(text) => Message::Text(text.into()),
        SocketFrame::Binary(bytes) => Message::Binary(bytes.into()),
    }
}
