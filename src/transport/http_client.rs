//! Polling HTTP client adapter.
//!
//! Every packet is one POST; the body of the answer is the server's reply.
//! Because the server can only speak when spoken to, the session sends a
//! fresh `poll` whenever the last reply it received for a call was not
//! terminal. Requests run on spawned tasks and their bodies are routed back
//! through one queue, so the session never blocks on the network.
//!
//! An empty answer means the server dropped the request without a reply
//! (its response was abandoned or an interceptor vetoed the packet). No
//! poll can revive that call, so it is failed on the spot.

use std::sync::Arc;

use axum::body::Bytes;
use packets::Packet;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{HttpClientConfig, SessionConfig};
use crate::error::TransportError;
use crate::handlers::Handlers;
use crate::session::{Session, WeakSession};
use crate::transport::{Delivered, ReplyContext, Transport};

enum Inbound {
    /// Answer to the request that carried packet `id`.
    Body { id: Option<String>, bytes: Bytes },
    Failed(TransportError),
}

pub struct HttpClientTransport {
    client: reqwest::Client,
    url: String,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl Transport for HttpClientTransport {
    fn name(&self) -> &'static str {
        "http client"
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn physical_send(&self, packet: Packet) -> Result<(), TransportError> {
        let body = packets::encode_json(&packet)?;
        let id = packet.id().map(str::to_owned);
        let request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            let outcome = match post(request).await {
                Ok(bytes) => Inbound::Body { id, bytes },
                Err(e) => Inbound::Failed(e),
            };
            let _ = inbound.send(outcome);
        });
        Ok(())
    }

    fn physical_respond(
        &self,
        _packet: Packet,
        _ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError> {
        delivered.notify();
        Err(TransportError::CannotRespond("http client"))
    }

    fn repoll_on_progress(&self) -> bool {
        true
    }
}

async fn post(request: reqwest::RequestBuilder) -> Result<Bytes, TransportError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::HttpStatus(status.as_u16()));
    }
    Ok(response.bytes().await?)
}

/// Build a session that talks to the server at `config.url`.
///
/// The session has no handlers: the server cannot call a polling client.
///
/// # Errors
///
/// Returns [`TransportError::Http`] if the HTTP client cannot be built.
pub fn connect(config: &HttpClientConfig, session: SessionConfig) -> Result<Session, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder.build()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let transport = HttpClientTransport { client, url: config.url.clone(), inbound: tx };
    let session = Session::new(Arc::new(transport), Handlers::new(), session);
    tokio::spawn(pump(session.downgrade(), rx, config.url.clone()));
    Ok(session)
}

async fn pump(session: WeakSession, mut rx: mpsc::UnboundedReceiver<Inbound>, url: String) {
    while let Some(inbound) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            return;
        };
        match inbound {
            Inbound::Body { id, bytes } if bytes.is_empty() => {
                debug!(%url, id = id.as_deref().unwrap_or_default(), "http: empty reply");
                if let Some(id) = id {
                    session.fail_call(&id, "Empty reply from server", json!({ "url": url }));
                }
            }
            Inbound::Body { bytes, .. } => {
                // That request can never be answered again.
                if !session.handle_bytes(&bytes, ReplyContext::stream()) {
                    session.cancel_all("ParseError", json!({ "url": url }));
                }
            }
            Inbound::Failed(err) => {
                warn!(%url, error = %err, "http: request failed");
                session.cancel_all(
                    "Cannot connect to server",
                    json!({ "url": url, "detail": err.to_string() }),
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "http_client_test.rs"]
mod tests;
