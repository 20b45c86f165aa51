//! Buffered HTTP server adapter.
//!
//! DESIGN
//! ======
//! Each POST carries one packet and gets exactly one packet back. The
//! request handler builds a one-shot [`ReplyContext`], hands the packet to
//! the session and awaits the slot: the first flush for that request answers
//! it. Long-running calls keep replying through the client's polls, each poll
//! being a new POST with a fresh slot.
//!
//! A slot dropped unanswered (a `response` packet posted to the server, or a
//! response abandoned by the session) ends the request with 204.
//!
//! A client that stops polling leaves its response open. With an
//! `idle_timeout` configured, a background sweep abandons responses that
//! have been quiet that long.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, VARY,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use packets::Packet;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::config::{HttpServerConfig, SessionConfig};
use crate::error::TransportError;
use crate::handlers::Handlers;
use crate::session::{Session, WeakSession};
use crate::transport::{Delivered, ReplyContext, Transport};

const ALLOWED_METHODS: &str = "POST, GET, OPTIONS";
const ALLOWED_HEADERS: &str = "origin, content-type";
const PREFLIGHT_MAX_AGE: &str = "1728000";
const VARY_ON: &str = "Accept-Encoding, Origin";
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Request/response transport: cannot originate calls, answers through the
/// one-shot slot of the request being served.
pub struct HttpServerTransport;

impl Transport for HttpServerTransport {
    fn name(&self) -> &'static str {
        "http server"
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn physical_send(&self, _packet: Packet) -> Result<(), TransportError> {
        Err(TransportError::CannotSend("http server"))
    }

    fn physical_respond(
        &self,
        packet: Packet,
        ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError> {
        ctx.reply(packet)?;
        delivered.notify();
        Ok(())
    }
}

#[derive(Clone)]
struct PortState {
    session: Session,
    allow_origin: Option<HeaderValue>,
}

/// HTTP endpoint serving one session for all requests.
pub struct HttpServerPort {
    session: Session,
    config: HttpServerConfig,
}

impl HttpServerPort {
    #[must_use]
    pub fn new(config: HttpServerConfig, handlers: Handlers, session: SessionConfig) -> Self {
        let session = Session::new(Arc::new(HttpServerTransport), handlers, session);
        if let Some(idle) = config.idle_timeout {
            tokio::spawn(sweep_idle(session.downgrade(), idle));
        }
        Self { session, config }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Router serving POST and OPTIONS at the configured path.
    pub fn router(&self) -> Router {
        let allow_origin = self.config.allow_origin.as_deref().and_then(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|e| warn!(%origin, error = %e, "http: ignoring invalid allow-origin"))
                .ok()
        });
        let state = PortState { session: self.session.clone(), allow_origin };

        let router = Router::new()
            .route(&self.config.path, post(handle_post).options(handle_options))
            .with_state(state);
        let router = if self.config.compress {
            router.layer(CompressionLayer::new())
        } else {
            router
        };
        router.layer(TraceLayer::new_for_http())
    }

    /// Serve on an already bound listener until the process stops.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the server stops accepting.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        axum::serve(listener, self.router()).await
    }
}

/// Periodically expire idle responses until the session is dropped.
async fn sweep_idle(session: WeakSession, idle: Duration) {
    let mut ticker = tokio::time::interval((idle / 2).max(MIN_SWEEP_PERIOD));
    loop {
        ticker.tick().await;
        let Some(session) = session.upgrade() else {
            debug!("http: session dropped, idle sweep stopped");
            return;
        };
        session.expire_idle(idle);
    }
}

async fn handle_post(State(state): State<PortState>, body: Bytes) -> Response {
    let packet = match packets::decode_json(&body) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(error = %e, "http: malformed packet");
            state.session.report(e.into());
            return with_origin(StatusCode::BAD_REQUEST.into_response(), state.allow_origin.as_ref());
        }
    };
    debug!(kind = packet.kind(), id = packet.id().unwrap_or_default(), "http: recv packet");

    let (ctx, reply) = ReplyContext::one_shot();
    state.session.handle_message(packet, ctx);

    let response = match reply.await {
        Ok(packet) => match packets::encode_json(&packet) {
            Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
            Err(e) => {
                warn!(error = %e, "http: reply encode failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    };
    with_origin(response, state.allow_origin.as_ref())
}

async fn handle_options(State(state): State<PortState>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOWED_HEADERS));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(PREFLIGHT_MAX_AGE));
    headers.insert(VARY, HeaderValue::from_static(VARY_ON));
    headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    with_origin((StatusCode::OK, headers).into_response(), state.allow_origin.as_ref())
}

fn with_origin(mut response: Response, origin: Option<&HeaderValue>) -> Response {
    if let Some(origin) = origin {
        response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    }
    response
}

#[cfg(test)]
#[path = "http_server_test.rs"]
mod tests;
