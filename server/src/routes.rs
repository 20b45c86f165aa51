//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One buffered HTTP session at the configured path serves every POST;
//! `/ws` accepts WebSocket clients, one session per connection. Both share
//! the same method table.

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use rpcport::config::env_parse;
use rpcport::transport::http_server::HttpServerPort;
use rpcport::transport::ws_server::WsServerPort;
use rpcport::{Encoding, Handlers, HttpServerConfig, PacketTrace, SessionConfig, SocketConfig};

pub const WS_PATH: &str = "/ws";

pub fn app(config: HttpServerConfig, handlers: Handlers) -> Router {
    let socket = SocketConfig { encoding: env_parse("RPC_WS_ENCODING", Encoding::Json) };

    let http = HttpServerPort::new(
        config,
        handlers.clone(),
        SessionConfig::new().with_tag("http").with_interceptor(PacketTrace),
    );
    let ws = WsServerPort::new(handlers, socket, SessionConfig::new().with_interceptor(PacketTrace))
        .on_connect(|session| tracing::debug!(session = session.tag(), "ws: session ready"));

    http.router().merge(ws.router(WS_PATH)).route("/healthz", get(healthz))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
