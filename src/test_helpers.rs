//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use packets::Packet;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::SessionConfig;
use crate::error::{ErrorCode, TransportError};
use crate::handlers::Handlers;
use crate::session::Session;
use crate::transport::{Delivered, ReplyContext, Transport};

pub const WAIT: Duration = Duration::from_secs(2);

/// What the mock transport saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Call(Packet),
    Reply(Packet),
}

/// Transport that records every physical send and reply. Replies on a
/// one-shot context are also forwarded to it.
pub struct MockTransport {
    streaming: bool,
    repoll: bool,
    sent: Mutex<Vec<Sent>>,
    tx: mpsc::UnboundedSender<Sent>,
}

impl MockTransport {
    pub fn new(streaming: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { streaming, repoll: false, sent: Mutex::new(Vec::new()), tx }), rx)
    }

    pub fn polling() -> (Arc<Self>, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { streaming: false, repoll: true, sent: Mutex::new(Vec::new()), tx }), rx)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("mock lock").clone()
    }

    fn record(&self, entry: Sent) {
        self.sent.lock().expect("mock lock").push(entry.clone());
        let _ = self.tx.send(entry);
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn physical_send(&self, packet: Packet) -> Result<(), TransportError> {
        self.record(Sent::Call(packet));
        Ok(())
    }

    fn physical_respond(
        &self,
        packet: Packet,
        ctx: &ReplyContext,
        delivered: Delivered,
    ) -> Result<(), TransportError> {
        self.record(Sent::Reply(packet.clone()));
        if ctx.is_one_shot() {
            ctx.reply(packet)?;
        }
        delivered.notify();
        Ok(())
    }

    fn repoll_on_progress(&self) -> bool {
        self.repoll
    }
}

/// Session config whose error sink forwards error codes to a channel.
pub fn recording_config(tag: &str) -> (SessionConfig, mpsc::UnboundedReceiver<(String, String)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = SessionConfig::new().with_tag(tag).with_error_sink(move |err| {
        let _ = tx.send((err.error_code().to_owned(), err.to_string()));
    });
    (config, rx)
}

pub fn mock_session(
    streaming: bool,
    handlers: Handlers,
) -> (Session, Arc<MockTransport>, mpsc::UnboundedReceiver<Sent>, mpsc::UnboundedReceiver<(String, String)>) {
    let (transport, sent) = MockTransport::new(streaming);
    let (config, errors) = recording_config("t");
    let session = Session::new(transport.clone(), handlers, config);
    (session, transport, sent, errors)
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.expect("timed out waiting").expect("channel closed")
}

/// Bind an HTTP port on an ephemeral local port; returns its endpoint URL
/// and the server session.
pub async fn spawn_http_server(
    handlers: Handlers,
    config: crate::config::HttpServerConfig,
) -> (String, Session) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let url = format!("http://{addr}{}", config.path);
    let port = crate::transport::http_server::HttpServerPort::new(
        config,
        handlers,
        SessionConfig::new().with_tag("srv"),
    );
    let session = port.session().clone();
    tokio::spawn(port.serve(listener));
    (url, session)
}

/// Handlers used by the end-to-end transport tests.
pub fn demo_handlers() -> Handlers {
    let handlers = Handlers::new();
    handlers.register("add", |data, responder| {
        let a = data["a"].as_i64().unwrap_or(0);
        let b = data["b"].as_i64().unwrap_or(0);
        responder.success(serde_json::json!(a + b));
        Ok(())
    });
    handlers.register("echo", |data, responder| {
        responder.success(data);
        Ok(())
    });
    handlers.register_async("steps", |data, responder| async move {
        let steps = data.as_u64().unwrap_or(3);
        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(20)).await;
            #[allow(clippy::cast_precision_loss)]
            let fraction = step as f64 / steps as f64;
            responder.progress_at(fraction, serde_json::json!(step));
        }
        responder.success(serde_json::json!("done"));
        Ok(())
    });
    handlers
}
