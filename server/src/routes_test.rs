use super::*;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rpcport::{Packet, Status};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(2);

async fn spawn_app() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = app(HttpServerConfig::default(), crate::api::handlers());
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

#[tokio::test]
async fn healthz_returns_ok() {
    let addr = spawn_app().await;
    let response = reqwest::get(format!("http://{addr}/healthz")).await.expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn http_endpoint_answers_calls() {
    let addr = spawn_app().await;
    let body = json!({"type": "call", "id": "t-0", "method": "add", "data": {"a": 1, "b": 2}}).to_string();
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api"))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let reply: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(reply, json!({"type": "response", "id": "t-0", "status": "success", "data": 3}));
}

#[tokio::test]
async fn websocket_endpoint_streams_progress() {
    let addr = spawn_app().await;
    let (mut stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{WS_PATH}"))
        .await
        .expect("connect");

    let call = json!({"type": "call", "id": "t-0", "method": "longTask", "data": {"steps": 2, "delay_ms": 1}});
    stream.send(Message::Text(call.to_string().into())).await.expect("send");

    let mut statuses = Vec::new();
    while statuses.last() != Some(&Status::Success) {
        let msg = timeout(WAIT, stream.next())
            .await
            .expect("timeout")
            .expect("stream open")
            .expect("frame");
        let Message::Text(text) = msg else {
            continue;
        };
        let replies = match serde_json::from_str::<Packet>(text.as_str()).expect("packet frame") {
            Packet::List(batch) => batch.list,
            other => vec![other],
        };
        for reply in replies {
            let Packet::Response(reply) = reply else {
                panic!("expected a response");
            };
            assert_eq!(reply.id, "t-0");
            statuses.push(reply.status);
        }
    }
    assert_eq!(statuses, vec![Status::Progress, Status::Progress, Status::Success]);
}
