use super::*;
use crate::test_helpers::{demo_handlers, spawn_http_server};
use packets::Status;
use serde_json::{Value, json};

async fn post_packet(client: &reqwest::Client, url: &str, packet: &Packet) -> reqwest::Response {
    client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .body(packets::encode_json(packet).expect("encode"))
        .send()
        .await
        .expect("request should complete")
}

async fn reply_packet(response: reqwest::Response) -> Packet {
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let bytes = response.bytes().await.expect("body");
    packets::decode_json(&bytes).expect("reply should be a packet")
}

#[tokio::test]
async fn post_call_returns_success_reply() {
    let (url, _session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let client = reqwest::Client::new();

    let response = post_packet(&client, &url, &Packet::call("c-0", "add", json!({"a": 2, "b": 3}))).await;
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(reply_packet(response).await, Packet::response("c-0", Status::Success, json!(5)));
}

#[tokio::test]
async fn unknown_method_is_answered_in_band() {
    let (url, _session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let client = reqwest::Client::new();

    let packet = reply_packet(post_packet(&client, &url, &Packet::call("c-0", "nope", Value::Null)).await).await;
    let Packet::Response(reply) = packet else {
        panic!("expected response");
    };
    assert_eq!(reply.status, Status::Fail);
    assert_eq!(reply.data["error"], json!("unknownMethod"));
}

#[tokio::test]
async fn long_call_continues_through_polls() {
    let (url, session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let client = reqwest::Client::new();

    let first = reply_packet(post_packet(&client, &url, &Packet::call("c-0", "steps", json!(2))).await).await;
    assert!(matches!(first, Packet::Response(ref r) if r.status == Status::Progress));

    let mut terminal = None;
    for _ in 0..10 {
        let packet = reply_packet(post_packet(&client, &url, &Packet::poll("c-0")).await).await;
        let replies = match packet {
            Packet::List(batch) => batch.list,
            other => vec![other],
        };
        if let Some(Packet::Response(last)) = replies.last() {
            if last.status.is_terminal() {
                terminal = Some(last.clone());
                break;
            }
        }
    }
    let terminal = terminal.expect("terminal reply should arrive");
    assert_eq!(terminal.status, Status::Success);
    assert_eq!(terminal.data, json!("done"));
    assert_eq!(session.open_responses(), 0);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let (url, _session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let response = reqwest::Client::new()
        .post(&url)
        .body("{\"type\": \"call\"")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn packet_without_reply_ends_with_no_content() {
    let (url, _session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = post_packet(&client, &url, &Packet::response("x-1", Status::Success, json!(1))).await;
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn options_returns_fixed_preflight_headers() {
    let config = HttpServerConfig { allow_origin: Some("https://app.example".to_owned()), ..HttpServerConfig::default() };
    let (url, _session) = spawn_http_server(demo_handlers(), config).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, &url)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let header = |name| response.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
    assert_eq!(header(ACCESS_CONTROL_ALLOW_METHODS).as_deref(), Some("POST, GET, OPTIONS"));
    assert_eq!(header(ACCESS_CONTROL_ALLOW_HEADERS).as_deref(), Some("origin, content-type"));
    assert_eq!(header(ACCESS_CONTROL_MAX_AGE).as_deref(), Some("1728000"));
    assert_eq!(header(VARY).as_deref(), Some("Accept-Encoding, Origin"));
    assert_eq!(header(ALLOW).as_deref(), Some("POST, GET, OPTIONS"));
    assert_eq!(header(ACCESS_CONTROL_ALLOW_ORIGIN).as_deref(), Some("https://app.example"));
    assert!(response.bytes().await.expect("body").is_empty());
}

#[tokio::test]
async fn allow_origin_is_omitted_when_unset() {
    let (url, _session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let client = reqwest::Client::new();
    let response = post_packet(&client, &url, &Packet::call("c-0", "add", json!({"a": 1, "b": 1}))).await;
    assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

#[tokio::test]
async fn large_replies_are_gzip_encoded_when_accepted() {
    let (url, _session) = spawn_http_server(demo_handlers(), HttpServerConfig::default()).await;
    let client = reqwest::Client::builder().no_gzip().no_deflate().build().expect("client");
    let payload = json!({"text": "compress me ".repeat(200)});

    let response = client
        .post(&url)
        .header(reqwest::header::ACCEPT_ENCODING, "gzip")
        .body(packets::encode_json(&Packet::call("c-0", "echo", payload)).expect("encode"))
        .send()
        .await
        .expect("request");
    assert_eq!(
        response.headers().get(reqwest::header::CONTENT_ENCODING).and_then(|v| v.to_str().ok()),
        Some("gzip")
    );
}

#[tokio::test]
async fn compression_can_be_disabled() {
    let config = HttpServerConfig { compress: false, ..HttpServerConfig::default() };
    let (url, _session) = spawn_http_server(demo_handlers(), config).await;
    let client = reqwest::Client::builder().no_gzip().no_deflate().build().expect("client");

    let response = client
        .post(&url)
        .header(reqwest::header::ACCEPT_ENCODING, "gzip")
        .body(packets::encode_json(&Packet::call("c-0", "echo", json!("x".repeat(500)))).expect("encode"))
        .send()
        .await
        .expect("request");
    assert!(response.headers().get(reqwest::header::CONTENT_ENCODING).is_none());
}

#[test]
fn server_transport_cannot_originate_calls() {
    let err = HttpServerTransport
        .physical_send(Packet::call("1-0", "x", Value::Null))
        .expect_err("server cannot send");
    assert!(matches!(err, TransportError::CannotSend("http server")));
    assert!(!HttpServerTransport.is_streaming());
}

#[tokio::test]
async fn idle_sweep_releases_requests_nobody_answers() {
    let handlers = Handlers::new();
    handlers.register("hang", |_, _responder| Ok(()));
    let config = HttpServerConfig {
        idle_timeout: Some(std::time::Duration::from_millis(50)),
        ..HttpServerConfig::default()
    };
    let (url, session) = spawn_http_server(handlers, config).await;

    let response = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        post_packet(&reqwest::Client::new(), &url, &Packet::call("c-0", "hang", json!(null))),
    )
    .await
    .expect("request released by the sweep");
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert_eq!(session.open_responses(), 0);
}
