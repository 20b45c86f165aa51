use super::*;
use packets::Status;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

#[tokio::test]
async fn one_shot_context_delivers_first_reply_only() {
    let (ctx, rx) = ReplyContext::one_shot();
    let clone = ctx.clone();
    assert!(ctx.is_open());

    ctx.reply(Packet::response("1-0", Status::Success, json!(1)))
        .expect("first reply should be accepted");
    let err = clone
        .reply(Packet::response("1-0", Status::Success, json!(2)))
        .expect_err("second reply should be rejected");
    assert!(matches!(err, TransportError::ReplyAlreadySent));

    let packet = rx.await.expect("reply should arrive");
    assert_eq!(packet, Packet::response("1-0", Status::Success, json!(1)));
    assert!(!clone.is_open());
}

#[tokio::test]
async fn dropping_every_clone_closes_receiver() {
    let (ctx, rx) = ReplyContext::one_shot();
    let clone = ctx.clone();
    drop(ctx);
    drop(clone);
    assert!(rx.await.is_err());
}

#[test]
fn reply_after_receiver_dropped_reports_closed() {
    let (ctx, rx) = ReplyContext::one_shot();
    drop(rx);
    assert!(!ctx.is_open());
    let err = ctx.reply(Packet::poll("1-0")).expect_err("receiver is gone");
    assert!(matches!(err, TransportError::Closed));
}

#[test]
fn stream_context_has_no_reply_slot() {
    let ctx = ReplyContext::stream();
    assert!(!ctx.is_one_shot());
    assert!(!ctx.is_open());
    assert!(matches!(ctx.reply(Packet::poll("1-0")), Err(TransportError::ReplyAlreadySent)));
}

#[test]
fn delivered_runs_its_hook_once_notified() {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = fired.clone();
    let delivered = Delivered::new(move || flag.store(true, Ordering::SeqCst));
    assert!(!fired.load(Ordering::SeqCst));
    delivered.notify();
    assert!(fired.load(Ordering::SeqCst));

    Delivered::none().notify();
}
