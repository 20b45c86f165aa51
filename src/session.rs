//! The session: one endpoint of an RPC conversation over one transport.
//!
//! DESIGN
//! ======
//! A session is both a caller and a callee. Outgoing calls live in the call
//! registry until a terminal reply arrives; incoming calls get a response
//! aggregator that queues the handler's replies and flushes them whenever the
//! transport can carry them.
//!
//! LOCKING
//! =======
//! All mutable state sits behind one mutex. Transport hooks run with the
//! lock held, which keeps every call's replies in emission order; hooks are
//! non-blocking and never re-enter the session. Handlers run without the
//! lock. Callbacks and delivery acknowledgements never run inline; they go
//! through the session's dispatcher queue. Errors collected under the lock
//! are reported after it is released.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use packets::{CallPacket, Packet, PollPacket, ResponsePacket, Status};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::call::{Call, CallRegistry, Callbacks, Reply, Resolution};
use crate::config::SessionConfig;
use crate::dispatch::{Dispatcher, ErrorSink, panic_message};
use crate::error::{CallError, ErrorCode, ProtocolError, TransportError, error_payload};
use crate::handlers::Handlers;
use crate::intercept::{Interceptor, allows};
use crate::response::{Ack, Flush, ResponseState};
use crate::transport::{Delivered, ReplyContext, Transport};

struct State {
    registry: CallRegistry,
    responses: HashMap<String, ResponseState>,
}

struct Shared {
    tag: String,
    transport: Arc<dyn Transport>,
    handlers: Handlers,
    interceptors: Vec<Arc<dyn Interceptor>>,
    on_error: ErrorSink,
    dispatcher: Dispatcher,
    state: Mutex<State>,
}

/// Cheap, cloneable handle to a session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

/// Non-owning handle, held by adapter tasks so a session can be dropped
/// while its receive loop is still parked.
#[derive(Clone)]
pub struct WeakSession(Weak<Shared>);

impl WeakSession {
    #[must_use]
    pub fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|shared| Session { shared })
    }
}

impl Session {
    /// Create a session over `transport`, answering calls from `handlers`.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime: the dispatcher task is
    /// spawned here.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, handlers: Handlers, config: SessionConfig) -> Self {
        let tag = config
            .tag
            .unwrap_or_else(|| rand::rng().random_range(0..1_000_000_u32).to_string());
        let on_error = config.on_error.unwrap_or_else(|| default_sink(tag.clone()));
        let dispatcher = Dispatcher::spawn(tag.clone(), on_error.clone());

        tracing::debug!(session = %tag, transport = transport.name(), "rpc: session created");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    registry: CallRegistry::new(tag.clone()),
                    responses: HashMap::new(),
                }),
                tag,
                transport,
                handlers,
                interceptors: config.interceptors,
                on_error,
                dispatcher,
            }),
        }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.shared.tag
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.shared.transport.is_streaming()
    }

    #[must_use]
    pub fn handlers(&self) -> &Handlers {
        &self.shared.handlers
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    /// Calls still waiting for a terminal reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.lock().registry.len()
    }

    /// Incoming calls whose terminal reply has not been flushed yet.
    #[must_use]
    pub fn open_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// Register (or replace) the handler for `method`.
    pub fn register_handler<F>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Value, Responder) -> Result<(), crate::error::BoxError> + Send + Sync + 'static,
    {
        self.shared.handlers.register(method, f);
    }

    /// Route an error to the session's sink.
    pub fn report(&self, err: ProtocolError) {
        (self.shared.on_error)(&err);
    }

    fn report_all(&self, errors: Vec<ProtocolError>) {
        for err in errors {
            self.report(err);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one interceptor hook over an incoming packet. A panic vetoes the
    /// packet and is reported.
    fn admits(&self, hook: &'static str, check: impl Fn(&dyn Interceptor) -> bool) -> bool {
        match allows(&self.shared.interceptors, hook, check) {
            Ok(pass) => pass,
            Err(err) => {
                tracing::warn!(session = %self.shared.tag, hook, "rpc: {err}");
                self.report(err);
                false
            }
        }
    }

    // =========================================================================
    // OUTGOING CALLS
    // =========================================================================

    /// Send a call. Replies are delivered through `callbacks`; the returned
    /// id only identifies the call.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SendRejected`] when an interceptor vetoes the call,
    /// [`ProtocolError::Interceptor`] when one panics and
    /// [`ProtocolError::Transport`] when the transport refuses it outright.
    /// In every case no callback will ever run.
    pub fn invoke(&self, method: &str, data: Value, callbacks: Callbacks) -> Result<String, ProtocolError> {
        let mut state = self.lock();
        let packet = state.registry.prepare(method, data);
        if !allows(&self.shared.interceptors, "on_send", |i| i.on_send(&packet))? {
            return Err(ProtocolError::SendRejected { method: method.to_owned() });
        }

        let id = packet.id.clone();
        state.registry.insert(Call { id: id.clone(), method: method.to_owned(), callbacks });
        if let Err(err) = self.shared.transport.physical_send(Packet::Call(packet)) {
            state.registry.remove(&id);
            return Err(err.into());
        }
        tracing::debug!(session = %self.shared.tag, %id, method, "rpc: call sent");
        Ok(id)
    }

    /// Typed proxy over [`Session::invoke`]: serialises `data`, waits for
    /// the terminal reply and deserialises a `success` payload into `T`.
    ///
    /// # Errors
    ///
    /// [`CallError::Failed`] carries the payload of a `fail` reply
    /// (including the `connectionError` payload of a cancelled call).
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        data: impl Serialize,
    ) -> Result<T, CallError> {
        let data = serde_json::to_value(data)?;
        let (tx, rx) = oneshot::channel::<Result<Value, Value>>();
        let on_success = Arc::new(Mutex::new(Some(tx)));
        let on_fail = on_success.clone();

        let callbacks = Callbacks::on_success(move |reply| {
            settle(&on_success, Ok(reply.data));
            Ok(())
        })
        .on_fail(move |reply| {
            settle(&on_fail, Err(reply.data));
            Ok(())
        });
        self.invoke(method, data, callbacks)?;

        match rx.await {
            Ok(Ok(value)) => Ok(serde_json::from_value(value)?),
            Ok(Err(payload)) => Err(CallError::Failed(payload)),
            Err(_) => Err(CallError::Dropped),
        }
    }

    /// Fail every pending call with a `connectionError` payload and abandon
    /// every open response. Used when the carrier is lost.
    pub fn cancel_all(&self, reason: &str, options: Value) {
        let (calls, abandoned) = {
            let mut state = self.lock();
            let calls = state.registry.drain();
            let abandoned = state.responses.len();
            state.responses.clear();
            (calls, abandoned)
        };
        if calls.is_empty() && abandoned == 0 {
            return;
        }

        let err = ProtocolError::Connection { msg: reason.to_owned() };
        tracing::info!(
            session = %self.shared.tag,
            calls = calls.len(),
            responses = abandoned,
            reason,
            "rpc: cancelling pending work"
        );
        self.fail_calls(calls, &error_payload(&err, options));
        self.report(err);
    }

    /// Abandon every open response that has seen no emit and no poll for
    /// `max_idle`. Returns how many were dropped. Their reply handles are
    /// released, and later items from their handlers are discarded.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let expired = {
            let mut state = self.lock();
            let before = state.responses.len();
            state.responses.retain(|_, response| response.idle_for(now) < max_idle);
            before - state.responses.len()
        };
        if expired > 0 {
            tracing::info!(session = %self.shared.tag, expired, ?max_idle, "rpc: expired idle responses");
        }
        expired
    }

    /// Fail one pending call with a `connectionError` payload. Returns
    /// `false` when the call already settled.
    pub(crate) fn fail_call(&self, id: &str, reason: &str, options: Value) -> bool {
        let Some(call) = self.lock().registry.remove(id) else {
            return false;
        };
        let err = ProtocolError::Connection { msg: reason.to_owned() };
        tracing::warn!(session = %self.shared.tag, %id, method = %call.method, reason, "rpc: failing call");
        self.fail_calls(vec![call], &error_payload(&err, options));
        self.report(err);
        true
    }

    fn fail_calls(&self, calls: Vec<Call>, payload: &Value) {
        for call in calls {
            match call.callbacks.for_status(Status::Fail) {
                Some(callback) => self.shared.dispatcher.defer_callback(
                    format!("{} fail", call.method),
                    callback.clone(),
                    Reply::new(payload.clone()),
                ),
                None => tracing::error!(
                    session = %self.shared.tag,
                    id = %call.id,
                    method = %call.method,
                    "rpc: fail callback not registered"
                ),
            }
        }
    }

    // =========================================================================
    // INCOMING MESSAGES
    // =========================================================================

    /// Decode a JSON message and route it. Returns `false` (after reporting
    /// the parse error) when the message was discarded.
    pub fn handle_bytes(&self, bytes: &[u8], ctx: ReplyContext) -> bool {
        match packets::decode_json(bytes) {
            Ok(packet) => {
                self.handle_message(packet, ctx);
                true
            }
            Err(err) => {
                self.report(err.into());
                false
            }
        }
    }

    /// Route one physical message. `ctx` is the reply handle of the request
    /// that carried it.
    pub fn handle_message(&self, packet: Packet, ctx: ReplyContext) {
        self.route(packet, &ctx, true);
    }

    fn route(&self, packet: Packet, ctx: &ReplyContext, last: bool) {
        match packet {
            Packet::List(batch) => {
                let count = batch.list.len();
                for (index, member) in batch.list.into_iter().enumerate() {
                    self.route(member, ctx, last && index + 1 == count);
                }
            }
            Packet::Call(call) => self.handle_call(call, ctx.clone()),
            Packet::Response(reply) => self.handle_response(reply, last),
            Packet::Poll(poll) => self.handle_poll(poll, ctx.clone()),
        }
    }

    fn handle_call(&self, call: CallPacket, ctx: ReplyContext) {
        if !self.admits("on_call", |i| i.on_call(&call)) {
            return;
        }
        let Some(handler) = self.shared.handlers.get(&call.method) else {
            let id = call.id.clone();
            self.reply_error(&id, ProtocolError::UnknownMethod { id: call.id, method: call.method }, &ctx);
            return;
        };

        let streaming = self.is_streaming();
        {
            let mut state = self.lock();
            let response = ResponseState::new(call.id.clone(), call.method.clone(), ctx, !streaming);
            if state.responses.insert(call.id.clone(), response).is_some() {
                tracing::warn!(session = %self.shared.tag, id = %call.id, "rpc: duplicate call id replaces open response");
            }
        }

        let responder = Responder { session: self.clone(), id: call.id, method: call.method };
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(call.data, responder.clone())));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        if let Some(msg) = failure {
            responder.abort(msg);
        }
        if !streaming {
            self.release(&responder.id);
        }
    }

    fn handle_response(&self, reply: ResponsePacket, last: bool) {
        if !self.admits("on_response", |i| i.on_response(&reply)) {
            return;
        }
        let mut errors = Vec::new();
        {
            let mut state = self.lock();
            let pending = match state.registry.resolve(&reply) {
                Resolution::Unknown => {
                    errors.push(ProtocolError::ResponseWithoutCall { id: reply.id.clone() });
                    false
                }
                Resolution::Deliver { method, callback, retired } => {
                    self.shared.dispatcher.defer_callback(
                        format!("{method} {}", reply.status),
                        callback,
                        Reply::from(&reply),
                    );
                    !retired
                }
                Resolution::Ignored => true,
                Resolution::MissingCallback { method } => {
                    errors.push(ProtocolError::MissingCallback {
                        id: reply.id.clone(),
                        method,
                        status: reply.status,
                    });
                    false
                }
            };

            if pending && last && self.shared.transport.repoll_on_progress() {
                if let Err(err) = self.shared.transport.physical_send(Packet::poll(reply.id.clone())) {
                    errors.push(err.into());
                }
            }
        }
        self.report_all(errors);
    }

    fn handle_poll(&self, poll: PollPacket, ctx: ReplyContext) {
        if !self.admits("on_poll", |i| i.on_poll(&poll)) {
            return;
        }
        if self.is_streaming() {
            self.lock().responses.remove(&poll.id);
            self.reply_error(&poll.id, ProtocolError::PollOnStreaming { id: poll.id.clone() }, &ctx);
            return;
        }

        let mut errors = Vec::new();
        let found = {
            let mut state = self.lock();
            let found = match state.responses.get_mut(&poll.id) {
                Some(response) => {
                    response.rearm(ctx.clone());
                    true
                }
                None => false,
            };
            if found {
                self.flush_locked(&mut state, &poll.id, &mut errors);
            }
            found
        };
        self.report_all(errors);

        if !found {
            self.reply_error(&poll.id, ProtocolError::PollWithoutResponse { id: poll.id.clone() }, &ctx);
        }
    }

    /// Answer `id` with a `fail` describing `err` on the request that
    /// carried it, then report `err`.
    fn reply_error(&self, id: &str, err: ProtocolError, ctx: &ReplyContext) {
        tracing::warn!(session = %self.shared.tag, %id, code = err.error_code(), "rpc: {err}");
        let packet = Packet::response(id, Status::Fail, error_payload(&err, Value::Null));
        let sent = {
            let _state = self.lock();
            self.shared.transport.physical_respond(packet, ctx, Delivered::none())
        };
        self.report(err);
        if let Err(err) = sent {
            self.report(err.into());
        }
    }

    // =========================================================================
    // RESPONSES
    // =========================================================================

    fn emit(&self, id: &str, status: Status, data: Value, progress: Option<f64>, ack: Option<Ack>) {
        let mut errors = Vec::new();
        {
            let mut state = self.lock();
            let Some(response) = state.responses.get_mut(id) else {
                tracing::debug!(session = %self.shared.tag, %id, %status, "rpc: response closed, dropping item");
                return;
            };
            match response.push(status, data, progress, ack) {
                Ok(()) => self.flush_locked(&mut state, id, &mut errors),
                Err(err) => errors.push(err),
            }
        }
        self.report_all(errors);
    }

    fn release(&self, id: &str) {
        let mut errors = Vec::new();
        {
            let mut state = self.lock();
            let Some(response) = state.responses.get_mut(id) else {
                return;
            };
            response.release();
            self.flush_locked(&mut state, id, &mut errors);
        }
        self.report_all(errors);
    }

    fn flush_locked(&self, state: &mut State, id: &str, errors: &mut Vec<ProtocolError>) {
        let streaming = self.is_streaming();
        let Some(response) = state.responses.get_mut(id) else {
            return;
        };
        let Some(flush) = response.take_flush(streaming) else {
            return;
        };
        if flush.terminal {
            if let Some(done) = state.responses.remove(id) {
                tracing::debug!(session = %self.shared.tag, %id, method = done.method(), "rpc: response completed");
            }
        }

        let Flush { mut items, acks, ctx, .. } = flush;
        items.retain(|item| match allows(&self.shared.interceptors, "on_respond", |i| i.on_respond(item)) {
            Ok(pass) => pass,
            Err(err) => {
                errors.push(err);
                false
            }
        });
        let Some(packet) = Flush::into_packet(items) else {
            return;
        };
        let delivered = self.delivered(acks);
        match self.shared.transport.physical_respond(packet, &ctx, delivered) {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                // Nobody can collect further items; retire the response.
                if state.responses.remove(id).is_some() {
                    tracing::debug!(session = %self.shared.tag, %id, "rpc: reply handle closed, response abandoned");
                }
                errors.push(TransportError::Closed.into());
            }
            Err(err) => errors.push(err.into()),
        }
    }

    fn delivered(&self, acks: Vec<Ack>) -> Delivered {
        if acks.is_empty() {
            return Delivered::none();
        }
        let dispatcher = self.shared.dispatcher.clone();
        Delivered::new(move || {
            dispatcher.defer(Box::new(move || {
                for ack in acks {
                    ack();
                }
                Ok(())
            }));
        })
    }

    fn is_open(&self, id: &str) -> bool {
        self.lock().responses.get(id).is_some_and(|r| !r.is_completed())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("tag", &self.shared.tag)
            .field("transport", &self.shared.transport.name())
            .finish_non_exhaustive()
    }
}

fn settle(slot: &Mutex<Option<oneshot::Sender<Result<Value, Value>>>>, outcome: Result<Value, Value>) {
    if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
        let _ = tx.send(outcome);
    }
}

fn default_sink(tag: String) -> ErrorSink {
    Arc::new(move |err: &ProtocolError| {
        tracing::error!(session = %tag, code = err.error_code(), error = %err, "rpc: protocol error");
    })
}

// =============================================================================
// RESPONDER
// =============================================================================

/// Handler-facing handle for answering one incoming call.
///
/// Cloneable and `Send`, so a handler can move it into a task and keep
/// emitting after it returns. Items emitted after the terminal one are
/// rejected; items for a response the session has abandoned are dropped.
#[derive(Clone)]
pub struct Responder {
    session: Session,
    id: String,
    method: String,
}

impl Responder {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The session the call arrived on, for calling back the other side.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn progress(&self, data: Value) {
        self.session.emit(&self.id, Status::Progress, data, None, None);
    }

    /// Progress carrying a completion fraction.
    pub fn progress_at(&self, fraction: f64, data: Value) {
        self.session.emit(&self.id, Status::Progress, data, Some(fraction), None);
    }

    /// Progress with an acknowledgement that runs once the item has been
    /// handed to the transport.
    pub fn progress_then(&self, data: Value, ack: impl FnOnce() + Send + 'static) {
        self.session.emit(&self.id, Status::Progress, data, None, Some(Box::new(ack)));
    }

    pub fn success(&self, data: Value) {
        self.session.emit(&self.id, Status::Success, data, None, None);
    }

    pub fn fail(&self, data: Value) {
        self.session.emit(&self.id, Status::Fail, data, None, None);
    }

    /// Whether the response still accepts items.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_open(&self.id)
    }

    /// Report a handler failure and answer `fail` unless a terminal item was
    /// already emitted.
    pub(crate) fn abort(&self, msg: String) {
        let err = ProtocolError::Handler { id: self.id.clone(), method: self.method.clone(), msg };
        let payload = error_payload(&err, Value::Null);
        self.session.report(err);
        if self.is_open() {
            self.fail(payload);
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
