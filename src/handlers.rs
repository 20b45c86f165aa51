//! Method table shared by every session that answers calls.

use std::collections::HashMap;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dispatch::panic_message;
use crate::error::{BoxError, ProtocolError, error_payload};
use crate::session::Responder;

/// A registered method. Returning `Err` (or panicking) makes the session
/// answer `fail` with a `handlerError` payload.
pub type Handler = Arc<dyn Fn(Value, Responder) -> Result<(), BoxError> + Send + Sync>;

/// Cloneable method table. Clones share the same registrations, so a server
/// can hand one table to every connection it accepts.
#[derive(Clone, Default)]
pub struct Handlers {
    table: Arc<RwLock<HashMap<String, Handler>>>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous handler. Registering the same method again
    /// replaces the earlier handler.
    pub fn register<F>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Value, Responder) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let method = method.into();
        tracing::debug!(%method, "rpc: handler registered");
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method, Arc::new(f));
    }

    /// Register a handler whose work runs on a spawned task. The future's
    /// error (or panic) becomes a `fail` reply.
    pub fn register_async<F, Fut>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Value, Responder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register(method, move |data, responder| {
            let work = f(data, responder.clone());
            tokio::spawn(async move {
                let msg = match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) => err.to_string(),
                    Err(panic) => panic_message(panic.as_ref()),
                };
                responder.abort(msg);
            });
            Ok(())
        });
    }

    /// Register a typed request/response method: `data` is deserialised
    /// into `Req`, and the result is answered with `success` or `fail`.
    pub fn register_typed<Req, Resp, E, F, Fut>(&self, method: impl Into<String>, f: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + 'static,
        E: Display + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    {
        let method = method.into();
        let name = method.clone();
        self.register_async(method, move |data, responder| {
            let work = serde_json::from_value::<Req>(data).map(&f).map_err(|err| {
                ProtocolError::InvalidParams { method: name.clone(), msg: err.to_string() }
            });
            async move {
                let work = match work {
                    Ok(work) => work,
                    Err(err) => {
                        responder.fail(error_payload(&err, Value::Null));
                        return Ok(());
                    }
                };
                match work.await {
                    Ok(value) => responder.success(serde_json::to_value(value)?),
                    Err(err) => {
                        let err = ProtocolError::Handler {
                            id: responder.id().to_owned(),
                            method: responder.method().to_owned(),
                            msg: err.to_string(),
                        };
                        responder.fail(error_payload(&err, Value::Null));
                    }
                }
                Ok::<(), BoxError>(())
            }
        });
    }

    #[must_use]
    pub fn get(&self, method: &str) -> Option<Handler> {
        self.table.read().unwrap_or_else(PoisonError::into_inner).get(method).cloned()
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.table.read().unwrap_or_else(PoisonError::into_inner).contains_key(method)
    }

    /// Registered method names, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<_> =
            self.table.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        methods.sort();
        methods
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").field("methods", &self.methods()).finish()
    }
}
