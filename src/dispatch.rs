//! Deferred execution of callbacks and delivery acknowledgements.
//!
//! Callbacks never run inside the receive path. Each session owns one
//! dispatcher task draining an unbounded FIFO queue, so callbacks for the
//! same call run in arrival order and a failing callback cannot disturb
//! message processing.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::call::{Callback, Reply};
use crate::error::ProtocolError;

pub(crate) type Job = Box<dyn FnOnce() -> Result<(), ProtocolError> + Send>;

/// Receives every error a session reports.
pub type ErrorSink = Arc<dyn Fn(&ProtocolError) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    pub(crate) fn spawn(tag: String, on_error: ErrorSink) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                run(job, &on_error);
            }
            tracing::debug!(session = %tag, "dispatch: queue closed");
        });
        Self { tx }
    }

    pub(crate) fn defer(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("dispatch: queue closed, dropping job");
        }
    }

    /// Queue `callback(reply)`; `context` names the call in error reports.
    pub(crate) fn defer_callback(&self, context: String, callback: Callback, reply: Reply) {
        self.defer(Box::new(move || {
            let msg = match catch_unwind(AssertUnwindSafe(|| callback(reply))) {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => err.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            Err(ProtocolError::Callback { context, msg })
        }));
    }
}

fn run(job: Job, on_error: &ErrorSink) {
    match catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => on_error(&err),
        Err(panic) => on_error(&ProtocolError::Callback {
            context: "deferred job".to_owned(),
            msg: panic_message(panic.as_ref()),
        }),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return (*msg).to_owned();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "panic".to_owned()
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
