//! Demo operation table.
//!
//! METHODS
//! =======
//! - `add {a, b}`: integer sum, `fail` on overflow
//! - `longTask {steps, delay_ms}`: one progress reply per step, then
//!   `success` with the step count
//! - `echo`: answers its own `data`

use std::time::Duration;

use rpcport::{Handlers, ProtocolError, Responder, error_payload};
use serde::Deserialize;
use serde_json::{Value, json};

/// Upper bound on `longTask` steps so one call cannot run forever.
pub const MAX_STEPS: u32 = 1_000;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("integer overflow adding {a} and {b}")]
    Overflow { a: i64, b: i64 },
}

#[derive(Debug, Deserialize)]
pub struct AddParams {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Deserialize)]
pub struct LongTaskParams {
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_steps() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    200
}

#[must_use]
pub fn handlers() -> Handlers {
    let handlers = Handlers::new();
    handlers.register_typed("add", |params: AddParams| async move { add(&params) });
    handlers.register_async("longTask", |data, responder| async move {
        long_task(data, &responder).await;
        Ok(())
    });
    handlers.register("echo", |data, responder| {
        responder.success(data);
        Ok(())
    });
    handlers
}

fn add(params: &AddParams) -> Result<i64, ApiError> {
    params
        .a
        .checked_add(params.b)
        .ok_or(ApiError::Overflow { a: params.a, b: params.b })
}

async fn long_task(data: Value, responder: &Responder) {
    let params = match serde_json::from_value::<LongTaskParams>(data) {
        Ok(params) if params.steps <= MAX_STEPS => params,
        Ok(params) => {
            invalid(responder, format!("steps must be at most {MAX_STEPS}, got {}", params.steps));
            return;
        }
        Err(e) => {
            invalid(responder, e.to_string());
            return;
        }
    };

    let delay = Duration::from_millis(params.delay_ms);
    for step in 1..=params.steps {
        tokio::time::sleep(delay).await;
        if !responder.is_open() {
            tracing::debug!(id = responder.id(), step, "longTask: abandoned");
            return;
        }
        let fraction = f64::from(step) / f64::from(params.steps);
        responder.progress_at(fraction, json!({ "step": step, "of": params.steps }));
    }
    responder.success(json!({ "steps": params.steps }));
}

fn invalid(responder: &Responder, msg: String) {
    let err = ProtocolError::InvalidParams { method: responder.method().to_owned(), msg };
    responder.fail(error_payload(&err, Value::Null));
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
