use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use rpcport::transport::{http_client, ws_client};
use rpcport::{
    Callbacks, Encoding, Handlers, HttpClientConfig, ProtocolError, Reply, Session, SessionConfig, SocketConfig,
    TransportError,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("health check failed: HTTP {0}")]
    HealthCheck(u16),
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),
    #[error("call rejected: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("timed out waiting for a reply")]
    Timeout,
    #[error("session closed before a terminal reply")]
    Disconnected,
    #[error("{method} failed: {message}")]
    CallFailed { method: String, message: String },
}

#[derive(Parser, Debug)]
#[command(name = "rpcport-cli", about = "Invoke rpcport operations over HTTP or WebSocket")]
struct Cli {
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Call(CallArgs),
}

#[derive(clap::Args, Debug)]
struct CallArgs {
    method: String,

    #[arg(long, default_value = "null", help = "JSON request data")]
    data: String,

    #[arg(long, value_enum, env = "RPC_TRANSPORT", default_value_t = TransportKind::Http)]
    transport: TransportKind,

    #[arg(long, env = "RPC_PATH", default_value = "/api")]
    path: String,

    #[arg(long, default_value = "/ws")]
    ws_path: String,

    #[arg(long, default_value = "json", help = "WebSocket frame encoding: json or protobuf")]
    encoding: Encoding,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Http,
    Ws,
}

#[derive(Debug)]
enum Outcome {
    Progress(Reply),
    Success(Value),
    Fail(Value),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let base_url = cli.base_url.trim_end_matches('/').to_owned();

    match cli.command {
        Command::Ping => run_ping(&base_url).await,
        Command::Call(args) => run_call(&base_url, args).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    let response = reqwest::Client::new().get(format!("{base_url}/healthz")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::HealthCheck(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_call(base_url: &str, args: CallArgs) -> Result<(), CliError> {
    let data = serde_json::from_str::<Value>(&args.data)?;
    let session = open_session(base_url, &args).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.invoke(&args.method, data, outcome_callbacks(tx))?;

    let wait = Duration::from_secs(args.timeout_secs);
    loop {
        let outcome = tokio::time::timeout(wait, rx.recv())
            .await
            .map_err(|_| CliError::Timeout)?
            .ok_or(CliError::Disconnected)?;
        match outcome {
            Outcome::Progress(reply) => print_progress(&reply)?,
            Outcome::Success(data) => return print_json(&data),
            Outcome::Fail(data) => {
                eprintln!("{}", serde_json::to_string_pretty(&data)?);
                return Err(CliError::CallFailed { method: args.method, message: fail_message(&data) });
            }
        }
    }
}

async fn open_session(base_url: &str, args: &CallArgs) -> Result<Session, CliError> {
    let session = match args.transport {
        TransportKind::Http => {
            let config = HttpClientConfig::new(format!("{base_url}{}", args.path));
            http_client::connect(&config, SessionConfig::new())?
        }
        TransportKind::Ws => {
            let url = format!("{}{}", ws_base(base_url), args.ws_path);
            let socket = SocketConfig { encoding: args.encoding };
            ws_client::connect(&url, Handlers::new(), socket, SessionConfig::new()).await?
        }
    };
    Ok(session)
}

fn outcome_callbacks(tx: mpsc::UnboundedSender<Outcome>) -> Callbacks {
    let progress = tx.clone();
    let fail = tx.clone();
    Callbacks::on_success(move |reply| {
        let _ = tx.send(Outcome::Success(reply.data));
        Ok(())
    })
    .on_progress(move |reply| {
        let _ = progress.send(Outcome::Progress(reply));
        Ok(())
    })
    .on_fail(move |reply| {
        let _ = fail.send(Outcome::Fail(reply.data));
        Ok(())
    })
}

/// Swap the scheme of an HTTP base URL for its WebSocket counterpart.
fn ws_base(base_url: &str) -> String {
    if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_owned()
    }
}

fn fail_message(data: &Value) -> String {
    data.get("msg")
        .and_then(Value::as_str)
        .or_else(|| data.get("error").and_then(Value::as_str))
        .map_or_else(|| data.to_string(), str::to_owned)
}

fn print_progress(reply: &Reply) -> Result<(), CliError> {
    let rendered = serde_json::to_string(&reply.data)?;
    match reply.progress {
        Some(fraction) => println!("progress {:>3.0}% {rendered}", fraction * 100.0),
        None => println!("progress {rendered}"),
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
