mod api;
mod routes;

use rpcport::HttpServerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HttpServerConfig::from_env();
    let port = config.port;
    let path = config.path.clone();

    let app = routes::app(config, api::handlers());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, %path, "rpcport listening");
    axum::serve(listener, app).await.expect("server failed");
}
