//! The `mediaserverd` binary: loads config from the environment, builds the
//! composition root, starts its background threads, and serves the HTTP
//! surface on a multi-threaded tokio runtime.

use mediaserver::config::ServerConfig;
use mediaserver::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    let bind_addr = config.bind_addr.clone();

    let server = Server::new(config)?;
    server.spawn_background_threads();

    let app = mediaserver::http::router(server.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "mediaserverd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    server.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
