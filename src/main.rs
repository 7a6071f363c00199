use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridview::api::{build_router, AppState};
use gridview::config::GridviewConfig;
use gridview::hub::Hub;
use gridview::ingest::Ingestor;
use gridview::shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // 2. Load Configuration
    let config = GridviewConfig::load().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    // 3. Build hub, sink and pipeline
    let hub = Arc::new(Hub::new(config.hub.session_queue));
    let sink = config.build_sink().await?;
    info!(sink = %sink.name(), "Notifier sink ready");

    let ingestor =
        Ingestor::new(Arc::clone(&hub), sink).with_offer_timeout(config.offer_timeout());
    let app = build_router(AppState::new(ingestor, config.heartbeat()), &config.server);

    // 4. Start Server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        endpoint = %config.server.endpoint,
        hub_path = %config.server.hub_path,
        "gridview listening"
    );

    let shutdown = ShutdownSignal::new();
    let server_hub = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.wait().await;
            server_hub.close();
        })
        .await?;

    info!("gridview stopped");
    Ok(())
}
