//! Sinout gateway - an authenticated relay between a browser capture client
//! and a facial-analysis service.
//!
//! # API Endpoints
//!
//! - `POST /analyze` - Analyze an uploaded image
//! - `POST /analyze-base64` - Analyze a base64-encoded image
//! - `GET /health` - Inference service health
//! - `GET /models` - Inference service model list
//!
//! Configuration is read from `SINOUT_*` environment variables; see
//! [`sinout_gateway::config`].

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use sinout_gateway::api::{AppState, router};
use sinout_gateway::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal outside development.
    let dotenv = dotenvy::dotenv();

    // PRIVACY NOTE: Default log level is INFO so payload sizes and token
    // rejection reasons logged at DEBUG stay out of production logs
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sinout_gateway=info".parse()?))
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let config = GatewayConfig::from_env()?;

    info!(
        port = config.port,
        environment = ?config.environment,
        inference_url = %config.inference_url,
        history_url = ?config.history_url,
        "Starting Sinout gateway"
    );

    if config.inference_api_key.is_none() {
        warn!("SINOUT_INFERENCE_API_KEY not set; inference calls go out without X-API-Key");
    }
    if config.history_url.is_none() {
        info!("SINOUT_HISTORY_URL not set; analyses will not be stored");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let state = AppState::new(config)?;
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Sinout gateway is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
