//! fastgeoapi gateway
//!
//! Entry point for the gateway service. Configuration comes from the
//! environment; see `GatewayConfig` for the recognised settings.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fastgeoapi_gateway::{build_app, GatewayConfig, GatewayState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let fallback = config
        .log_level
        .clone()
        .unwrap_or_else(|| "info,fastgeoapi=debug".into());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fastgeoapi gateway");

    let listen_addr = config.listen_addr();
    let state = match GatewayState::from_config(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    tracing::info!(
        listen_addr = %listen_addr,
        context = %state.config.context,
        auth_mode = ?state.mode,
        mcp = state.config.mcp.enabled,
        upstream = ?state.config.upstream_url.as_ref().map(url::Url::as_str),
        "Gateway configuration loaded"
    );

    let app = build_app(state)?;
    tracing::info!("Router configured");

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
