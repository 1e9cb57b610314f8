//! NodeBridge engine binary: the bridge server between a browser front end
//! and a ComfyUI instance.

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use nodebridge_engine::api::{http, websocket};
use nodebridge_engine::config::AppConfig;
use nodebridge_engine::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nodebridge_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    tracing::info!(
        comfyui = %config.comfyui_base_url,
        workflow_dir = ?config.workflow_dir,
        "Starting NodeBridge"
    );

    let cors = build_cors_layer(&config.cors_allowed_origins)?;
    let state = AppState::new(config.clone())?;

    let app = http::router()
        .route("/ws", get(websocket::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "NodeBridge listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn build_cors_layer(origins: &[String]) -> Result<CorsLayer> {
    // The default deployment serves the front end from another port, so an
    // unset origin list means "any".
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }
    let parsed = origins
        .iter()
        .map(|o| o.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()
        .context("CORS_ALLOWED_ORIGINS contains an invalid origin")?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any))
}
