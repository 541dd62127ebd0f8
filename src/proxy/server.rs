use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::AppResult;
use crate::modules::config::AppConfig;
use crate::proxy::gateway::{Credentials, Gateway};
use crate::proxy::handlers;
use crate::proxy::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub upstream: Arc<UpstreamClient>,
    pub credentials: Arc<Credentials>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            gateway: Arc::new(Gateway::new(config.proxy.clone(), &config.upstream.endpoint)),
            upstream: Arc::new(UpstreamClient::new(&config.upstream)?),
            credentials: Arc::new(config.credentials()),
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1beta/models/:model_action",
            post(handlers::gemini::handle_model_action),
        )
        .route("/healthz", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> AppResult<()> {
    if config.credentials.access_token.is_empty() {
        tracing::warn!("No access token configured; upstream calls will be rejected");
    }

    let state = AppState::from_config(&config)?;
    let app = build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Gateway listening on http://{}", addr);
    tracing::info!("Upstream endpoint: {}", config.upstream.endpoint);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Response {
    Json(json!({"status": "ok"})).into_response()
}
