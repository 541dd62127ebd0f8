// Gemini 原生协议入口: /v1beta/models/{model}:{action}
use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::constants::PUBLIC_API_HOST;
use crate::proxy::gateway::OutboundCall;
use crate::proxy::normalizer::Normalized;
use crate::proxy::server::AppState;

/// Drop connection-level headers that must not be replayed upstream.
fn forwardable_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut headers = incoming.clone();
    for name in [
        header::HOST,
        header::CONNECTION,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
        // 响应需整体缓冲为文本，不接受压缩
        header::ACCEPT_ENCODING,
    ] {
        headers.remove(name);
    }
    headers
}

/// Rebuild the public API URL the caller would have hit directly.
fn public_url(model_action: &str, query: Option<&str>) -> String {
    let mut url = format!("https://{}/v1beta/models/{}", PUBLIC_API_HOST, model_action);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

pub async fn handle_model_action(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let call = OutboundCall {
        url: public_url(&model_action, query.as_deref()),
        method,
        headers: forwardable_headers(&headers),
        body,
    };

    let prepared = state.gateway.prepare(call, &state.credentials);

    let response = match state.upstream.execute(prepared.call.clone()).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("[Gateway] Upstream request failed for {}: {}", model_action, e);
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": {
                        "code": 502,
                        "message": format!("Upstream request failed: {}", e),
                        "status": "UNAVAILABLE"
                    }
                })),
            )
                .into_response();
        }
    };

    let normalized = state.gateway.normalize(response, &prepared);
    if let Normalized::Degraded { reason, .. } = &normalized {
        tracing::warn!("[Normalizer] Returned original response: {}", reason);
    }
    normalized.into_response()
}
