// 响应归一化: 解封装、展平 SSE 事件、透出重试提示与 token 用量
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;

use crate::constants::{
    HEADER_CACHED_CONTENT_TOKENS, HEADER_CANDIDATES_TOKENS, HEADER_PROMPT_TOKENS,
    HEADER_RETRY_AFTER_MS, HEADER_TOTAL_TOKENS,
};
use crate::error::AppResult;
use crate::proxy::config::PreviewAccessPolicy;
use crate::proxy::mappers::common_utils::{
    extract_retry_delay, extract_usage_from_sse, extract_usage_metadata,
    rewrite_preview_access_error, sse_data, RetryDelay, UsageMetadata,
};

/// Fully buffered backend response.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BackendResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Buffer an upstream response. Framing headers are dropped since the
    /// body is re-emitted with a known length.
    pub async fn from_upstream(response: reqwest::Response) -> AppResult<Self> {
        let status = response.status();
        let mut headers = response.headers().clone();
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);
        headers.remove(header::CONTENT_LENGTH);
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    fn content_type(&self) -> String {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

impl IntoResponse for BackendResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseContext {
    pub streaming: bool,
    pub requested_model: Option<String>,
}

/// Result of normalization. `Degraded` always carries the original response.
#[derive(Debug, Clone)]
pub enum Normalized {
    Passthrough(BackendResponse),
    Rewritten(BackendResponse),
    Degraded {
        response: BackendResponse,
        reason: String,
    },
}

impl Normalized {
    pub fn response(&self) -> &BackendResponse {
        match self {
            Normalized::Passthrough(r) | Normalized::Rewritten(r) => r,
            Normalized::Degraded { response, .. } => response,
        }
    }

    pub fn into_inner(self) -> BackendResponse {
        match self {
            Normalized::Passthrough(r) | Normalized::Rewritten(r) => r,
            Normalized::Degraded { response, .. } => response,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Normalized::Degraded { .. })
    }
}

impl IntoResponse for Normalized {
    fn into_response(self) -> Response {
        self.into_inner().into_response()
    }
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
}

fn apply_retry_headers(headers: &mut HeaderMap, delay: RetryDelay) {
    headers.insert(header::RETRY_AFTER, HeaderValue::from(delay.seconds));
    set_header(headers, HEADER_RETRY_AFTER_MS, delay.millis);
}

fn apply_usage_headers(headers: &mut HeaderMap, usage: &UsageMetadata) {
    let pairs = [
        (HEADER_PROMPT_TOKENS, usage.prompt_token_count),
        (HEADER_CANDIDATES_TOKENS, usage.candidates_token_count),
        (HEADER_CACHED_CONTENT_TOKENS, usage.cached_content_token_count),
        (HEADER_TOTAL_TOKENS, usage.total_token_count),
    ];
    for (name, value) in pairs {
        if let Some(value) = value {
            set_header(headers, name, value);
        }
    }
}

/// Replace every `data:` event that carries an envelope with its inner
/// `response`. Other lines, and their line endings, are kept verbatim.
pub fn flatten_sse(body: &str) -> String {
    let mut out = String::with_capacity(body.len());

    for line in body.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        let ending = &line[content.len()..];

        let inner = sse_data(content)
            .and_then(|data| serde_json::from_str::<Value>(data).ok())
            .and_then(|event| event.get("response").cloned());

        match inner {
            Some(inner) => {
                out.push_str("data: ");
                out.push_str(&inner.to_string());
                out.push_str(ending);
            }
            None => out.push_str(line),
        }
    }

    out
}

/// Rewrite a backend response into what the public API would have returned.
pub fn normalize_response(
    response: BackendResponse,
    ctx: &ResponseContext,
    policy: &PreviewAccessPolicy,
) -> Normalized {
    let content_type = response.content_type();
    let is_sse = content_type.contains("text/event-stream");
    let is_json = content_type.contains("json");
    if !is_sse && !is_json {
        return Normalized::Passthrough(response);
    }

    let text = match std::str::from_utf8(&response.body).map(str::to_owned) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("[Normalizer] Non UTF-8 body, returning original: {}", e);
            return Normalized::Degraded {
                response,
                reason: format!("body is not valid UTF-8: {}", e),
            };
        }
    };

    if ctx.streaming != is_sse {
        tracing::debug!(
            "[Normalizer] Streaming={} but content-type is {}",
            ctx.streaming,
            content_type
        );
    }

    let mut headers = response.headers.clone();

    // 错误体即使标成 event-stream 也可能是单个 JSON
    if !response.status.is_success() {
        let delay = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| extract_retry_delay(&v));
        if let Some(delay) = delay {
            tracing::info!(
                "[Normalizer] Upstream {} with retry hint {}s ({}ms)",
                response.status,
                delay.seconds,
                delay.millis
            );
            apply_retry_headers(&mut headers, delay);
        }
    }

    let (body, usage) = if is_sse {
        let usage = extract_usage_from_sse(&text);
        (flatten_sse(&text), usage)
    } else {
        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("[Normalizer] Invalid JSON body, returning original: {}", e);
                return Normalized::Degraded {
                    response,
                    reason: format!("invalid JSON body: {}", e),
                };
            }
        };

        let usage = extract_usage_metadata(&parsed);
        let body = if let Some(inner) = parsed.get("response") {
            inner.to_string()
        } else if let Some(patched) =
            rewrite_preview_access_error(&parsed, ctx.requested_model.as_deref(), policy)
        {
            tracing::info!(
                "[Normalizer] Rewrote preview-access error for {:?}",
                ctx.requested_model
            );
            patched.to_string()
        } else {
            text.clone()
        };
        (body, usage)
    };

    if let Some(usage) = usage.as_ref() {
        apply_usage_headers(&mut headers, usage);
    }

    let headers_changed = headers != response.headers;
    if body == text && !headers_changed {
        return Normalized::Passthrough(response);
    }

    headers.remove(header::CONTENT_LENGTH);
    Normalized::Rewritten(BackendResponse {
        status: response.status,
        headers,
        body: Bytes::from(body),
    })
}
