// 网关路由: 判定是否改写出站调用，并重组 URL / 请求头 / 请求体
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use url::Url;

use crate::constants::{
    CLIENT_METADATA, ENVELOPE_USER_AGENT, GOOG_API_CLIENT, HEADER_CLIENT_METADATA,
    HEADER_GOOG_API_CLIENT, HEADER_GOOG_API_KEY, PUBLIC_API_HOST, USER_AGENT, V1_INTERNAL_PATH,
};
use crate::proxy::common::model_mapping::{ModelFamily, ModelRoute, ModelTables};
use crate::proxy::common::utils::{generate_request_id, generate_session_id};
use crate::proxy::config::ProxyConfig;
use crate::proxy::mappers::common_utils::RequestBody;
use crate::proxy::mappers::{
    transform_claude_request, transform_gemini_request, TransformContext, TransformDebugInfo,
    TransformDeps,
};
use crate::proxy::normalizer::{normalize_response, BackendResponse, Normalized, ResponseContext};
use crate::proxy::signature_cache::SignatureCache;

static MODEL_ACTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/models/([^/:]+):(\w+)").expect("valid model action regex"));

/// An HTTP call the agent runtime is about to issue.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub project_id: String,
}

/// What happened to the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyOutcome {
    Untouched,
    /// Pre-enveloped body with refreshed identifiers.
    Refreshed,
    Transformed(TransformDebugInfo),
    /// Transform failed; the original body is forwarded.
    Degraded(String),
}

#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub call: OutboundCall,
    pub streaming: bool,
    /// Model id as the caller wrote it in the URL.
    pub requested_model: Option<String>,
    pub route: Option<ModelRoute>,
    pub outcome: BodyOutcome,
}

impl PreparedCall {
    fn passthrough(call: OutboundCall) -> Self {
        Self {
            call,
            streaming: false,
            requested_model: None,
            route: None,
            outcome: BodyOutcome::Untouched,
        }
    }

    /// Whether the call was aimed at the public API and rerouted.
    pub fn is_rerouted(&self) -> bool {
        self.route.is_some()
    }

    pub fn response_context(&self) -> ResponseContext {
        ResponseContext {
            streaming: self.streaming,
            requested_model: self.requested_model.clone(),
        }
    }
}

/// Translation gateway. One instance owns one session id and shares the
/// signature cache with every call it prepares.
pub struct Gateway {
    cache: Arc<SignatureCache>,
    config: Arc<ProxyConfig>,
    models: ModelTables,
    session_id: String,
    endpoint: String,
}

impl Gateway {
    pub fn new(config: ProxyConfig, endpoint: &str) -> Self {
        let cache = Arc::new(SignatureCache::new(&config.signature_cache));
        Self::with_cache(config, endpoint, cache)
    }

    pub fn with_cache(config: ProxyConfig, endpoint: &str, cache: Arc<SignatureCache>) -> Self {
        let session_id = config
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(generate_session_id);
        tracing::info!("[Gateway] Session id: {}", session_id);

        Self {
            models: ModelTables::new(config.models.clone()),
            config: Arc::new(config),
            cache,
            session_id,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cache(&self) -> &Arc<SignatureCache> {
        &self.cache
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Rewrite a call for the v1internal backend. Never fails: anything that
    /// cannot be translated is forwarded as-is.
    pub fn prepare(&self, call: OutboundCall, creds: &Credentials) -> PreparedCall {
        let targets_public_api = Url::parse(&call.url)
            .ok()
            .map_or(false, |url| url.host_str() == Some(PUBLIC_API_HOST));
        if !targets_public_api {
            return PreparedCall::passthrough(call);
        }

        let mut call = call;
        inject_auth(&mut call.headers, &creds.access_token);

        let Some((requested, action)) = extract_model_action(&call.url) else {
            tracing::debug!("[Gateway] No model/action in {}, auth only", call.url);
            return PreparedCall::passthrough(call);
        };

        let route = self.models.resolve(&requested);
        let streaming = action == "streamGenerateContent";
        call.url = self.backend_url(&action, streaming);

        let (body, outcome) = self.rewrite_body(&call.body, &route, streaming, creds);
        if let Some(body) = body {
            call.body = body;
            call.headers.remove(header::CONTENT_LENGTH);
        }

        if streaming {
            call.headers.insert(
                header::ACCEPT,
                HeaderValue::from_static("text/event-stream"),
            );
        }
        call.headers
            .insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        call.headers.insert(
            HeaderName::from_static(HEADER_GOOG_API_CLIENT),
            HeaderValue::from_static(GOOG_API_CLIENT),
        );
        call.headers.insert(
            HeaderName::from_static(HEADER_CLIENT_METADATA),
            HeaderValue::from_static(CLIENT_METADATA),
        );

        tracing::info!(
            "[Gateway] {} -> {} ({}, streaming={}, outcome={:?})",
            route.requested,
            route.resolved,
            action,
            streaming,
            outcome
        );

        PreparedCall {
            call,
            streaming,
            requested_model: Some(requested),
            route: Some(route),
            outcome,
        }
    }

    /// Normalize the backend response for a call prepared by this gateway.
    pub fn normalize(&self, response: BackendResponse, prepared: &PreparedCall) -> Normalized {
        if !prepared.is_rerouted() {
            return Normalized::Passthrough(response);
        }
        normalize_response(
            response,
            &prepared.response_context(),
            &self.config.preview_access,
        )
    }

    fn backend_url(&self, action: &str, streaming: bool) -> String {
        let mut url = format!("{}{}:{}", self.endpoint, V1_INTERNAL_PATH, action);
        if streaming {
            url.push_str("?alt=sse");
        }
        url
    }

    fn rewrite_body(
        &self,
        raw: &Bytes,
        route: &ModelRoute,
        streaming: bool,
        creds: &Credentials,
    ) -> (Option<Bytes>, BodyOutcome) {
        match RequestBody::parse(raw) {
            RequestBody::Empty => (None, BodyOutcome::Untouched),
            RequestBody::Unparseable(reason) => {
                tracing::warn!("[Gateway] Unparseable body, forwarding original: {}", reason);
                (None, BodyOutcome::Degraded(reason))
            }
            RequestBody::Enveloped(envelope) => {
                let refreshed = self.refresh_envelope(envelope, &route.resolved);
                match serde_json::to_string(&refreshed) {
                    Ok(body) => (Some(Bytes::from(body)), BodyOutcome::Refreshed),
                    Err(e) => {
                        tracing::warn!("[Gateway] Failed to re-serialize envelope: {}", e);
                        (None, BodyOutcome::Degraded(e.to_string()))
                    }
                }
            }
            RequestBody::Canonical(payload) => {
                let ctx = TransformContext {
                    model: route.resolved.clone(),
                    project_id: creds.project_id.clone(),
                    streaming,
                    request_id: generate_request_id(),
                    session_id: self.session_id.clone(),
                };
                let deps = TransformDeps {
                    cache: &self.cache,
                    config: &self.config,
                };
                let payload = Value::Object(payload);

                let result = match ModelFamily::of(&ctx.model) {
                    ModelFamily::ClaudeProxy => transform_claude_request(&payload, &ctx, &deps),
                    ModelFamily::Gemini => transform_gemini_request(&payload, &ctx, &deps),
                };

                match result {
                    Ok(result) => (
                        Some(Bytes::from(result.body)),
                        BodyOutcome::Transformed(result.debug_info),
                    ),
                    Err(e) => {
                        tracing::warn!(
                            "[Gateway] Transform failed for {}, forwarding original: {}",
                            ctx.model,
                            e
                        );
                        (None, BodyOutcome::Degraded(e.to_string()))
                    }
                }
            }
        }
    }

    /// 已封装的请求: 只刷新标识字段
    fn refresh_envelope(&self, mut envelope: Map<String, Value>, model: &str) -> Value {
        envelope.insert("model".to_string(), json!(model));
        envelope.insert("userAgent".to_string(), json!(ENVELOPE_USER_AGENT));
        envelope.insert("requestId".to_string(), json!(generate_request_id()));
        if let Some(request) = envelope.get_mut("request").and_then(Value::as_object_mut) {
            request.insert("sessionId".to_string(), json!(self.session_id));
        }
        Value::Object(envelope)
    }
}

fn inject_auth(headers: &mut HeaderMap, access_token: &str) {
    headers.remove(HEADER_GOOG_API_KEY);
    match HeaderValue::from_str(&format!("Bearer {}", access_token)) {
        Ok(value) => {
            headers.insert(header::AUTHORIZATION, value);
        }
        Err(e) => tracing::warn!("[Gateway] Access token is not a valid header value: {}", e),
    }
}

/// `(model, action)` from a `/models/{model}:{action}` path.
fn extract_model_action(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let caps = MODEL_ACTION_RE.captures(parsed.path())?;
    Some((caps.get(1)?.as_str().to_string(), caps.get(2)?.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> Gateway {
        let config = ProxyConfig {
            session_id: Some("sid-test".to_string()),
            ..ProxyConfig::default()
        };
        Gateway::new(config, "https://backend.example.com/")
    }

    fn creds() -> Credentials {
        Credentials {
            access_token: "ya29.token".to_string(),
            project_id: "proj-1".to_string(),
        }
    }

    fn call(url: &str, body: &str) -> OutboundCall {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_GOOG_API_KEY, HeaderValue::from_static("AIza-key"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        OutboundCall {
            url: url.to_string(),
            method: Method::POST,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_foreign_host_untouched() {
        let original = call("https://api.example.com/v1/models/x:generateContent", "{}");
        let prepared = gateway().prepare(original.clone(), &creds());

        assert_eq!(prepared.call.url, original.url);
        assert_eq!(prepared.call.headers, original.headers);
        assert_eq!(prepared.call.body, original.body);
        assert_eq!(prepared.outcome, BodyOutcome::Untouched);
        assert!(!prepared.is_rerouted());
    }

    #[test]
    fn test_unparseable_url_untouched() {
        let prepared = gateway().prepare(call("not a url", "{}"), &creds());
        assert_eq!(prepared.call.url, "not a url");
    }

    #[test]
    fn test_missing_pattern_injects_auth_only() {
        let url = "https://generativelanguage.googleapis.com/v1beta/files";
        let prepared = gateway().prepare(call(url, "{\"a\":1}"), &creds());

        assert_eq!(prepared.call.url, url);
        assert_eq!(prepared.call.body, Bytes::from("{\"a\":1}"));
        assert!(prepared.call.headers.get(HEADER_GOOG_API_KEY).is_none());
        assert_eq!(
            prepared.call.headers[header::AUTHORIZATION],
            "Bearer ya29.token"
        );
    }

    #[test]
    fn test_streaming_call_rewritten() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-pro-preview:streamGenerateContent?alt=sse";
        let body = r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#;
        let prepared = gateway().prepare(call(url, body), &creds());

        assert_eq!(
            prepared.call.url,
            "https://backend.example.com/v1internal:streamGenerateContent?alt=sse"
        );
        assert!(prepared.streaming);
        assert_eq!(prepared.requested_model.as_deref(), Some("gemini-3-pro-preview"));
        assert_eq!(prepared.call.headers[header::ACCEPT], "text/event-stream");
        assert_eq!(prepared.call.headers[header::USER_AGENT], USER_AGENT);
        assert_eq!(prepared.call.headers[HEADER_GOOG_API_CLIENT], GOOG_API_CLIENT);
        assert_eq!(prepared.call.headers[HEADER_CLIENT_METADATA], CLIENT_METADATA);
        assert!(prepared.call.headers.get(header::CONTENT_LENGTH).is_none());

        let out: Value = serde_json::from_slice(&prepared.call.body).unwrap();
        assert_eq!(out["model"], "gemini-3-pro-high");
        assert_eq!(out["project"], "proj-1");
        assert_eq!(out["request"]["sessionId"], "sid-test");
        assert!(out["requestId"].as_str().unwrap().starts_with("agent-"));
        assert!(matches!(prepared.outcome, BodyOutcome::Transformed(ref info) if info.transformer == "Gemini-Wrap"));
    }

    #[test]
    fn test_claude_family_dispatch() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-claude-sonnet-4-5:generateContent";
        let prepared = gateway().prepare(call(url, r#"{"contents":[]}"#), &creds());

        assert!(!prepared.streaming);
        assert_eq!(prepared.call.url, "https://backend.example.com/v1internal:generateContent");
        assert!(prepared.call.headers.get(header::ACCEPT).is_none());
        assert!(matches!(prepared.outcome, BodyOutcome::Transformed(ref info) if info.transformer == "Claude-Proxy"));
    }

    #[test]
    fn test_enveloped_body_refreshed() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-lite:generateContent";
        let body = r#"{"project":"p","model":"old","userAgent":"x","requestId":"r-old","request":{"contents":[],"sessionId":"old"}}"#;
        let prepared = gateway().prepare(call(url, body), &creds());

        assert_eq!(prepared.outcome, BodyOutcome::Refreshed);
        let out: Value = serde_json::from_slice(&prepared.call.body).unwrap();
        assert_eq!(out["project"], "p");
        assert_eq!(out["model"], "gemini-2.5-flash");
        assert_eq!(out["userAgent"], "antigravity");
        assert_ne!(out["requestId"], "r-old");
        assert_eq!(out["request"]["sessionId"], "sid-test");
    }

    #[test]
    fn test_unparseable_body_degraded() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent";
        let prepared = gateway().prepare(call(url, "{not json"), &creds());

        assert!(matches!(prepared.outcome, BodyOutcome::Degraded(_)));
        assert_eq!(prepared.call.body, Bytes::from("{not json"));
        // 请求体未改动时保留 content-length
        assert!(prepared.call.headers.get(header::CONTENT_LENGTH).is_some());
        assert_eq!(prepared.call.url, "https://backend.example.com/v1internal:generateContent");
    }

    #[test]
    fn test_transform_failure_forwards_original() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent";
        let body = r#"{"contents":"bad"}"#;
        let prepared = gateway().prepare(call(url, body), &creds());

        assert!(matches!(prepared.outcome, BodyOutcome::Degraded(_)));
        assert_eq!(prepared.call.body, Bytes::from(body));
    }

    #[test]
    fn test_empty_body_untouched() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:countTokens";
        let prepared = gateway().prepare(call(url, ""), &creds());

        assert_eq!(prepared.outcome, BodyOutcome::Untouched);
        assert_eq!(prepared.call.url, "https://backend.example.com/v1internal:countTokens");
    }

    #[test]
    fn test_generated_session_id_when_unset() {
        let gw = Gateway::new(ProxyConfig::default(), "https://backend.example.com");
        assert!(gw.session_id().starts_with("sid-"));
    }
}
