// ==================================================================================
// 本地网关服务端到端测试: axum Router -> Gateway -> mock 上游 -> Normalizer
// ==================================================================================

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::constants::{HEADER_PROMPT_TOKENS, HEADER_TOTAL_TOKENS};
use crate::proxy::config::{ProxyConfig, UpstreamConfig};
use crate::proxy::gateway::{Credentials, Gateway};
use crate::proxy::server::{build_router, AppState};
use crate::proxy::upstream::UpstreamClient;

fn state(endpoint: &str) -> AppState {
    let config = ProxyConfig {
        session_id: Some("sid-e2e".to_string()),
        ..ProxyConfig::default()
    };
    let upstream = UpstreamConfig {
        endpoint: endpoint.to_string(),
        ..UpstreamConfig::default()
    };

    AppState {
        gateway: Arc::new(Gateway::new(config, &upstream.endpoint)),
        upstream: Arc::new(UpstreamClient::new(&upstream).unwrap()),
        credentials: Arc::new(Credentials {
            access_token: "ya29.e2e".to_string(),
            project_id: "proj-e2e".to_string(),
        }),
    }
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-goog-api-key", "AIza-should-not-leak")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_healthz() {
    let app = build_router(state("http://127.0.0.1:1"));
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_generate_content_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1internal:generateContent"))
        .and(header("authorization", "Bearer ya29.e2e"))
        .and(body_partial_json(json!({
            "project": "proj-e2e",
            "model": "gemini-3-pro-high",
            "userAgent": "antigravity",
            "request": {"sessionId": "sid-e2e"}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json; charset=UTF-8")
                .set_body_json(json!({
                    "response": {
                        "candidates": [{"content": {"role": "model", "parts": [{"text": "pong"}]}}],
                        "usageMetadata": {"promptTokenCount": 7, "totalTokenCount": 9}
                    }
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = build_router(state(&server.uri()));
    let payload = json!({"contents": [{"role": "user", "parts": [{"text": "ping"}]}]});
    let response = app
        .oneshot(post(
            "/v1beta/models/gemini-3-pro-preview:generateContent",
            &payload,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[HEADER_PROMPT_TOKENS], "7");
    assert_eq!(response.headers()[HEADER_TOTAL_TOKENS], "9");

    let body = read_json(response).await;
    assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "pong");
    assert!(body.get("response").is_none());

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("x-goog-api-key").is_none());
}

#[tokio::test]
async fn test_stream_generate_content_end_to_end() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"response\":{\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}}\n\n",
        "data: {\"response\":{\"candidates\":[],\"usageMetadata\":{\"totalTokenCount\":3}}}\n\n"
    );
    Mock::given(method("POST"))
        .and(path("/v1internal:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = build_router(state(&server.uri()));
    let response = app
        .oneshot(post(
            "/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse",
            &json!({"contents": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[HEADER_TOTAL_TOKENS], "3");

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("data: {\"candidates\""));
    assert!(!text.contains("\"response\""));
}

#[tokio::test]
async fn test_upstream_unreachable_returns_502() {
    let app = build_router(state("http://127.0.0.1:1"));
    let response = app
        .oneshot(post(
            "/v1beta/models/gemini-2.5-pro:generateContent",
            &json!({"contents": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = read_json(response).await;
    assert_eq!(body["error"]["code"], 502);
}
