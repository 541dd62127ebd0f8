use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::{
    DEFAULT_CODE_ASSIST_ENDPOINT, GEMINI_MAX_THINKING_BUDGET, MIN_SIGNATURE_LENGTH,
    PREVIEW_ACCESS_ERROR_MARKER, SKIP_SIGNATURE_SENTINEL,
};

/// Thinking budget 处理模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingBudgetMode {
    /// Cap Gemini-family budgets at the upstream limit.
    #[default]
    Auto,
    /// Forward whatever the caller asked for.
    Passthrough,
    /// Replace any requested budget with `custom_value`.
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingBudgetConfig {
    #[serde(default)]
    pub mode: ThinkingBudgetMode,
    #[serde(default = "default_thinking_budget")]
    pub custom_value: i64,
}

fn default_thinking_budget() -> i64 {
    GEMINI_MAX_THINKING_BUDGET
}

impl Default for ThinkingBudgetConfig {
    fn default() -> Self {
        Self {
            mode: ThinkingBudgetMode::Auto,
            custom_value: default_thinking_budget(),
        }
    }
}

/// Signature validation constants observed from the backend.
///
/// The backend owns these values and can change them at any time, so they are
/// configuration with a version tag rather than hard invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePolicy {
    #[serde(default = "default_policy_version")]
    pub version: String,
    /// A signature must be strictly longer than this to count as authentic.
    #[serde(default = "default_min_signature_length")]
    pub min_length: usize,
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

fn default_policy_version() -> String {
    "2025-11".to_string()
}

fn default_min_signature_length() -> usize {
    MIN_SIGNATURE_LENGTH
}

fn default_sentinel() -> String {
    SKIP_SIGNATURE_SENTINEL.to_string()
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self {
            version: default_policy_version(),
            min_length: default_min_signature_length(),
            sentinel: default_sentinel(),
        }
    }
}

impl SignaturePolicy {
    /// Long enough and not the bypass sentinel.
    pub fn is_authentic(&self, signature: &str) -> bool {
        signature.len() > self.min_length && signature != self.sentinel
    }
}

/// When to rewrite the backend's opaque "not found" into a preview-access hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewAccessPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_preview_marker")]
    pub error_marker: String,
    /// Requested model ids containing any of these are preview-gated.
    #[serde(default = "default_preview_models")]
    pub model_markers: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_preview_marker() -> String {
    PREVIEW_ACCESS_ERROR_MARKER.to_string()
}

fn default_preview_models() -> Vec<String> {
    vec!["preview".to_string(), "gemini-3".to_string()]
}

impl Default for PreviewAccessPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            error_marker: default_preview_marker(),
            model_markers: default_preview_models(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureCacheConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_entries_per_session")]
    pub max_entries_per_session: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_sessions() -> usize {
    64
}

fn default_max_entries_per_session() -> usize {
    512
}

// 2 小时，与 Node.js 版一致
fn default_ttl_secs() -> u64 {
    2 * 60 * 60
}

impl Default for SignatureCacheConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_entries_per_session: default_max_entries_per_session(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// User overrides layered over the built-in alias/fallback tables.
/// Keys may contain `*` wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMappingConfig {
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub fallbacks: HashMap<String, String>,
}

/// Everything the translation core needs, independent of the HTTP front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub thinking_budget: ThinkingBudgetConfig,
    #[serde(default)]
    pub signature: SignaturePolicy,
    #[serde(default)]
    pub preview_access: PreviewAccessPolicy,
    #[serde(default)]
    pub signature_cache: SignatureCacheConfig,
    #[serde(default)]
    pub models: ModelMappingConfig,
    /// Fixed session id; a random one is generated per process when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub proxy: Option<UpstreamProxyConfig>,
}

fn default_endpoint() -> String {
    DEFAULT_CODE_ASSIST_ENDPOINT.to_string()
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_request_timeout() -> u64 {
    600
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            proxy: None,
        }
    }
}

/// 补全代理地址的协议前缀 (默认 http)
pub fn normalize_proxy_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}
