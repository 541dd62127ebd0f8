// Common utilities for request/response mapping across both model families.
// Pure functions: no network, no cache.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::constants::GEMINI_MAX_THINKING_BUDGET;
use crate::proxy::common::model_mapping::ModelFamily;
use crate::proxy::config::{PreviewAccessPolicy, ThinkingBudgetConfig, ThinkingBudgetMode};

/// Request body shape, sniffed once at the gateway boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Already shaped for v1internal by an upstream caller.
    Enveloped(Map<String, Value>),
    /// Public Gemini API shape that needs a family transform.
    Canonical(Map<String, Value>),
    Unparseable(String),
}

impl RequestBody {
    pub fn parse(raw: &[u8]) -> Self {
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return RequestBody::Empty;
        }

        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(map)) => {
                let has_project = map.get("project").map_or(false, Value::is_string);
                if has_project && map.contains_key("request") {
                    RequestBody::Enveloped(map)
                } else {
                    RequestBody::Canonical(map)
                }
            }
            Ok(other) => RequestBody::Unparseable(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            )),
            Err(e) => RequestBody::Unparseable(e.to_string()),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn get_either<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

/// 上游自行管理安全设置
pub fn strip_safety_settings(payload: &mut Map<String, Value>) {
    payload.remove("safetySettings");
    payload.remove("safety_settings");
}

/// Force `toolConfig.functionCallingConfig.mode = "VALIDATED"`.
pub fn ensure_validated_tool_mode(payload: &mut Map<String, Value>) {
    let tool_config = payload
        .entry("toolConfig")
        .or_insert_with(|| json!({}));
    if !tool_config.is_object() {
        *tool_config = json!({});
    }

    let calling = tool_config
        .as_object_mut()
        .map(|obj| obj.entry("functionCallingConfig").or_insert_with(|| json!({})));

    if let Some(calling) = calling {
        if !calling.is_object() {
            *calling = json!({});
        }
        calling["mode"] = json!("VALIDATED");
    }
}

fn apply_budget_mode(budget: i64, family: ModelFamily, cfg: &ThinkingBudgetConfig) -> i64 {
    // 0 关闭思考, -1 动态预算: 均原样保留
    if budget <= 0 {
        return budget;
    }

    let cap = |value: i64| {
        if family == ModelFamily::Gemini && value > GEMINI_MAX_THINKING_BUDGET {
            tracing::info!(
                "[Thinking] Capping thinking_budget from {} to {}",
                value,
                GEMINI_MAX_THINKING_BUDGET
            );
            GEMINI_MAX_THINKING_BUDGET
        } else {
            value
        }
    };

    match cfg.mode {
        ThinkingBudgetMode::Passthrough => budget,
        ThinkingBudgetMode::Custom => cap(cfg.custom_value),
        ThinkingBudgetMode::Auto => cap(budget),
    }
}

/// Normalize a thinking configuration object into the backend's camelCase shape.
///
/// Accepts camelCase or snake_case keys for budget, include flag and level.
/// Returns `None` when nothing usable was requested.
pub fn normalize_thinking_config(
    raw: Option<&Value>,
    family: ModelFamily,
    cfg: &ThinkingBudgetConfig,
) -> Option<Value> {
    let obj = raw?.as_object()?;

    let budget = get_either(obj, "thinkingBudget", "thinking_budget").and_then(Value::as_i64);
    let include = get_either(obj, "includeThoughts", "include_thoughts").and_then(Value::as_bool);
    let level = get_either(obj, "thinkingLevel", "thinking_level")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    if budget.is_none() && include.is_none() && level.is_none() {
        return None;
    }

    let mut out = Map::new();
    if let Some(budget) = budget {
        out.insert(
            "thinkingBudget".to_string(),
            json!(apply_budget_mode(budget, family, cfg)),
        );
    }
    if let Some(level) = level {
        out.insert("thinkingLevel".to_string(), json!(level));
    }
    if let Some(include) = include {
        out.insert("includeThoughts".to_string(), json!(include));
    }
    Some(Value::Object(out))
}

/// Rewrite `generationConfig.thinkingConfig` in place, or drop it when empty.
pub fn apply_thinking_config(
    payload: &mut Map<String, Value>,
    family: ModelFamily,
    cfg: &ThinkingBudgetConfig,
) {
    let Some(gen_config) = payload
        .get_mut("generationConfig")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let raw = gen_config
        .remove("thinkingConfig")
        .or_else(|| gen_config.remove("thinking_config"));
    gen_config.remove("thinking_config");

    match normalize_thinking_config(raw.as_ref(), family, cfg) {
        Some(normalized) => {
            gen_config.insert("thinkingConfig".to_string(), normalized);
        }
        None => {
            if raw.is_some() {
                tracing::debug!("[Thinking] Dropped empty thinkingConfig");
            }
        }
    }
}

pub fn rename_system_instruction(payload: &mut Map<String, Value>) {
    if let Some(value) = payload.remove("system_instruction") {
        if !payload.contains_key("systemInstruction") {
            payload.insert("systemInstruction".to_string(), value);
        }
    }
}

/// Collapse the three legacy cached-content locations into `cachedContent`.
///
/// Precedence: `cachedContent`, `cached_content`, then `extra_body`. The
/// first value that is neither null nor an empty string wins.
pub fn resolve_cached_content(payload: &mut Map<String, Value>) {
    let direct = payload.remove("cachedContent");
    let snake = payload.remove("cached_content");

    let mut from_extra = None;
    let mut prune_extra = false;
    if let Some(extra) = payload.get_mut("extra_body").and_then(Value::as_object_mut) {
        let snake_extra = extra.remove("cached_content");
        let camel_extra = extra.remove("cachedContent");
        from_extra = snake_extra.or(camel_extra);
        prune_extra = extra.is_empty();
    }
    if prune_extra {
        payload.remove("extra_body");
    }

    // null 和空字符串视为未设置; 其他类型原样转发，由上游校验
    let resolved = [direct, snake, from_extra]
        .into_iter()
        .flatten()
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        });

    if let Some(value) = resolved {
        if !value.is_string() {
            tracing::debug!("[Gateway] Forwarding non-string cachedContent: {}", value);
        }
        payload.insert("cachedContent".to_string(), value);
    }
}

fn is_native_search(tool: &Map<String, Value>) -> bool {
    tool.contains_key("googleSearch")
        || tool.contains_key("google_search")
        || tool.contains_key("googleSearchRetrieval")
}

fn declares_search_function(tool: &Map<String, Value>) -> bool {
    get_either(tool, "functionDeclarations", "function_declarations")
        .and_then(Value::as_array)
        .map_or(false, |decls| {
            decls
                .iter()
                .any(|d| d.get("name").and_then(Value::as_str) == Some("google_search"))
        })
}

/// Whether any tool asks for Google Search, natively or as a function.
pub fn wants_google_search(tools: &[Value]) -> bool {
    tools
        .iter()
        .filter_map(Value::as_object)
        .any(|tool| is_native_search(tool) || declares_search_function(tool))
}

/// Convert function-declaration search requests into the native tool in place.
///
/// Drops emptied declaration lists and keeps only tools that still carry
/// declarations, native search, or another native capability.
pub fn normalize_search_tools_in_place(tools: &mut Vec<Value>) {
    let mut needs_native = false;

    for tool in tools.iter_mut() {
        let Some(obj) = tool.as_object_mut() else {
            continue;
        };

        if let Some(native) = obj.remove("google_search") {
            obj.entry("googleSearch").or_insert(native);
        }

        for key in ["functionDeclarations", "function_declarations"] {
            if let Some(decls) = obj.get_mut(key).and_then(Value::as_array_mut) {
                let before = decls.len();
                decls.retain(|d| d.get("name").and_then(Value::as_str) != Some("google_search"));
                if decls.len() != before {
                    needs_native = true;
                }
            }
            let empty = obj
                .get(key)
                .and_then(Value::as_array)
                .map_or(false, Vec::is_empty);
            if empty {
                obj.remove(key);
            }
        }
    }

    tools.retain(|tool| {
        tool.as_object().map_or(false, |obj| {
            obj.contains_key("functionDeclarations")
                || obj.contains_key("function_declarations")
                || obj.contains_key("googleSearch")
                || obj.contains_key("googleSearchRetrieval")
                || obj.contains_key("urlContext")
                || obj.contains_key("codeExecution")
        })
    });

    let has_native = tools
        .iter()
        .filter_map(Value::as_object)
        .any(|obj| obj.contains_key("googleSearch"));
    if needs_native && !has_native {
        tools.push(json!({"googleSearch": {}}));
    }
}

/// Function declarations plus native search / URL-context entries.
pub fn count_tools(tools: Option<&Value>) -> usize {
    let Some(tools) = tools.and_then(Value::as_array) else {
        return 0;
    };

    tools
        .iter()
        .filter_map(Value::as_object)
        .map(|tool| {
            let decls = get_either(tool, "functionDeclarations", "function_declarations")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let search = usize::from(is_native_search(tool));
            let url_context = usize::from(tool.contains_key("urlContext") || tool.contains_key("url_context"));
            decls + search + url_context
        })
        .sum()
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: Option<u64>,
    pub candidates_token_count: Option<u64>,
    pub cached_content_token_count: Option<u64>,
    pub total_token_count: Option<u64>,
}

impl UsageMetadata {
    pub fn is_empty(&self) -> bool {
        self.prompt_token_count.is_none()
            && self.candidates_token_count.is_none()
            && self.cached_content_token_count.is_none()
            && self.total_token_count.is_none()
    }
}

/// Usage from either the enveloped (`response.usageMetadata`) or bare shape.
pub fn extract_usage_metadata(payload: &Value) -> Option<UsageMetadata> {
    let raw = payload
        .get("response")
        .and_then(|r| r.get("usageMetadata"))
        .or_else(|| payload.get("usageMetadata"))?;

    serde_json::from_value::<UsageMetadata>(raw.clone())
        .ok()
        .filter(|usage| !usage.is_empty())
}

/// Scan a buffered SSE body; the last event carrying usage wins.
pub fn extract_usage_from_sse(body: &str) -> Option<UsageMetadata> {
    body.lines()
        .filter_map(sse_data)
        .filter(|data| data.contains("usageMetadata"))
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .filter_map(|event| extract_usage_metadata(&event))
        .last()
}

/// Payload of a `data:` line, if this is one.
pub fn sse_data(line: &str) -> Option<&str> {
    line.trim_end_matches('\r')
        .strip_prefix("data:")
        .map(str::trim_start)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay {
    /// Rounded up so clients never retry early.
    pub seconds: u64,
    pub millis: u64,
}

static RETRY_DELAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)s\s*$").expect("valid retry delay regex"));

/// Parse a protobuf duration string such as `"12.5s"`.
pub fn parse_retry_delay(raw: &str) -> Option<RetryDelay> {
    let caps = RETRY_DELAY_RE.captures(raw)?;
    let seconds: f64 = caps.get(1)?.as_str().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }

    Some(RetryDelay {
        seconds: seconds.ceil() as u64,
        millis: (seconds * 1000.0).round() as u64,
    })
}

/// Find a `google.rpc.RetryInfo` detail in an error body.
pub fn extract_retry_delay(body: &Value) -> Option<RetryDelay> {
    body.get("error")?
        .get("details")?
        .as_array()?
        .iter()
        .filter(|detail| {
            detail
                .get("@type")
                .and_then(Value::as_str)
                .map_or(false, |t| t.ends_with("google.rpc.RetryInfo"))
        })
        .find_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
        .and_then(parse_retry_delay)
}

/// Turn the backend's opaque "not found" for preview-gated models into an
/// actionable message. Returns the patched body, or `None` if it does not apply.
pub fn rewrite_preview_access_error(
    body: &Value,
    requested_model: Option<&str>,
    policy: &PreviewAccessPolicy,
) -> Option<Value> {
    if !policy.enabled {
        return None;
    }

    let model = requested_model?;
    let lower = model.to_lowercase();
    if !policy
        .model_markers
        .iter()
        .any(|marker| lower.contains(&marker.to_lowercase()))
    {
        return None;
    }

    let error = body.get("error")?.as_object()?;
    let message = error.get("message").and_then(Value::as_str).unwrap_or("");
    let not_found = error.get("code").and_then(Value::as_u64) == Some(404)
        || error.get("status").and_then(Value::as_str) == Some("NOT_FOUND");
    if !not_found || !message.contains(&policy.error_marker) {
        return None;
    }

    let mut patched = body.clone();
    patched["error"]["message"] = json!(format!(
        "Model '{}' requires preview access. Enable preview features for this Google Cloud project or choose a generally available model. (upstream: {})",
        model, message
    ));
    Some(patched)
}
