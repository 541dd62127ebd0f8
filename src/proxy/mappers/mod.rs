// 请求转换: 公共 Gemini 协议 -> v1internal 信封
// 两个模型家族共用一条管线，差异点由 FamilyPolicy 描述

pub mod claude;
pub mod common_utils;
pub mod gemini;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::ENVELOPE_USER_AGENT;
use crate::error::{AppError, AppResult};
use crate::proxy::common::model_mapping::ModelFamily;
use crate::proxy::config::ProxyConfig;
use crate::proxy::signature_cache::SignatureCache;

use common_utils::{
    apply_thinking_config, count_tools, ensure_validated_tool_mode, rename_system_instruction,
    resolve_cached_content, strip_safety_settings,
};

pub use claude::transform_claude_request;
pub use gemini::transform_gemini_request;

/// Per-call facts, fixed before the transform starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformContext {
    /// Resolved backend model id.
    pub model: String,
    pub project_id: String,
    pub streaming: bool,
    pub request_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformDebugInfo {
    pub transformer: &'static str,
    pub tool_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResult {
    pub body: String,
    pub debug_info: TransformDebugInfo,
}

/// v1internal request envelope. `request` never carries `model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedEnvelope {
    pub project: String,
    pub model: String,
    pub user_agent: String,
    pub request_id: String,
    pub request: Value,
}

impl WrappedEnvelope {
    pub fn new(ctx: &TransformContext, request: Value) -> Self {
        Self {
            project: ctx.project_id.clone(),
            model: ctx.model.clone(),
            user_agent: ENVELOPE_USER_AGENT.to_string(),
            request_id: ctx.request_id.clone(),
            request,
        }
    }
}

/// Shared state a transform may read or write.
#[derive(Clone, Copy)]
pub struct TransformDeps<'a> {
    pub cache: &'a SignatureCache,
    pub config: &'a ProxyConfig,
}

/// The points where the two model families diverge.
pub trait FamilyPolicy {
    fn name(&self) -> &'static str;

    fn family(&self) -> ModelFamily;

    /// Rewrite the `tools` array in place.
    fn normalize_tools(&self, tools: &mut Vec<Value>, ctx: &TransformContext);

    /// Reconcile the continuity signature of one model-authored part.
    /// Returning `false` drops the part.
    fn reconcile_model_part(
        &self,
        part: &mut Map<String, Value>,
        ctx: &TransformContext,
        deps: &TransformDeps<'_>,
    ) -> bool;

    /// Runs after the thinking config has been normalized.
    fn adjust_generation_config(&self, _gen_config: &mut Map<String, Value>) {}
}

fn is_model_turn(content: &Value) -> bool {
    content.get("role").and_then(Value::as_str) == Some("model")
}

/// Promote the legacy `thought_signature` key to `thoughtSignature`.
pub(crate) fn promote_signature_key(part: &mut Map<String, Value>) {
    if let Some(sig) = part.remove("thought_signature") {
        part.entry("thoughtSignature").or_insert(sig);
    }
}

/// Walk model-role turns and let the policy keep, patch or drop each part.
/// Non-model turns are left byte-identical; model turns are never removed,
/// even when every part was dropped.
fn reconcile_contents<P: FamilyPolicy + ?Sized>(
    policy: &P,
    contents: &mut [Value],
    ctx: &TransformContext,
    deps: &TransformDeps<'_>,
) {
    for content in contents.iter_mut().filter(|c| is_model_turn(c)) {
        let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) else {
            continue;
        };

        let before = parts.len();
        parts.retain_mut(|part| match part.as_object_mut() {
            Some(obj) => policy.reconcile_model_part(obj, ctx, deps),
            None => true,
        });

        if before > 0 && parts.is_empty() {
            tracing::debug!(
                "[{}] Model turn left without parts after signature rule",
                policy.name()
            );
        }
    }
}

/// Shared normalization pipeline. The input payload is never mutated.
pub fn transform_with_policy<P: FamilyPolicy + ?Sized>(
    policy: &P,
    payload: &Value,
    ctx: &TransformContext,
    deps: &TransformDeps<'_>,
) -> AppResult<TransformResult> {
    let mut working = payload
        .as_object()
        .cloned()
        .ok_or_else(|| AppError::InvalidPayload("request body is not a JSON object".into()))?;

    strip_safety_settings(&mut working);
    ensure_validated_tool_mode(&mut working);
    apply_thinking_config(&mut working, policy.family(), &deps.config.thinking_budget);
    if let Some(gen_config) = working
        .get_mut("generationConfig")
        .and_then(Value::as_object_mut)
    {
        policy.adjust_generation_config(gen_config);
    }
    rename_system_instruction(&mut working);
    resolve_cached_content(&mut working);
    working.remove("model");

    let mut drop_tools = false;
    if let Some(tools) = working.get_mut("tools").and_then(Value::as_array_mut) {
        let had_tools = !tools.is_empty();
        policy.normalize_tools(tools, ctx);
        drop_tools = had_tools && tools.is_empty();
    }
    if drop_tools {
        working.remove("tools");
    }
    let tool_count = count_tools(working.get("tools"));

    match working.get_mut("contents") {
        Some(Value::Array(contents)) => reconcile_contents(policy, contents, ctx, deps),
        Some(_) => {
            return Err(AppError::InvalidPayload("`contents` must be an array".into()));
        }
        None => {}
    }

    working.insert("sessionId".to_string(), json!(ctx.session_id));

    let envelope = WrappedEnvelope::new(ctx, Value::Object(working));
    let body = serde_json::to_string(&envelope)?;

    tracing::debug!(
        "[{}] Wrapped request for {} (tools={}, streaming={})",
        policy.name(),
        ctx.model,
        tool_count,
        ctx.streaming
    );

    Ok(TransformResult {
        body,
        debug_info: TransformDebugInfo {
            transformer: policy.name(),
            tool_count,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KeepAll;

    impl FamilyPolicy for KeepAll {
        fn name(&self) -> &'static str {
            "Test-Policy"
        }
        fn family(&self) -> ModelFamily {
            ModelFamily::Gemini
        }
        fn normalize_tools(&self, _tools: &mut Vec<Value>, _ctx: &TransformContext) {}
        fn reconcile_model_part(
            &self,
            part: &mut Map<String, Value>,
            _ctx: &TransformContext,
            _deps: &TransformDeps<'_>,
        ) -> bool {
            !part.contains_key("drop")
        }
    }

    fn ctx() -> TransformContext {
        TransformContext {
            model: "gemini-2.5-pro".to_string(),
            project_id: "proj-1".to_string(),
            streaming: false,
            request_id: "agent-1".to_string(),
            session_id: "sid-1".to_string(),
        }
    }

    fn run(payload: &Value) -> AppResult<Value> {
        let cache = SignatureCache::default();
        let config = ProxyConfig::default();
        let deps = TransformDeps {
            cache: &cache,
            config: &config,
        };
        let result = transform_with_policy(&KeepAll, payload, &ctx(), &deps)?;
        Ok(serde_json::from_str(&result.body)?)
    }

    #[test]
    fn test_envelope_shape() {
        let payload = json!({
            "model": "gemini-2.5-pro",
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "safetySettings": [{"category": "HARM_CATEGORY_HATE_SPEECH"}],
            "system_instruction": {"parts": [{"text": "be brief"}]}
        });
        let out = run(&payload).unwrap();

        assert_eq!(out["project"], "proj-1");
        assert_eq!(out["model"], "gemini-2.5-pro");
        assert_eq!(out["userAgent"], "antigravity");
        assert_eq!(out["requestId"], "agent-1");
        assert_eq!(out["request"]["sessionId"], "sid-1");
        assert!(out["request"].get("model").is_none());
        assert!(out["request"].get("safetySettings").is_none());
        assert_eq!(out["request"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(
            out["request"]["toolConfig"]["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }

    #[test]
    fn test_input_not_mutated() {
        let payload = json!({"model": "x", "contents": []});
        let snapshot = payload.clone();
        run(&payload).unwrap();
        assert_eq!(payload, snapshot);
    }

    #[test]
    fn test_emptied_model_turn_kept() {
        let payload = json!({
            "contents": [
                {"role": "user", "parts": [{"text": "q"}]},
                {"role": "model", "parts": [{"drop": true}]},
                {"role": "model", "parts": []},
                {"role": "user", "parts": [{"drop": true}]}
            ]
        });
        let out = run(&payload).unwrap();
        let contents = out["request"]["contents"].as_array().unwrap();

        // 轮次数量不变，只移除被丢弃的 part; 用户轮次不受策略影响
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"], json!([]));
        assert_eq!(contents[2]["parts"], json!([]));
        assert_eq!(contents[3]["parts"][0]["drop"], true);
    }

    #[test]
    fn test_pipeline_leaves_signature_keys_to_policy() {
        let payload = json!({
            "contents": [{"role": "model", "parts": [
                {"functionCall": {"name": "ls", "args": {}}, "thought_signature": "legacy"}
            ]}]
        });
        let out = run(&payload).unwrap();
        let part = &out["request"]["contents"][0]["parts"][0];

        assert_eq!(part["thought_signature"], "legacy");
        assert!(part.get("thoughtSignature").is_none());
    }

    #[test]
    fn test_promote_signature_key() {
        let mut part = json!({"thought_signature": "old"}).as_object().cloned().unwrap();
        promote_signature_key(&mut part);
        assert_eq!(part, *json!({"thoughtSignature": "old"}).as_object().unwrap());

        // camelCase 优先
        let mut both = json!({"thought_signature": "old", "thoughtSignature": "new"})
            .as_object()
            .cloned()
            .unwrap();
        promote_signature_key(&mut both);
        assert_eq!(both, *json!({"thoughtSignature": "new"}).as_object().unwrap());
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(run(&json!([1])), Err(AppError::InvalidPayload(_))));
        assert!(matches!(
            run(&json!({"contents": "nope"})),
            Err(AppError::InvalidPayload(_))
        ));
    }
}
