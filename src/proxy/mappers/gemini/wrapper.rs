// Gemini v1internal 包装
use serde_json::{json, Map, Value};

use crate::error::AppResult;
use crate::proxy::common::model_mapping::{is_flash_model, ModelFamily};
use crate::proxy::mappers::common_utils::{normalize_search_tools_in_place, wants_google_search};
use crate::proxy::mappers::{
    promote_signature_key, transform_with_policy, FamilyPolicy, TransformContext, TransformDeps,
    TransformResult,
};

/// Native Gemini family: placeholder signatures are accepted, so every
/// signature is replaced with the sentinel after caching the real one.
pub struct GeminiPolicy;

impl FamilyPolicy for GeminiPolicy {
    fn name(&self) -> &'static str {
        "Gemini-Wrap"
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::Gemini
    }

    fn normalize_tools(&self, tools: &mut Vec<Value>, ctx: &TransformContext) {
        if !wants_google_search(tools) {
            return;
        }

        // Flash 不支持联网与函数声明混用
        if is_flash_model(&ctx.model) {
            tracing::debug!(
                "[Gemini-Wrap] Flash model {} with search: replacing {} tool(s) with googleSearch",
                ctx.model,
                tools.len()
            );
            *tools = vec![json!({"googleSearch": {}})];
            return;
        }

        normalize_search_tools_in_place(tools);
    }

    fn reconcile_model_part(
        &self,
        part: &mut Map<String, Value>,
        ctx: &TransformContext,
        deps: &TransformDeps<'_>,
    ) -> bool {
        promote_signature_key(part);
        let is_thought = part.get("thought").and_then(Value::as_bool) == Some(true);
        let has_signature = part.contains_key("thoughtSignature");
        let is_call = part.contains_key("functionCall");
        if !(is_thought || has_signature || is_call) {
            return true;
        }

        let policy = &deps.config.signature;
        if let Some(sig) = part.get("thoughtSignature").and_then(Value::as_str) {
            let text = part.get("text").and_then(Value::as_str).unwrap_or_default();
            if policy.is_authentic(sig) && !text.is_empty() {
                deps.cache.store(&ctx.session_id, text, sig);
            }
        }

        part.insert("thoughtSignature".to_string(), json!(policy.sentinel));
        true
    }
}

/// Build the v1internal body for a native Gemini model.
pub fn transform_gemini_request(
    payload: &Value,
    ctx: &TransformContext,
    deps: &TransformDeps<'_>,
) -> AppResult<TransformResult> {
    transform_with_policy(&GeminiPolicy, payload, ctx, deps)
}
