// Claude 请求转换 (经由 v1internal)
// 与 Gemini 相反: Claude 拒绝占位签名，思考块必须携带真实签名
use serde_json::{json, Map, Value};

use crate::constants::MAX_OUTPUT_HEADROOM;
use crate::error::AppResult;
use crate::proxy::common::model_mapping::ModelFamily;
use crate::proxy::mappers::{
    promote_signature_key, transform_with_policy, FamilyPolicy, TransformContext, TransformDeps,
    TransformResult,
};

pub struct ClaudePolicy;

impl FamilyPolicy for ClaudePolicy {
    fn name(&self) -> &'static str {
        "Claude-Proxy"
    }

    fn family(&self) -> ModelFamily {
        ModelFamily::ClaudeProxy
    }

    // 搜索工具按原样转发
    fn normalize_tools(&self, _tools: &mut Vec<Value>, _ctx: &TransformContext) {}

    fn reconcile_model_part(
        &self,
        part: &mut Map<String, Value>,
        ctx: &TransformContext,
        deps: &TransformDeps<'_>,
    ) -> bool {
        // 函数调用不参与签名校验
        if part.contains_key("functionCall") {
            return true;
        }
        if part.get("thought").and_then(Value::as_bool) != Some(true) {
            return true;
        }
        promote_signature_key(part);

        let policy = &deps.config.signature;
        let text = part.get("text").and_then(Value::as_str).unwrap_or_default();

        if let Some(sig) = part
            .get("thoughtSignature")
            .and_then(Value::as_str)
            .filter(|sig| policy.is_authentic(sig))
        {
            deps.cache.store(&ctx.session_id, text, sig);
            return true;
        }

        if let Some(restored) = deps.cache.lookup(&ctx.session_id, text) {
            tracing::debug!(
                "[Claude-Proxy] Restored cached signature (len={}) for session {}",
                restored.len(),
                ctx.session_id
            );
            part.insert("thoughtSignature".to_string(), json!(restored));
            return true;
        }

        tracing::warn!(
            "[Claude-Proxy] Dropping thinking block without authentic signature (session {})",
            ctx.session_id
        );
        false
    }

    /// maxOutputTokens 必须大于 thinkingBudget (上游强约束)
    fn adjust_generation_config(&self, gen_config: &mut Map<String, Value>) {
        let Some(budget) = gen_config
            .get("thinkingConfig")
            .and_then(|tc| tc.get("thinkingBudget"))
            .and_then(Value::as_i64)
            .filter(|b| *b > 0)
        else {
            return;
        };

        let current = gen_config.get("maxOutputTokens").and_then(Value::as_i64);
        if current.map_or(true, |max| max <= budget) {
            let bumped = budget + MAX_OUTPUT_HEADROOM;
            tracing::debug!(
                "[Claude-Proxy] Bumping maxOutputTokens {:?} -> {} for thinking budget {}",
                current,
                bumped,
                budget
            );
            gen_config.insert("maxOutputTokens".to_string(), json!(bumped));
        }
    }
}

/// Build the v1internal body for a Claude model served through the proxy.
pub fn transform_claude_request(
    payload: &Value,
    ctx: &TransformContext,
    deps: &TransformDeps<'_>,
) -> AppResult<TransformResult> {
    transform_with_policy(&ClaudePolicy, payload, ctx, deps)
}
