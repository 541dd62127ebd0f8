// 模型名称映射
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::proxy::config::ModelMappingConfig;

/// Caller-facing id -> backend internal id.
static MODEL_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("gemini-2.5-computer-use-preview-10-2025", "rev19-uic3-1p");
    m.insert("gemini-3-pro-image-preview", "gemini-3-pro-image");
    m.insert("gemini-3-pro-preview", "gemini-3-pro-high");
    m.insert("gemini-3-flash-preview", "gemini-3-flash");

    // Claude 经由 Gemini 协议访问时的别名
    m.insert("gemini-claude-sonnet-4-5", "claude-sonnet-4-5");
    m.insert("gemini-claude-sonnet-4-5-thinking", "claude-sonnet-4-5-thinking");
    m.insert("gemini-claude-opus-4-5-thinking", "claude-opus-4-5-thinking");
    m.insert("claude-sonnet-4-5-20250929", "claude-sonnet-4-5-thinking");
    m.insert("claude-opus-4-5-20251101", "claude-opus-4-5-thinking");

    m
});

/// Combinations the backend rejects, degraded to the closest thing it serves.
static MODEL_FALLBACKS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("gemini-2.5-flash-image", "gemini-2.5-flash");
    m.insert("gemini-2.5-flash-image-preview", "gemini-2.5-flash");
    m.insert("gemini-2.5-flash-lite", "gemini-2.5-flash");
    m.insert("gemini-2.0-flash", "gemini-2.5-flash");
    m.insert("gemini-2.0-flash-exp", "gemini-2.5-flash");

    m
});

/// Which model family a backend id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    Gemini,
    ClaudeProxy,
}

impl ModelFamily {
    pub fn of(model: &str) -> Self {
        if model.to_lowercase().contains("claude") {
            ModelFamily::ClaudeProxy
        } else {
            ModelFamily::Gemini
        }
    }
}

/// Flash-family models cannot mix native search with function declarations.
pub fn is_flash_model(model: &str) -> bool {
    model.to_lowercase().contains("flash")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Alias,
    Fallback,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub requested: String,
    pub resolved: String,
    pub source: RouteSource,
}

/// Wildcard matching - supports multiple wildcards
///
/// **Note**: Matching is **case-sensitive**.
///
/// Examples:
/// - `gemini-2.5-*` matches `gemini-2.5-flash` ✓
/// - `*-thinking` matches `claude-opus-4-5-thinking` ✓
/// - `a*b*c` matches `a123b456c` ✓
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut text_pos = 0;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }

        if i == 0 {
            if !text[text_pos..].starts_with(part) {
                return false;
            }
            text_pos += part.len();
        } else if i == parts.len() - 1 {
            return text[text_pos..].ends_with(part);
        } else if let Some(pos) = text[text_pos..].find(part) {
            text_pos += pos + part.len();
        } else {
            return false;
        }
    }

    true
}

/// 最具体的通配符规则胜出 (非通配符字符最多者)
fn best_wildcard<'a>(table: &'a HashMap<String, String>, model: &str) -> Option<&'a str> {
    let mut best: Option<(&str, usize)> = None;

    for (pattern, target) in table {
        if pattern.contains('*') && wildcard_match(pattern, model) {
            let specificity = pattern.chars().count() - pattern.matches('*').count();
            if best.map_or(true, |(_, s)| specificity > s) {
                best = Some((target.as_str(), specificity));
            }
        }
    }

    best.map(|(target, _)| target)
}

/// Alias and fallback tables: built-in data merged with user overrides.
#[derive(Debug, Clone, Default)]
pub struct ModelTables {
    custom: ModelMappingConfig,
}

impl ModelTables {
    pub fn new(custom: ModelMappingConfig) -> Self {
        Self { custom }
    }

    fn lookup(
        custom: &HashMap<String, String>,
        builtin: &HashMap<&'static str, &'static str>,
        model: &str,
    ) -> Option<String> {
        if let Some(target) = custom.get(model) {
            return Some(target.clone());
        }
        if let Some(target) = builtin.get(model) {
            return Some(target.to_string());
        }
        best_wildcard(custom, model).map(str::to_string)
    }

    /// 解析优先级: 别名表 > 降级表 > 原样透传
    ///
    /// Within each table: exact user override, exact built-in, then the most
    /// specific user wildcard.
    pub fn resolve(&self, requested: &str) -> ModelRoute {
        if let Some(resolved) = Self::lookup(&self.custom.aliases, &MODEL_ALIASES, requested) {
            tracing::debug!("[Router] Alias: {} -> {}", requested, resolved);
            return ModelRoute {
                requested: requested.to_string(),
                resolved,
                source: RouteSource::Alias,
            };
        }

        if let Some(resolved) = Self::lookup(&self.custom.fallbacks, &MODEL_FALLBACKS, requested) {
            tracing::info!("[Router] Fallback: {} -> {}", requested, resolved);
            return ModelRoute {
                requested: requested.to_string(),
                resolved,
                source: RouteSource::Fallback,
            };
        }

        ModelRoute {
            requested: requested.to_string(),
            resolved: requested.to_string(),
            source: RouteSource::Direct,
        }
    }
}
