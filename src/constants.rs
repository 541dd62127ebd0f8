// 上游协议常量 (Cloud Code v1internal)

/// Host of the public Gemini API; only calls aimed here are rewritten.
pub const PUBLIC_API_HOST: &str = "generativelanguage.googleapis.com";

/// Default Cloud Code endpoint. Sandbox is preferred over prod to avoid its 429s.
pub const DEFAULT_CODE_ASSIST_ENDPOINT: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";

pub const V1_INTERNAL_PATH: &str = "/v1internal";

/// `userAgent` field stamped into every request envelope.
pub const ENVELOPE_USER_AGENT: &str = "antigravity";

pub const USER_AGENT: &str = "antigravity/1.11.5 windows/amd64";
pub const GOOG_API_CLIENT: &str = "google-cloud-sdk vscode_cloudshelleditor/0.1";
pub const CLIENT_METADATA: &str =
    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;

pub const HEADER_GOOG_API_KEY: &str = "x-goog-api-key";
pub const HEADER_GOOG_API_CLIENT: &str = "x-goog-api-client";
pub const HEADER_CLIENT_METADATA: &str = "client-metadata";

pub const HEADER_RETRY_AFTER_MS: &str = "retry-after-ms";
pub const HEADER_PROMPT_TOKENS: &str = "x-gemini-prompt-token-count";
pub const HEADER_CANDIDATES_TOKENS: &str = "x-gemini-candidates-token-count";
pub const HEADER_CACHED_CONTENT_TOKENS: &str = "x-gemini-cached-content-token-count";
pub const HEADER_TOTAL_TOKENS: &str = "x-gemini-total-token-count";

/// Placeholder signature the Gemini family accepts in place of a real one.
pub const SKIP_SIGNATURE_SENTINEL: &str = "skip_thought_signature_validator";

/// Signatures at or below this length are treated as placeholders.
pub const MIN_SIGNATURE_LENGTH: usize = 50;

/// Upper bound the Gemini family accepts for `thinkingBudget`.
pub const GEMINI_MAX_THINKING_BUDGET: i64 = 24576;

/// Headroom added to `maxOutputTokens` when it does not exceed the thinking budget.
pub const MAX_OUTPUT_HEADROOM: i64 = 8192;

/// Marker in the backend's 404 body when the project lacks preview access.
pub const PREVIEW_ACCESS_ERROR_MARKER: &str = "Requested entity was not found";
