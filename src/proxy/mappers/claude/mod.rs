// Claude mapper 模块
// Claude 模型经 v1internal 访问时的请求转换

pub mod request;

pub use request::{transform_claude_request, ClaudePolicy};
