// Gemini 家族映射模块

pub mod wrapper;

pub use wrapper::{transform_gemini_request, GeminiPolicy};
