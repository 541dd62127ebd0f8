// Handlers 模块 - HTTP 入口

pub mod gemini;
