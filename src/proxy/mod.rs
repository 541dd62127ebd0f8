// proxy 模块 - Gemini 公共协议到 v1internal 的翻译网关

pub mod common;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod mappers;
pub mod normalizer;
pub mod server;
pub mod signature_cache;
pub mod upstream;

#[cfg(test)]
mod tests;

pub use config::ProxyConfig;
pub use gateway::{BodyOutcome, Credentials, Gateway, OutboundCall, PreparedCall};
pub use normalizer::{BackendResponse, Normalized, ResponseContext};
pub use server::{build_router, start_server, AppState};
pub use signature_cache::SignatureCache;
