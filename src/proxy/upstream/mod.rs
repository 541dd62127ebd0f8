// 上游通讯模块

pub mod client;

pub use client::UpstreamClient;
