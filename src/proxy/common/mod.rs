// Common 模块 - 公共工具

pub mod model_mapping;
pub mod utils;
