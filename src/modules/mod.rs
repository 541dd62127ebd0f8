pub mod config;
pub mod logger;

// Re-export commonly used functions to the top level of the modules namespace
pub use config::*;
pub use logger::*;
