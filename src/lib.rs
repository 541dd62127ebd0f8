pub mod constants;
pub mod error;
pub mod modules;
pub mod proxy;

pub use error::{AppError, AppResult};
pub use proxy::{Credentials, Gateway, OutboundCall, SignatureCache};
