//! Worker-side log agent: reads pages of whole lines from function log
//! files on behalf of the gateway.

pub mod cursor;
pub mod errors;
pub mod service;

pub use service::LogTailService;

/// Default directory all function logs live under
pub const DEFAULT_LOG_ROOT: &str = "/var/log/functions";
