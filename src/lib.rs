//! # Market Cache Library
//!
//! 行情数据平台共享的缓存引擎核心库

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use cache::{CacheEngine, CacheKey, Encoding, SetOptions};
pub use config::AppConfig;
pub use error::{CacheError, ErrorKind, Result, ValidationKind};
