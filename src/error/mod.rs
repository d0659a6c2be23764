//! The unified error handling system for the cache engine.
//!
//! Every failure the engine raises is a [`CacheError`]: one struct with a
//! closed [`ErrorKind`] discriminant plus the shared context fields
//! (`operation`, `key`, `message`, `source`). Callers match on
//! [`CacheError::kind`] instead of relying on type identity.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

mod classify;
mod config;

pub use config::{ConfigError, StartupError};

/// A unified `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// 校验失败的细分原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationKind {
    /// 键长度超过 `max_key_length`
    KeyLength,
    /// 键为空或包含空白/控制字符
    KeyFormat,
    /// 序列化后的值超过 `max_value_size_mb`
    ValueSize,
    /// 输入为空
    EmptyInput,
    /// TTL 非法（例如 0）
    InvalidTtl,
}

impl ValidationKind {
    /// 字段值
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeyLength => "keyLength",
            Self::KeyFormat => "keyFormat",
            Self::ValueSize => "valueSize",
            Self::EmptyInput => "emptyInput",
            Self::InvalidTtl => "invalidTtl",
        }
    }
}

/// 缓存错误分类（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 存储不可达
    Connection,
    /// 存储拒绝或执行请求失败
    Operation,
    /// 编码/解码失败
    Serialization,
    /// 调用方输入违反尺寸/格式约束，在任何 I/O 之前检查
    Validation(ValidationKind),
    /// 操作超出预期时限
    Timeout,
    /// 咨询锁获取/释放失败
    Lock,
    /// 批量请求超过上限
    Batch {
        /// 请求的条目数
        batch_size: usize,
        /// 配置的上限
        max_allowed: usize,
    },
}

impl ErrorKind {
    /// 对应的 HTTP 风格状态码
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Connection | Self::Operation => 503,
            Self::Serialization | Self::Validation(_) | Self::Batch { .. } => 400,
            Self::Timeout => 408,
            Self::Lock => 409,
        }
    }

    /// 稳定的机器可读错误码
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Connection => "CACHE_CONNECTION",
            Self::Operation => "CACHE_OPERATION",
            Self::Serialization => "CACHE_SERIALIZATION",
            Self::Validation(_) => "CACHE_VALIDATION",
            Self::Timeout => "CACHE_TIMEOUT",
            Self::Lock => "CACHE_LOCK",
            Self::Batch { .. } => "CACHE_BATCH",
        }
    }

    /// 是否在 I/O 之前由引擎自身拒绝
    #[must_use]
    pub const fn is_pre_io(self) -> bool {
        matches!(self, Self::Validation(_) | Self::Batch { .. })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("缓存连接错误"),
            Self::Operation => f.write_str("缓存操作错误"),
            Self::Serialization => f.write_str("缓存序列化错误"),
            Self::Validation(kind) => write!(f, "缓存校验错误[{}]", kind.as_str()),
            Self::Timeout => f.write_str("缓存超时"),
            Self::Lock => f.write_str("缓存锁错误"),
            Self::Batch {
                batch_size,
                max_allowed,
            } => write!(f, "缓存批量错误[{batch_size}/{max_allowed}]"),
        }
    }
}

/// 缓存引擎错误
#[derive(Debug, Error)]
#[error("{kind}: {message} (operation={operation})")]
pub struct CacheError {
    kind: ErrorKind,
    operation: String,
    key: Option<String>,
    message: String,
    #[source]
    source: Option<anyhow::Error>,
}

impl CacheError {
    /// 通用构造
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            key: None,
            message: message.into(),
            source: None,
        }
    }

    /// 创建连接错误
    pub fn connection(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, operation, message)
    }

    /// 创建操作错误
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operation, operation, message)
    }

    /// 创建序列化错误
    pub fn serialization(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, operation, message)
    }

    /// 创建校验错误
    pub fn validation(
        operation: impl Into<String>,
        kind: ValidationKind,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorKind::Validation(kind), operation, message)
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, operation, message)
    }

    /// 创建锁错误
    pub fn lock(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lock, operation, message)
    }

    /// 创建批量错误
    pub fn batch(operation: impl Into<String>, batch_size: usize, max_allowed: usize) -> Self {
        Self::new(
            ErrorKind::Batch {
                batch_size,
                max_allowed,
            },
            operation,
            format!("批量大小 {batch_size} 超过上限 {max_allowed}"),
        )
    }

    /// 附加缓存键
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// 附加底层错误
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// 错误分类
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 状态码
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// 失败的操作名
    #[must_use]
    pub fn operation_name(&self) -> &str {
        &self.operation
    }

    /// 关联的缓存键
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// 错误描述
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 沿 `source` 链查找第一个 [`CacheError`]
#[must_use]
pub fn find_cache_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a CacheError> {
    std::iter::successors(Some(err), |e: &&'a (dyn StdError + 'static)| (*e).source()).find_map(|e| e.downcast_ref::<CacheError>())
}

/// 判断错误（或其 `source` 链）是否来自缓存引擎
#[must_use]
pub fn is_cache_error(err: &(dyn StdError + 'static)) -> bool {
    find_cache_error(err).is_some()
}

/// 取出缓存引擎错误的操作名
#[must_use]
pub fn operation_of<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a str> {
    find_cache_error(err).map(CacheError::operation_name)
}

/// 取出缓存引擎错误的缓存键
#[must_use]
pub fn key_of<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a str> {
    find_cache_error(err).and_then(CacheError::key)
}
