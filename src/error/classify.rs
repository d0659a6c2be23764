//! # 底层错误分类
//!
//! 把存储层或任意来源的原始错误归入 [`ErrorKind`] 的某一类。
//! 规则按顺序匹配：连接 → 超时 → 编解码 → 锁 → 其余归为操作错误。

use super::{CacheError, ErrorKind};
use crate::cache::store::StoreError;

const CONNECTION_MARKERS: &[&str] = &[
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "enotfound",
    "ehostunreach",
    "broken pipe",
    "connection closed",
    "connection dropped",
    "not connected",
    "no connection",
    "failed to connect",
];

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "etimedout", "deadline exceeded"];

const SERIALIZATION_MARKERS: &[&str] = &[
    "json",
    "parse",
    "serializ",
    "deserializ",
    "decode",
    "encode",
    "unexpected token",
    "unexpected end",
    "invalid type",
    "malformed",
    "messagepack",
    "base64",
];

const LOCK_MARKERS: &[&str] = &["lock"];

fn matches_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

/// 按消息文本推断错误分类
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    if matches_any(&lowered, CONNECTION_MARKERS) {
        ErrorKind::Connection
    } else if matches_any(&lowered, TIMEOUT_MARKERS) {
        ErrorKind::Timeout
    } else if matches_any(&lowered, SERIALIZATION_MARKERS) {
        ErrorKind::Serialization
    } else if matches_any(&lowered, LOCK_MARKERS) {
        ErrorKind::Lock
    } else {
        ErrorKind::Operation
    }
}

impl CacheError {
    /// 将任意原始错误分类为缓存错误，并附带操作名与键
    ///
    /// 已经是 [`CacheError`] 的错误原样返回（补齐缺失的键）。
    pub fn from_error(
        operation: impl Into<String>,
        error: impl Into<anyhow::Error>,
        key: Option<&str>,
    ) -> Self {
        let error = error.into();
        let error = match error.downcast::<Self>() {
            Ok(existing) => {
                return match (existing.key(), key) {
                    (None, Some(key)) => existing.with_key(key),
                    _ => existing,
                };
            }
            Err(error) => error,
        };

        let message = format!("{error:#}");
        let kind = classify_message(&message);
        let classified = Self::new(kind, operation, message).with_source(error);
        match key {
            Some(key) => classified.with_key(key),
            None => classified,
        }
    }

    /// 分类存储层错误
    ///
    /// Redis 错误优先使用客户端提供的结构化标志，其余回退到文本规则。
    pub fn from_store(operation: impl Into<String>, error: StoreError, key: Option<&str>) -> Self {
        let kind = match &error {
            StoreError::Redis(redis_error) => {
                if redis_error.is_connection_refusal()
                    || redis_error.is_connection_dropped()
                    || (redis_error.is_io_error() && !redis_error.is_timeout())
                {
                    Some(ErrorKind::Connection)
                } else if redis_error.is_timeout() {
                    Some(ErrorKind::Timeout)
                } else {
                    None
                }
            }
            StoreError::Timeout(_) => Some(ErrorKind::Timeout),
            StoreError::Backend(_) => None,
        };

        match kind {
            Some(kind) => {
                let classified = Self::new(kind, operation, error.to_string()).with_source(error);
                match key {
                    Some(key) => classified.with_key(key),
                    None => classified,
                }
            }
            None => Self::from_error(operation, error, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ECONNREFUSED", ErrorKind::Connection)]
    #[case("connect ECONNREFUSED 127.0.0.1:6379", ErrorKind::Connection)]
    #[case("Connection reset by peer", ErrorKind::Connection)]
    #[case("timeout exceeded", ErrorKind::Timeout)]
    #[case("Operation timed out", ErrorKind::Timeout)]
    #[case("JSON parse error", ErrorKind::Serialization)]
    #[case("Unexpected token } in JSON at position 3", ErrorKind::Serialization)]
    #[case("could not acquire lock", ErrorKind::Lock)]
    #[case("WRONGTYPE Operation against a key holding the wrong kind of value", ErrorKind::Operation)]
    #[case("something odd happened", ErrorKind::Operation)]
    fn test_classify_message(#[case] message: &str, #[case] expected: ErrorKind) {
        assert_eq!(classify_message(message), expected);
    }

    #[test]
    fn test_connection_wins_over_timeout() {
        assert_eq!(
            classify_message("ECONNREFUSED after connect timeout"),
            ErrorKind::Connection
        );
    }

    #[test]
    fn test_from_error_attaches_context() {
        let err = CacheError::from_error("set", anyhow::anyhow!("ECONNREFUSED"), Some("US:AAPL"));
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.operation_name(), "set");
        assert_eq!(err.key(), Some("US:AAPL"));
    }

    #[test]
    fn test_from_error_passes_cache_error_through() {
        let original = CacheError::lock("acquire", "held elsewhere");
        let err = CacheError::from_error("get", original, Some("k"));
        assert_eq!(err.kind(), ErrorKind::Lock);
        assert_eq!(err.operation_name(), "acquire");
        assert_eq!(err.key(), Some("k"));
    }

    #[test]
    fn test_from_store_backend_uses_text_rules() {
        let err = CacheError::from_store(
            "get",
            StoreError::Backend("ERR value is not an integer or out of range".into()),
            Some("counter"),
        );
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert_eq!(err.key(), Some("counter"));
    }

    #[test]
    fn test_from_store_timeout() {
        let err = CacheError::from_store(
            "get",
            StoreError::Timeout(std::time::Duration::from_secs(5)),
            Some("k"),
        );
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.status_code(), 408);
    }

    #[test]
    fn test_from_store_redis_io_error_is_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CacheError::from_store("get", StoreError::Redis(redis::RedisError::from(io)), None);
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
