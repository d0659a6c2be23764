//! # 缓存键命名规范
//!
//! 统一的缓存键生成、校验与规范化。键的形式为 `prefix:part1:part2:...`。

use std::fmt;

use sha2::{Digest, Sha256};

use super::ttl::TtlTier;
use crate::error::{CacheError, Result, ValidationKind};

/// 键分隔符
pub const SEPARATOR: char = ':';

/// 键构建与校验器
#[derive(Debug, Clone, Copy)]
pub struct KeyBuilder {
    max_key_length: usize,
}

impl KeyBuilder {
    #[must_use]
    pub const fn new(max_key_length: usize) -> Self {
        Self { max_key_length }
    }

    #[must_use]
    pub const fn max_key_length(&self) -> usize {
        self.max_key_length
    }

    /// 由前缀和有序片段组成缓存键
    ///
    /// `None` 片段被丢弃；末尾的空字符串也被丢弃，夹在两个非空片段之间的空字符串原样保留。
    pub fn build(&self, prefix: &str, parts: &[Option<&str>]) -> Result<String> {
        if prefix.is_empty() {
            return Err(CacheError::validation(
                "build_key",
                ValidationKind::KeyFormat,
                "缓存键前缀不能为空",
            ));
        }

        let mut surviving: Vec<&str> = parts.iter().flatten().copied().collect();
        while surviving.last().is_some_and(|part| part.is_empty()) {
            surviving.pop();
        }

        let mut key = String::with_capacity(
            prefix.len() + surviving.iter().map(|part| part.len() + 1).sum::<usize>(),
        );
        key.push_str(prefix);
        for part in surviving {
            key.push(SEPARATOR);
            key.push_str(part);
        }

        self.validate("build_key", &key)?;
        Ok(key)
    }

    /// 所有片段都存在时的便捷形式
    pub fn join<S: AsRef<str>>(&self, prefix: &str, parts: &[S]) -> Result<String> {
        let parts: Vec<Option<&str>> = parts.iter().map(|part| Some(part.as_ref())).collect();
        self.build(prefix, &parts)
    }

    /// 校验键，失败时返回带操作名的校验错误
    pub fn validate(&self, operation: &str, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::validation(
                operation,
                ValidationKind::KeyFormat,
                "缓存键不能为空",
            ));
        }
        if key.len() > self.max_key_length {
            return Err(CacheError::validation(
                operation,
                ValidationKind::KeyLength,
                format!("缓存键长度 {} 超过上限 {}", key.len(), self.max_key_length),
            )
            .with_key(truncate_for_log(key)));
        }
        if let Some(bad) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::validation(
                operation,
                ValidationKind::KeyFormat,
                format!("缓存键包含非法字符 {bad:?}"),
            )
            .with_key(key));
        }
        Ok(())
    }

    /// 纯判断，不产生错误
    #[must_use]
    pub fn is_valid(&self, key: &str) -> bool {
        self.validate("is_valid", key).is_ok()
    }
}

fn truncate_for_log(key: &str) -> String {
    const MAX: usize = 64;
    match key.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &key[..idx]),
        None => key.to_string(),
    }
}

/// 解析后的缓存键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub prefix: String,
    pub parts: Vec<String>,
}

/// 在第一个 `:` 处拆分前缀，其余部分按 `:` 拆分（保留空片段）
#[must_use]
pub fn parse(key: &str) -> ParsedKey {
    match key.split_once(SEPARATOR) {
        Some((prefix, rest)) => ParsedKey {
            prefix: prefix.to_string(),
            parts: rest.split(SEPARATOR).map(str::to_string).collect(),
        },
        None => ParsedKey {
            prefix: key.to_string(),
            parts: Vec::new(),
        },
    }
}

/// 把任意字符串规范化为可用的键片段
///
/// 转小写，连续空白替换为单个 `_`，只保留 ASCII 字母数字和 `-_.:`。
#[must_use]
pub fn normalize(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut in_whitespace = false;
    for c in raw.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                normalized.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        normalized.extend(
            c.to_lowercase()
                .filter(|lower| lower.is_ascii_alphanumeric() || matches!(*lower, '-' | '_' | '.' | ':')),
        );
    }
    normalized
}

/// 行情键的通配模式，缺省的片段替换为 `*`
#[must_use]
pub fn quote_pattern(
    market: Option<&str>,
    provider: Option<&str>,
    method: Option<&str>,
    symbol: Option<&str>,
) -> String {
    [market, provider, method, symbol]
        .iter()
        .map(|part| part.unwrap_or("*"))
        .collect::<Vec<_>>()
        .join(":")
}

/// 业务域缓存键
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
    /// 股票行情 - `{market}:{provider}:{method}:{symbol}`
    StockQuote {
        market: String,
        provider: String,
        method: String,
        symbol: String,
    },

    /// 查询结果 - `query:{query_type}:{fingerprint}`
    QueryResult {
        query_type: String,
        fingerprint: String,
    },

    /// 代码转换结果 - `transformer:{market}:{symbol}`
    SymbolTransform { market: String, symbol: String },

    /// 认证令牌 - `auth:token:{sha256(token)}`
    AuthToken { token_hash: String },

    /// 认证会话 - `auth:session:{user_id}:{session_id}`
    AuthSession { user_id: String, session_id: String },

    /// 速率限制计数 - `ratelimit:{subject}:{endpoint}`
    RateLimit { subject: String, endpoint: String },

    /// 搜索建议 - `suggestion:{query}`
    Suggestion { query: String },

    /// 监控指标 - `monitoring:{metric}:{window}`
    Monitoring { metric: String, window: String },

    /// 自定义键 - `custom:{prefix}:{key}`
    Custom { prefix: String, key: String },
}

impl CacheKey {
    /// 生成缓存键字符串
    #[must_use]
    pub fn build(&self) -> String {
        match self {
            Self::StockQuote {
                market,
                provider,
                method,
                symbol,
            } => format!("{market}:{provider}:{method}:{symbol}"),
            Self::QueryResult {
                query_type,
                fingerprint,
            } => format!("query:{query_type}:{fingerprint}"),
            Self::SymbolTransform { market, symbol } => {
                format!("transformer:{market}:{symbol}")
            }
            Self::AuthToken { token_hash } => format!("auth:token:{token_hash}"),
            Self::AuthSession {
                user_id,
                session_id,
            } => format!("auth:session:{user_id}:{session_id}"),
            Self::RateLimit { subject, endpoint } => {
                format!("ratelimit:{subject}:{}", sanitize_endpoint(endpoint))
            }
            Self::Suggestion { query } => format!("suggestion:{}", normalize(query)),
            Self::Monitoring { metric, window } => format!("monitoring:{metric}:{window}"),
            Self::Custom { prefix, key } => format!("custom:{prefix}:{key}"),
        }
    }

    /// 获取缓存键的模式（用于按模式删除）
    #[must_use]
    pub fn pattern(&self) -> String {
        match self {
            Self::StockQuote { symbol, .. } => quote_pattern(None, None, None, Some(symbol)),
            Self::QueryResult { query_type, .. } => format!("query:{query_type}:*"),
            Self::SymbolTransform { market, .. } => format!("transformer:{market}:*"),
            Self::AuthToken { .. } => "auth:token:*".to_string(),
            Self::AuthSession { user_id, .. } => format!("auth:session:{user_id}:*"),
            Self::RateLimit { subject, .. } => format!("ratelimit:{subject}:*"),
            Self::Suggestion { .. } => "suggestion:*".to_string(),
            Self::Monitoring { metric, .. } => format!("monitoring:{metric}:*"),
            Self::Custom { prefix, .. } => format!("custom:{prefix}:*"),
        }
    }

    /// 获取缓存键的命名空间
    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        match self {
            Self::StockQuote { .. } => "quote",
            Self::QueryResult { .. } => "query",
            Self::SymbolTransform { .. } => "transformer",
            Self::AuthToken { .. } | Self::AuthSession { .. } => "auth",
            Self::RateLimit { .. } => "ratelimit",
            Self::Suggestion { .. } => "suggestion",
            Self::Monitoring { .. } => "monitoring",
            Self::Custom { .. } => "custom",
        }
    }

    /// 该类数据对应的 TTL 层级
    #[must_use]
    pub const fn tier(&self) -> TtlTier {
        match self {
            Self::StockQuote { .. } => TtlTier::Realtime,
            Self::QueryResult { .. } => TtlTier::StrongTimeliness,
            Self::SymbolTransform { .. } => TtlTier::Transformer,
            Self::AuthToken { .. } | Self::AuthSession { .. } => TtlTier::Auth,
            Self::RateLimit { .. } | Self::Monitoring { .. } => TtlTier::Monitoring,
            Self::Suggestion { .. } => TtlTier::Suggestion,
            Self::Custom { .. } => TtlTier::Default,
        }
    }

    /// 构建行情键
    #[must_use]
    pub fn stock_quote(market: &str, provider: &str, method: &str, symbol: &str) -> Self {
        Self::StockQuote {
            market: market.to_string(),
            provider: provider.to_string(),
            method: method.to_string(),
            symbol: symbol.to_string(),
        }
    }

    /// 构建认证令牌键，只保存令牌的 SHA-256 摘要
    #[must_use]
    pub fn auth_token(raw_token: &str) -> Self {
        Self::AuthToken {
            token_hash: hex::encode(Sha256::digest(raw_token.as_bytes())),
        }
    }

    /// 构建速率限制键
    #[must_use]
    pub fn rate_limit(subject: &str, endpoint: &str) -> Self {
        Self::RateLimit {
            subject: subject.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    /// 构建自定义键
    #[must_use]
    pub fn custom(prefix: &str, key: &str) -> Self {
        Self::Custom {
            prefix: prefix.to_string(),
            key: key.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.build())
    }
}

/// 清理端点名称，确保可以安全用作缓存键
fn sanitize_endpoint(endpoint: &str) -> String {
    endpoint
        .replace(['/', ':', '?', '&', '='], "_")
        .to_lowercase()
}
