//! # TTL 分层策略
//!
//! 按数据的语义层级查表得到 TTL。表在引擎构造时从配置生成，之后不可变。

use std::fmt;
use std::time::Duration;

use crate::config::CacheConfig;

/// 数据层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlTier {
    /// 强时效数据（秒级）
    StrongTimeliness,
    /// 实时行情
    Realtime,
    /// 监控指标
    Monitoring,
    /// 认证数据
    Auth,
    /// 代码转换结果
    Transformer,
    /// 搜索建议
    Suggestion,
    /// 长期数据
    LongTerm,
    /// 默认层级
    Default,
}

impl TtlTier {
    /// 全部层级，按 TTL 由短到长的常见顺序排列
    pub const ALL: [Self; 8] = [
        Self::StrongTimeliness,
        Self::Realtime,
        Self::Monitoring,
        Self::Default,
        Self::Suggestion,
        Self::Auth,
        Self::Transformer,
        Self::LongTerm,
    ];

    /// 规范名称
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StrongTimeliness => "strong-timeliness",
            Self::Realtime => "realtime",
            Self::Monitoring => "monitoring",
            Self::Auth => "auth",
            Self::Transformer => "transformer",
            Self::Suggestion => "suggestion",
            Self::LongTerm => "long-term",
            Self::Default => "default",
        }
    }

    /// 按名称识别层级，接受常见别名；未知名称返回 `None`
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        let tier = match normalized.as_str() {
            "strong" | "strong-timeliness" | "strongtimeliness" => Self::StrongTimeliness,
            "realtime" | "real-time" => Self::Realtime,
            "monitoring" | "monitor" => Self::Monitoring,
            "auth" | "authentication" => Self::Auth,
            "transformer" | "transform" | "symbol-transformer" => Self::Transformer,
            "suggestion" | "suggestions" => Self::Suggestion,
            "long" | "long-term" | "longterm" => Self::LongTerm,
            "default" => Self::Default,
            _ => return None,
        };
        Some(tier)
    }
}

impl fmt::Display for TtlTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL 查找表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    default_ttl: u64,
    strong_timeliness: u64,
    realtime: u64,
    monitoring: u64,
    auth: u64,
    transformer: u64,
    suggestion: u64,
    long_term: u64,
}

impl TtlPolicy {
    #[must_use]
    pub const fn from_config(config: &CacheConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            strong_timeliness: config.strong_timeliness_ttl,
            realtime: config.realtime_ttl,
            monitoring: config.monitoring_ttl,
            auth: config.auth_ttl,
            transformer: config.transformer_ttl,
            suggestion: config.suggestion_ttl,
            long_term: config.long_term_ttl,
        }
    }

    /// 层级对应的秒数
    #[must_use]
    pub const fn seconds(&self, tier: TtlTier) -> u64 {
        match tier {
            TtlTier::StrongTimeliness => self.strong_timeliness,
            TtlTier::Realtime => self.realtime,
            TtlTier::Monitoring => self.monitoring,
            TtlTier::Auth => self.auth,
            TtlTier::Transformer => self.transformer,
            TtlTier::Suggestion => self.suggestion,
            TtlTier::LongTerm => self.long_term,
            TtlTier::Default => self.default_ttl,
        }
    }

    /// 按层级名称解析 TTL，未知名称回落到 `default_ttl`
    #[must_use]
    pub fn resolve(&self, tier_name: &str) -> u64 {
        TtlTier::from_name(tier_name).map_or(self.default_ttl, |tier| self.seconds(tier))
    }

    /// 获取 Duration
    #[must_use]
    pub fn resolve_duration(&self, tier_name: &str) -> Duration {
        Duration::from_secs(self.resolve(tier_name))
    }

    #[must_use]
    pub const fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    /// 全部层级与秒数
    #[must_use]
    pub fn entries(&self) -> Vec<(TtlTier, u64)> {
        TtlTier::ALL
            .iter()
            .map(|tier| (*tier, self.seconds(*tier)))
            .collect()
    }
}
