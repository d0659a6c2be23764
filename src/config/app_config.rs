//! # 应用配置结构定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// 应用主配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 存储后端类型
    #[serde(default)]
    pub store: StoreType,
    /// 缓存引擎配置
    pub cache: CacheConfig,
    /// Redis 配置（`store = "redis"` 时必填）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
    /// 日志级别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// 存储后端类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Redis 远程存储
    #[default]
    Redis,
    /// 进程内存储（本地开发与测试）
    Memory,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("未知的存储类型: {other}")),
        }
    }
}

/// 缓存未命中时的并发计算策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SingleFlightMode {
    /// 不做合并，并发未命中会各自计算
    #[default]
    Off,
    /// 进程内按键串行
    Local,
    /// 通过分布式咨询锁跨实例串行
    Distributed,
}

impl FromStr for SingleFlightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "false" => Ok(Self::Off),
            "local" => Ok(Self::Local),
            "distributed" | "lock" => Ok(Self::Distributed),
            other => Err(format!("未知的 single_flight 模式: {other}")),
        }
    }
}

impl fmt::Display for SingleFlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Local => "local",
            Self::Distributed => "distributed",
        })
    }
}

/// 缓存引擎配置
///
/// 除 `single_flight` 外全部为必填项；缺失任何一项时配置加载失败，引擎拒绝启动。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 默认 TTL（秒），未知层级回落到此值
    #[serde(alias = "defaultTtl")]
    pub default_ttl: u64,
    /// 强时效数据 TTL（秒）
    #[serde(alias = "strongTimelinessTtl")]
    pub strong_timeliness_ttl: u64,
    /// 实时行情 TTL（秒）
    #[serde(alias = "realtimeTtl")]
    pub realtime_ttl: u64,
    /// 监控数据 TTL（秒）
    #[serde(alias = "monitoringTtl")]
    pub monitoring_ttl: u64,
    /// 认证数据 TTL（秒）
    #[serde(alias = "authTtl")]
    pub auth_ttl: u64,
    /// 代码转换结果 TTL（秒）
    #[serde(alias = "transformerTtl")]
    pub transformer_ttl: u64,
    /// 搜索建议 TTL（秒）
    #[serde(alias = "suggestionTtl")]
    pub suggestion_ttl: u64,
    /// 长期数据 TTL（秒）
    #[serde(alias = "longTermTtl")]
    pub long_term_ttl: u64,
    /// 是否启用压缩
    #[serde(alias = "compressionEnabled")]
    pub compression_enabled: bool,
    /// 压缩阈值（字节），严格大于时压缩
    #[serde(alias = "compressionThreshold")]
    pub compression_threshold: usize,
    /// 键最大长度（字节）
    #[serde(alias = "maxKeyLength")]
    pub max_key_length: usize,
    /// 单个值最大尺寸（MB）
    #[serde(alias = "maxValueSizeMB", alias = "maxValueSizeMb")]
    pub max_value_size_mb: u64,
    /// 批量操作最大条目数
    #[serde(alias = "maxBatchSize")]
    pub max_batch_size: usize,
    /// 慢操作阈值（毫秒），仅用于日志与统计
    #[serde(alias = "slowOperationMs")]
    pub slow_operation_ms: u64,
    /// 调用方重试间隔建议（毫秒），引擎自身不重试
    #[serde(alias = "retryDelayMs")]
    pub retry_delay_ms: u64,
    /// 咨询锁默认 TTL（秒）
    #[serde(alias = "lockTtl")]
    pub lock_ttl: u64,
    /// 未命中时的并发计算策略
    #[serde(default, alias = "singleFlight")]
    pub single_flight: SingleFlightMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: 300,
            strong_timeliness_ttl: 5,
            realtime_ttl: 30,
            monitoring_ttl: 60,
            auth_ttl: 900,
            transformer_ttl: 1800,
            suggestion_ttl: 600,
            long_term_ttl: 3600,
            compression_enabled: true,
            compression_threshold: 1024,
            max_key_length: 250,
            max_value_size_mb: 10,
            max_batch_size: 100,
            slow_operation_ms: 100,
            retry_delay_ms: 100,
            lock_ttl: 30,
            single_flight: SingleFlightMode::Off,
        }
    }
}

impl CacheConfig {
    /// 单个值最大字节数
    #[must_use]
    pub fn max_value_bytes(&self) -> usize {
        usize::try_from(self.max_value_size_mb)
            .unwrap_or(usize::MAX)
            .saturating_mul(1024 * 1024)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, u64); 12] = [
            ("default_ttl", self.default_ttl),
            ("strong_timeliness_ttl", self.strong_timeliness_ttl),
            ("realtime_ttl", self.realtime_ttl),
            ("monitoring_ttl", self.monitoring_ttl),
            ("auth_ttl", self.auth_ttl),
            ("transformer_ttl", self.transformer_ttl),
            ("suggestion_ttl", self.suggestion_ttl),
            ("long_term_ttl", self.long_term_ttl),
            ("max_key_length", self.max_key_length as u64),
            ("max_value_size_mb", self.max_value_size_mb),
            ("max_batch_size", self.max_batch_size as u64),
            ("lock_ttl", self.lock_ttl),
        ];

        if let Some(&(field, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::invalid(field, "必须大于 0"));
        }

        if self.compression_enabled && self.compression_threshold == 0 {
            return Err(ConfigError::invalid(
                "compression_threshold",
                "启用压缩时阈值必须大于 0",
            ));
        }

        if self.single_flight == SingleFlightMode::Distributed && self.retry_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "retry_delay_ms",
                "single_flight = \"distributed\" 时轮询间隔必须大于 0",
            ));
        }

        Ok(())
    }
}

/// Redis 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis 连接 URL，设置后优先于 host/port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Redis 服务器地址
    #[serde(default = "default_host")]
    pub host: String,
    /// Redis 服务器端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 数据库编号
    #[serde(default)]
    pub database: u8,
    /// 连接密码（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// 连接超时时间（秒）
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// 响应超时时间（秒）
    #[serde(default = "default_response_timeout")]
    pub response_timeout: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    6379
}

const fn default_connection_timeout() -> u64 {
    10
}

const fn default_response_timeout() -> u64 {
    5
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_host(),
            port: default_port(),
            database: 0,
            password: None,
            connection_timeout: default_connection_timeout(),
            response_timeout: default_response_timeout(),
        }
    }
}

impl RedisConfig {
    /// 构建 Redis 连接 URL
    #[must_use]
    pub fn build_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|url| !url.is_empty()) {
            return url.to_string();
        }
        if let Some(password) = &self.password {
            format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            )
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }

    /// 用于日志输出的地址（隐藏密码）
    #[must_use]
    pub fn display_address(&self) -> String {
        match self.url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => url
                .rsplit_once('@')
                .map_or_else(|| url.to_string(), |(_, host)| format!("redis://***@{host}")),
            None => format!("{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl AppConfig {
    /// 以进程内存储和默认缓存参数构建配置（本地开发与测试）
    #[must_use]
    pub fn in_memory(cache: CacheConfig) -> Self {
        Self {
            store: StoreType::Memory,
            cache,
            redis: None,
            log_level: None,
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;

        match self.store {
            StoreType::Memory => Ok(()),
            StoreType::Redis => {
                let redis = self
                    .redis
                    .as_ref()
                    .ok_or_else(|| ConfigError::invalid("redis", "store = \"redis\" 时必须提供 [redis] 配置"))?;

                if redis.host.is_empty() && redis.url.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::invalid("redis.url", "Redis 地址不能为空"));
                }
                if redis.connection_timeout == 0 {
                    return Err(ConfigError::invalid("redis.connection_timeout", "必须大于 0"));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cache_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
        assert_eq!(CacheConfig::default().max_value_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_huge_value_limit_saturates() {
        let config = CacheConfig {
            max_value_size_mb: u64::MAX,
            ..CacheConfig::default()
        };
        assert_eq!(config.max_value_bytes(), usize::MAX);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let config = CacheConfig {
            max_batch_size: 0,
            ..CacheConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_batch_size"));

        let config = CacheConfig {
            compression_threshold: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            compression_enabled: false,
            compression_threshold: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redis_store_requires_redis_section() {
        let mut config = AppConfig::in_memory(CacheConfig::default());
        assert!(config.validate().is_ok());

        config.store = StoreType::Redis;
        assert!(config.validate().is_err());

        config.redis = Some(RedisConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_build_url() {
        let mut redis = RedisConfig::default();
        assert_eq!(redis.build_url(), "redis://127.0.0.1:6379/0");

        redis.password = Some("secret".to_string());
        redis.database = 2;
        assert_eq!(redis.build_url(), "redis://:secret@127.0.0.1:6379/2");

        redis.url = Some("redis://:pw@cache.internal:6380/1".to_string());
        assert_eq!(redis.build_url(), "redis://:pw@cache.internal:6380/1");
        assert_eq!(redis.display_address(), "redis://***@cache.internal:6380/1");
    }

    #[test]
    fn test_single_flight_mode_parsing() {
        assert_eq!("LOCAL".parse::<SingleFlightMode>(), Ok(SingleFlightMode::Local));
        assert_eq!("lock".parse::<SingleFlightMode>(), Ok(SingleFlightMode::Distributed));
        assert!("sometimes".parse::<SingleFlightMode>().is_err());
        assert_eq!(SingleFlightMode::Distributed.to_string(), "distributed");
    }
}
