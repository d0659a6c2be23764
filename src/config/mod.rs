//! # 配置管理模块
//!
//! 处理应用配置加载、环境变量覆盖和验证

mod app_config;

pub use app_config::{AppConfig, CacheConfig, RedisConfig, SingleFlightMode, StoreType};

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lwarn};

/// 环境变量覆盖前缀
pub const ENV_PREFIX: &str = "MARKET_CACHE_";

/// 显式指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "MARKET_CACHE_CONFIG";

/// 解析默认配置文件路径
///
/// `MARKET_CACHE_CONFIG` 优先，否则使用 `config/config.{RUST_ENV}.toml`（默认 `dev`）。
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 加载配置文件并应用环境变量覆盖
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = default_config_path();
    let mut config = read_config_file(&path)?;
    apply_env_overrides(
        &mut config,
        env::vars().filter(|(key, _)| key != CONFIG_PATH_ENV),
    )?;
    config.validate()?;
    Ok(config)
}

/// 从指定路径加载配置（不读取环境变量）
pub fn load_config_from(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let config = read_config_file(path.as_ref())?;
    config.validate()?;
    Ok(config)
}

/// 解析 TOML 文本并验证
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Load(format!(
            "配置文件不存在: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("读取配置文件失败: {}: {e}", path.display())))?;

    ldebug!(
        "system",
        LogStage::Config,
        LogComponent::Config,
        "read_config",
        &format!("读取配置文件: {}", path.display())
    );

    Ok(toml::from_str(&content)?)
}

/// 应用 `MARKET_CACHE_*` 环境变量覆盖
///
/// `MARKET_CACHE_CACHE_DEFAULT_TTL=60` 覆盖 `cache.default_ttl`，
/// `MARKET_CACHE_STORE=memory` 覆盖顶层 `store`。未识别的变量只记录警告。
pub fn apply_env_overrides<I>(config: &mut AppConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(path) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path = path.to_lowercase();
        apply_override(config, &path, &value)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Override {
        path: path.to_string(),
        value: value.to_string(),
    })
}

fn apply_override(config: &mut AppConfig, path: &str, value: &str) -> Result<(), ConfigError> {
    match path {
        "store" => {
            config.store = parse_value(path, value)?;
            return Ok(());
        }
        "log_level" => {
            config.log_level = Some(value.to_string());
            return Ok(());
        }
        _ => {}
    }

    let Some((section, field)) = path.split_once('_') else {
        warn_unknown(path);
        return Ok(());
    };
    let dotted = format!("{section}.{field}");

    match (section, field) {
        ("cache", _) => apply_cache_override(&mut config.cache, &dotted, field, value),
        ("redis", _) => {
            let redis = config.redis.get_or_insert_with(RedisConfig::default);
            apply_redis_override(redis, &dotted, field, value)
        }
        _ => {
            warn_unknown(&dotted);
            Ok(())
        }
    }
}

fn apply_cache_override(
    cache: &mut CacheConfig,
    path: &str,
    field: &str,
    value: &str,
) -> Result<(), ConfigError> {
    match field {
        "default_ttl" => cache.default_ttl = parse_value(path, value)?,
        "strong_timeliness_ttl" => cache.strong_timeliness_ttl = parse_value(path, value)?,
        "realtime_ttl" => cache.realtime_ttl = parse_value(path, value)?,
        "monitoring_ttl" => cache.monitoring_ttl = parse_value(path, value)?,
        "auth_ttl" => cache.auth_ttl = parse_value(path, value)?,
        "transformer_ttl" => cache.transformer_ttl = parse_value(path, value)?,
        "suggestion_ttl" => cache.suggestion_ttl = parse_value(path, value)?,
        "long_term_ttl" => cache.long_term_ttl = parse_value(path, value)?,
        "compression_enabled" => cache.compression_enabled = parse_value(path, value)?,
        "compression_threshold" => cache.compression_threshold = parse_value(path, value)?,
        "max_key_length" => cache.max_key_length = parse_value(path, value)?,
        "max_value_size_mb" => cache.max_value_size_mb = parse_value(path, value)?,
        "max_batch_size" => cache.max_batch_size = parse_value(path, value)?,
        "slow_operation_ms" => cache.slow_operation_ms = parse_value(path, value)?,
        "retry_delay_ms" => cache.retry_delay_ms = parse_value(path, value)?,
        "lock_ttl" => cache.lock_ttl = parse_value(path, value)?,
        "single_flight" => cache.single_flight = parse_value(path, value)?,
        _ => warn_unknown(path),
    }
    Ok(())
}

fn apply_redis_override(
    redis: &mut RedisConfig,
    path: &str,
    field: &str,
    value: &str,
) -> Result<(), ConfigError> {
    match field {
        "url" => redis.url = Some(value.to_string()),
        "host" => redis.host = value.to_string(),
        "port" => redis.port = parse_value(path, value)?,
        "database" => redis.database = parse_value(path, value)?,
        "password" => redis.password = Some(value.to_string()),
        "connection_timeout" => redis.connection_timeout = parse_value(path, value)?,
        "response_timeout" => redis.response_timeout = parse_value(path, value)?,
        _ => warn_unknown(path),
    }
    Ok(())
}

fn warn_unknown(path: &str) {
    lwarn!(
        "system",
        LogStage::Config,
        LogComponent::Config,
        "env_override",
        &format!("忽略未知的配置覆盖: {path}")
    );
}
