use thiserror::Error;

use super::CacheError;

/// 配置加载与校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置文件不存在或无法读取
    #[error("配置加载失败: {0}")]
    Load(String),

    /// TOML 解析失败（包括缺失必填项）
    #[error("配置解析失败: {0}")]
    Parse(#[from] toml::de::Error),

    /// 环境变量覆盖值无法解析
    #[error("环境变量覆盖无效: {path} = {value}")]
    Override {
        /// 配置路径，例如 `cache.default_ttl`
        path: String,
        /// 原始值
        value: String,
    },

    /// 配置值不合法
    #[error("配置无效: {field}: {message}")]
    Invalid {
        /// 字段名
        field: &'static str,
        /// 描述
        message: String,
    },
}

impl ConfigError {
    /// 便捷构造函数
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// 引擎启动失败：配置错误或无法连接存储
#[derive(Debug, Error)]
pub enum StartupError {
    /// 配置错误
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 存储连接错误
    #[error(transparent)]
    Store(#[from] CacheError),
}
