//! # 日志配置模块
//!
//! 提供结构化日志宏以及 `tracing` 订阅器的初始化

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志阶段，标识事件发生在生命周期的哪个环节
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    /// 启动
    Startup,
    /// 关闭
    Shutdown,
    /// 配置加载
    Config,
    /// 缓存读写
    Cache,
    /// 分布式锁
    Lock,
    /// 容错降级
    Fallback,
}

impl LogStage {
    /// 字段值
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Config => "config",
            Self::Cache => "cache",
            Self::Lock => "lock",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志组件，标识事件来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    /// 命令行入口
    Main,
    /// 配置
    Config,
    /// 缓存引擎
    Engine,
    /// 存储后端
    Store,
    /// 容错门面
    Facade,
}

impl LogComponent {
    /// 字段值
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Engine => "engine",
            Self::Store => "store",
            Self::Facade => "facade",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 输出 info 级别的结构化日志
#[macro_export]
macro_rules! linfo {
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr $(,)?) => {
        ::tracing::info!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            "{}",
            $msg
        )
    };
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr, $($fields:tt)+) => {
        ::tracing::info!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($fields)+,
            "{}",
            $msg
        )
    };
}

/// 输出 debug 级别的结构化日志
#[macro_export]
macro_rules! ldebug {
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr $(,)?) => {
        ::tracing::debug!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            "{}",
            $msg
        )
    };
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr, $($fields:tt)+) => {
        ::tracing::debug!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($fields)+,
            "{}",
            $msg
        )
    };
}

/// 输出 warn 级别的结构化日志
#[macro_export]
macro_rules! lwarn {
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr $(,)?) => {
        ::tracing::warn!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            "{}",
            $msg
        )
    };
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr, $($fields:tt)+) => {
        ::tracing::warn!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($fields)+,
            "{}",
            $msg
        )
    };
}

/// 输出 error 级别的结构化日志
#[macro_export]
macro_rules! lerror {
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr $(,)?) => {
        ::tracing::error!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            "{}",
            $msg
        )
    };
    ($scope:expr, $stage:expr, $component:expr, $operation:expr, $msg:expr, $($fields:tt)+) => {
        ::tracing::error!(
            scope = %$scope,
            stage = %$stage,
            component = %$component,
            operation = %$operation,
            $($fields)+,
            "{}",
            $msg
        )
    };
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先；未设置时使用 `{level},market_cache=debug`。
/// 重复初始化（例如测试中）会被静默忽略。
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let default_filter = format!("{level},market_cache=debug,redis=warn");

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let initialized = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .is_ok();

    if initialized && env::var("RUST_LOG").is_ok() {
        tracing::debug!("日志过滤规则来自 RUST_LOG");
    }
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                        # 标准日志级别");
    println!("  RUST_LOG=debug                       # 调试级别，包含每次命中/未命中");
    println!("  RUST_LOG=info,market_cache=trace     # 缓存引擎详细追踪");
    println!("  RUST_LOG=info,redis=debug            # Redis 客户端调试");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_component_display() {
        assert_eq!(LogStage::Cache.to_string(), "cache");
        assert_eq!(LogStage::Fallback.to_string(), "fallback");
        assert_eq!(LogComponent::Facade.to_string(), "facade");
        assert_eq!(LogComponent::Store.as_str(), "store");
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Some("debug"));
        init_logging(None);
        crate::linfo!("test", LogStage::Startup, LogComponent::Main, "init_twice", "ok");
        crate::ldebug!(
            "test",
            LogStage::Cache,
            LogComponent::Engine,
            "with_fields",
            "fields",
            key = "a:b",
            elapsed_ms = 3_u64
        );
    }
}
