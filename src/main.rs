//! # Market Cache 命令行
//!
//! 运维用的缓存检查工具：连通性检查、读取、删除、按模式清理和 TTL 层级查看

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use market_cache::{
    CacheEngine, Encoding, linfo,
    cache::keys,
    config::{self, AppConfig, RedisConfig, StoreType},
    logging::{self, LogComponent, LogStage},
};

#[derive(Debug, Parser)]
#[command(name = "market-cache", version, about = "行情缓存引擎运维工具")]
struct Cli {
    /// 配置文件路径（默认读取 MARKET_CACHE_CONFIG 或 config/config.{RUST_ENV}.toml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志级别
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 检查存储连通性
    Ping,
    /// 读取并解码一个键
    Get {
        key: String,
        /// 解码器：json 或 msgpack
        #[arg(long, default_value = "json")]
        decoder: String,
    },
    /// 删除一个或多个键
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// 按 glob 模式删除
    Purge { pattern: String },
    /// 打印 TTL 层级表
    Tiers,
    /// 把任意字符串规范化为键片段
    Normalize { raw: String },
    /// 打印日志配置说明
    LogHelp,
}

fn load(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut app = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    if let Some(level) = &cli.log_level {
        app.log_level = Some(level.clone());
    }
    Ok(app)
}

async fn connect(app: &AppConfig) -> anyhow::Result<CacheEngine> {
    Ok(CacheEngine::connect(app).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Normalize { raw } => {
            println!("{}", keys::normalize(raw));
            return Ok(());
        }
        Command::LogHelp => {
            logging::print_logging_help();
            return Ok(());
        }
        _ => {}
    }

    let app = load(&cli)?;
    logging::init_logging(app.log_level.as_deref());

    match &cli.command {
        Command::Tiers => {
            let policy = market_cache::cache::TtlPolicy::from_config(&app.cache);
            for (tier, seconds) in policy.entries() {
                println!("{tier:<18} {seconds}s");
            }
        }
        Command::Ping => {
            let engine = connect(&app).await?;
            engine.ping().await?;
            let target = app
                .redis
                .as_ref()
                .filter(|_| app.store == StoreType::Redis)
                .map_or_else(|| "memory".to_string(), RedisConfig::display_address);
            println!("PONG ({target})");
            engine.shutdown().await?;
        }
        Command::Get { key, decoder } => {
            let encoding: Encoding = decoder.parse()?;
            let engine = connect(&app).await?;
            match engine.get_with::<Value>(key, encoding).await? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("(nil)"),
            }
            engine.shutdown().await?;
        }
        Command::Delete { keys } => {
            let engine = connect(&app).await?;
            let deleted = engine.delete_many(keys).await?;
            println!("deleted {deleted}");
            engine.shutdown().await?;
        }
        Command::Purge { pattern } => {
            let engine = connect(&app).await?;
            let deleted = engine.delete_by_pattern(pattern).await?;
            linfo!(
                "system",
                LogStage::Cache,
                LogComponent::Main,
                "purge",
                &format!("按模式清理完成: {pattern} -> {deleted}")
            );
            println!("deleted {deleted}");
            engine.shutdown().await?;
        }
        Command::Normalize { .. } | Command::LogHelp => {}
    }

    Ok(())
}
