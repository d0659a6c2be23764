//! # 配置加载集成测试

use std::io::Write;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use market_cache::config::{self, SingleFlightMode, StoreType};
use market_cache::error::ConfigError;

const FULL_CACHE_SECTION: &str = r#"
[cache]
default_ttl = 300
strong_timeliness_ttl = 5
realtime_ttl = 30
monitoring_ttl = 60
auth_ttl = 900
transformer_ttl = 1800
suggestion_ttl = 600
long_term_ttl = 3600
compression_enabled = true
compression_threshold = 1024
max_key_length = 250
max_value_size_mb = 10
max_batch_size = 100
slow_operation_ms = 100
retry_delay_ms = 100
lock_ttl = 30
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("创建临时文件失败");
    file.write_all(content.as_bytes()).expect("写入临时文件失败");
    file
}

#[test]
fn test_load_memory_config_from_file() {
    let file = write_config(&format!("store = \"memory\"\n{FULL_CACHE_SECTION}"));
    let app = config::load_config_from(file.path()).unwrap();

    assert_eq!(app.store, StoreType::Memory);
    assert_eq!(app.cache.strong_timeliness_ttl, 5);
    assert_eq!(app.cache.single_flight, SingleFlightMode::Off);
    assert!(app.redis.is_none());
}

#[test]
fn test_missing_file_is_load_error() {
    let err = config::load_config_from("/nonexistent/market-cache.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn test_missing_cache_key_is_fatal() {
    let partial = FULL_CACHE_SECTION.replace("lock_ttl = 30\n", "");
    let err = config::parse_config(&format!("store = \"memory\"\n{partial}")).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "unexpected error: {err:?}");
    assert!(err.to_string().contains("lock_ttl"));
}

#[test]
fn test_zero_ttl_is_rejected() {
    let broken = FULL_CACHE_SECTION.replace("realtime_ttl = 30", "realtime_ttl = 0");
    let err = config::parse_config(&format!("store = \"memory\"\n{broken}")).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "realtime_ttl", .. }));
}

#[test]
fn test_camel_case_keys_are_accepted() {
    let content = r#"
store = "memory"

[cache]
defaultTtl = 120
strongTimelinessTtl = 5
realtimeTtl = 30
monitoringTtl = 60
authTtl = 900
transformerTtl = 1800
suggestionTtl = 600
longTermTtl = 3600
compressionEnabled = false
compressionThreshold = 1024
maxKeyLength = 200
maxValueSizeMB = 5
maxBatchSize = 50
slowOperationMs = 100
retryDelayMs = 100
lockTtl = 15
singleFlight = "local"
"#;
    let app = config::parse_config(content).unwrap();
    assert_eq!(app.cache.default_ttl, 120);
    assert_eq!(app.cache.max_key_length, 200);
    assert_eq!(app.cache.max_value_size_mb, 5);
    assert_eq!(app.cache.single_flight, SingleFlightMode::Local);
    assert!(!app.cache.compression_enabled);
}

#[test]
fn test_redis_store_requires_section() {
    let err = config::parse_config(&format!("store = \"redis\"\n{FULL_CACHE_SECTION}")).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "redis", .. }));

    let content = format!(
        "store = \"redis\"\n{FULL_CACHE_SECTION}\n[redis]\nhost = \"cache.internal\"\nport = 6380\n"
    );
    let app = config::parse_config(&content).unwrap();
    let redis = app.redis.expect("redis 配置缺失");
    assert_eq!(redis.build_url(), "redis://cache.internal:6380/0");
    assert_eq!(redis.response_timeout, 5);
}

#[test]
fn test_env_overrides_after_file() {
    let file = write_config(&format!("store = \"memory\"\n{FULL_CACHE_SECTION}"));
    let mut app = config::load_config_from(file.path()).unwrap();

    config::apply_env_overrides(
        &mut app,
        vec![
            ("MARKET_CACHE_CACHE_LOCK_TTL".to_string(), "45".to_string()),
            ("MARKET_CACHE_CACHE_SINGLE_FLIGHT".to_string(), "distributed".to_string()),
        ],
    )
    .unwrap();
    app.validate().unwrap();

    assert_eq!(app.cache.lock_ttl, 45);
    assert_eq!(app.cache.single_flight, SingleFlightMode::Distributed);
}

#[test]
fn test_bundled_dev_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.dev.toml");
    let app = config::load_config_from(path).unwrap();
    assert_eq!(app.store, StoreType::Memory);
}
