//! # 分布式咨询锁
//!
//! 锁就是一个带 TTL 的键 `lock:{key}`，用 `SET NX EX` 原子获取，值是持有者令牌。
//! 释放时只删除令牌匹配的锁，过期后被别人拿走的锁不会被误删。
//! 存储本身不强制互斥，只有遵守约定的调用者之间才互斥。

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use super::engine::{CacheEngine, SetOptions};
use crate::error::{CacheError, ErrorKind, Result, ValidationKind};
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror};

/// 锁键前缀
pub const LOCK_PREFIX: &str = "lock";

/// 旁路缓存计算锁的前缀
const COMPUTE_PREFIX: &str = "compute";

/// 存储层的操作错误在锁语义下归为锁错误
fn as_lock_error(err: CacheError) -> CacheError {
    if err.kind() == ErrorKind::Operation {
        let message = err.message().to_string();
        let operation = err.operation_name().to_string();
        let key = err.key().map(str::to_string);
        let upgraded = CacheError::lock(operation, message).with_source(err);
        match key {
            Some(key) => upgraded.with_key(key),
            None => upgraded,
        }
    } else {
        err
    }
}

impl CacheEngine {
    /// 锁名：`lock:{key}` 超过键长上限时改用 `lock:{sha256(key)}`
    fn lock_name(&self, key: &str) -> String {
        if LOCK_PREFIX.len() + 1 + key.len() <= self.inner.config.max_key_length {
            format!("{LOCK_PREFIX}:{key}")
        } else {
            format!("{LOCK_PREFIX}:{}", hex::encode(Sha256::digest(key.as_bytes())))
        }
    }

    /// 尝试获取锁，已被持有时返回 `false`
    pub async fn acquire_lock(&self, key: &str, ttl_seconds: Option<u64>) -> Result<bool> {
        self.validate_key("acquire_lock", key)?;
        self.acquire_named(&self.lock_name(key), ttl_seconds).await
    }

    async fn acquire_named(&self, lock_name: &str, ttl_seconds: Option<u64>) -> Result<bool> {
        let ttl = ttl_seconds.unwrap_or(self.inner.config.lock_ttl);
        if ttl == 0 {
            return Err(CacheError::validation(
                "acquire_lock",
                ValidationKind::InvalidTtl,
                "锁 TTL 必须大于 0",
            )
            .with_key(lock_name));
        }

        let token = uuid::Uuid::new_v4().to_string();
        let acquired = self
            .observe(
                "acquire_lock",
                Some(lock_name),
                self.inner.store.set_nx(lock_name, &token, ttl),
            )
            .await
            .map_err(as_lock_error)?;
        if acquired {
            self.inner.lock_tokens.insert(lock_name.to_string(), token);
        }

        ldebug!(
            "system",
            LogStage::Lock,
            LogComponent::Engine,
            "acquire_lock",
            &format!("获取锁 {lock_name}: {acquired}")
        );
        Ok(acquired)
    }

    /// 释放本实例持有的锁
    ///
    /// 没有持有、已过期或已被其他持有者重新获取时返回 `false`，不会删除别人的锁。
    pub async fn release_lock(&self, key: &str) -> Result<bool> {
        self.validate_key("release_lock", key)?;
        self.release_named(&self.lock_name(key)).await
    }

    async fn release_named(&self, lock_name: &str) -> Result<bool> {
        let Some((_, token)) = self.inner.lock_tokens.remove(lock_name) else {
            return Ok(false);
        };
        self.observe(
            "release_lock",
            Some(lock_name),
            self.inner.store.delete_if_equals(lock_name, &token),
        )
        .await
        .map_err(as_lock_error)
    }

    /// 持有锁执行 `work`，锁被占用时返回锁错误
    ///
    /// 无论 `work` 成功与否都会尝试释放锁；释放失败只记录日志。
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        key: &str,
        ttl_seconds: Option<u64>,
        work: F,
    ) -> std::result::Result<T, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.validate_key("with_lock", key)?;
        let lock_name = self.lock_name(key);
        if !self.acquire_named(&lock_name, ttl_seconds).await? {
            return Err(CacheError::lock("with_lock", "锁已被其他调用者持有")
                .with_key(lock_name)
                .into());
        }

        let outcome = work().await;
        self.release_quietly(&lock_name).await;
        outcome
    }

    async fn release_quietly(&self, lock_name: &str) {
        if let Err(err) = self.release_named(lock_name).await {
            lerror!(
                "system",
                LogStage::Lock,
                LogComponent::Engine,
                "release_lock",
                &format!("释放锁失败: {err}"),
                key = lock_name
            );
        }
    }

    /// 分布式单飞：抢到计算锁的调用者计算并写入，其他调用者轮询缓存
    ///
    /// 每次轮询未命中都会重新抢锁，前一个持有者失败释放后由抢到的跟随者接手；
    /// 超过锁 TTL 仍未等到结果时自行计算。
    pub(super) async fn compute_with_lock<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        options: SetOptions,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(cached) = self.get_with(key, options.encoding).await? {
            return Ok(cached);
        }

        let compute_lock = self.lock_name(&format!("{COMPUTE_PREFIX}:{key}"));
        if self.acquire_named(&compute_lock, None).await? {
            let outcome = self.compute_then_set(key, factory, options).await;
            self.release_quietly(&compute_lock).await;
            return outcome;
        }

        let deadline = Instant::now() + Duration::from_secs(self.inner.config.lock_ttl);
        let poll = self.retry_delay();
        while Instant::now() < deadline {
            tokio::time::sleep(poll).await;
            if let Some(cached) = self.get_with(key, options.encoding).await? {
                return Ok(cached);
            }
            if self.acquire_named(&compute_lock, None).await? {
                ldebug!(
                    "system",
                    LogStage::Lock,
                    LogComponent::Engine,
                    "compute_takeover",
                    &format!("计算锁已释放但没有结果，接手计算: {key}")
                );
                // 上一位持有者可能刚写入后释放，先再读一次
                let outcome = self.compute_and_store(key, factory, options).await;
                self.release_quietly(&compute_lock).await;
                return outcome;
            }
        }

        ldebug!(
            "system",
            LogStage::Lock,
            LogComponent::Engine,
            "compute_fallback",
            &format!("等待计算锁超时，自行计算: {key}")
        );
        self.compute_then_set(key, factory, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{KeyValueStore, MemoryStore, MockKeyValueStore, StoreError};
    use crate::config::CacheConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_store_rejection_becomes_lock_error() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_nx()
            .returning(|_, _, _| Err(StoreError::Backend("ERR unknown command".into())));
        let engine = CacheEngine::new(CacheConfig::default(), Arc::new(store)).unwrap();

        let err = engine.acquire_lock("quote:AAPL", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lock);
        assert_eq!(err.status_code(), 409);
        assert_eq!(err.key(), Some("lock:quote:AAPL"));
    }

    #[tokio::test]
    async fn test_acquire_uses_configured_ttl() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_nx()
            .withf(|key, _, ttl| key == "lock:job" && *ttl == 30)
            .times(1)
            .returning(|_, _, _| Ok(true));
        let engine = CacheEngine::new(CacheConfig::default(), Arc::new(store)).unwrap();
        assert!(engine.acquire_lock("job", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_failure_stays_connection() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_nx()
            .returning(|_, _, _| Err(StoreError::Backend("ECONNREFUSED".into())));
        let engine = CacheEngine::new(CacheConfig::default(), Arc::new(store)).unwrap();
        let err = engine.acquire_lock("job", Some(5)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_release_never_deletes_foreign_holder() {
        let store = Arc::new(MemoryStore::new());
        let engine = CacheEngine::new(CacheConfig::default(), store.clone()).unwrap();
        assert!(engine.acquire_lock("job", Some(5)).await.unwrap());

        // 锁过期后被另一个进程拿走
        store.delete(&["lock:job".to_string()]).await.unwrap();
        assert!(store.set_nx("lock:job", "other-holder", 5).await.unwrap());

        assert!(!engine.release_lock("job").await.unwrap());
        assert_eq!(
            store.get("lock:job").await.unwrap().as_deref(),
            Some("other-holder")
        );
    }

    #[tokio::test]
    async fn test_release_without_holding_skips_store() {
        // 没有设置任何期望，任何存储调用都会让测试失败
        let engine = CacheEngine::new(CacheConfig::default(), Arc::new(MockKeyValueStore::new())).unwrap();
        assert!(!engine.release_lock("job").await.unwrap());
    }

    #[tokio::test]
    async fn test_long_key_gets_hashed_lock_name() {
        let config = CacheConfig {
            max_key_length: 20,
            ..CacheConfig::default()
        };
        let engine = CacheEngine::new(config, Arc::new(MockKeyValueStore::new())).unwrap();
        assert_eq!(engine.lock_name("short"), "lock:short");

        let hashed = engine.lock_name("quote:ABCDEFGHIJKLMN");
        assert!(hashed.starts_with("lock:"));
        assert_eq!(hashed.len(), 5 + 64);
        assert_eq!(hashed, engine.lock_name("quote:ABCDEFGHIJKLMN"));
    }
}
