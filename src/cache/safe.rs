//! # 容错门面
//!
//! `safe_*` 系列在失败时记录错误日志并返回该形状的自然默认值，从不向上传播。

use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

use super::engine::{CacheEngine, SetOptions};
use crate::error::CacheError;
use crate::lerror;
use crate::logging::{LogComponent, LogStage};

fn absorb<T>(operation: &str, key: &str, err: &CacheError, fallback: T) -> T {
    lerror!(
        "system",
        LogStage::Fallback,
        LogComponent::Facade,
        operation,
        &format!("缓存操作失败，返回默认值: {err}"),
        key = key,
        code = err.kind().code()
    );
    fallback
}

impl CacheEngine {
    /// 失败时返回 `None`
    pub async fn safe_get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        self.get(key)
            .await
            .unwrap_or_else(|err| absorb("safe_get", key, &err, None))
    }

    /// 返回是否写入成功
    pub async fn safe_set<T>(&self, key: &str, value: &T, options: SetOptions) -> bool
    where
        T: Serialize + ?Sized,
    {
        match self.set(key, value, options).await {
            Ok(()) => true,
            Err(err) => absorb("safe_set", key, &err, false),
        }
    }

    /// 返回是否删除了键
    pub async fn safe_delete(&self, key: &str) -> bool {
        self.delete(key)
            .await
            .unwrap_or_else(|err| absorb("safe_delete", key, &err, false))
    }

    /// 失败时返回空表
    pub async fn safe_multi_get<T>(&self, keys: &[String]) -> HashMap<String, T>
    where
        T: DeserializeOwned,
    {
        self.multi_get(keys).await.unwrap_or_else(|err| {
            let label = keys.first().map_or("-", String::as_str);
            absorb("safe_multi_get", label, &err, HashMap::new())
        })
    }

    /// 失败时返回 `None`
    pub async fn safe_increment(&self, key: &str) -> Option<i64> {
        self.increment(key)
            .await
            .map(Some)
            .unwrap_or_else(|err| absorb("safe_increment", key, &err, None))
    }

    /// 失败时返回空列表
    pub async fn safe_range<T>(&self, key: &str, start: i64, stop: i64) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        self.range(key, start, stop)
            .await
            .unwrap_or_else(|err| absorb("safe_range", key, &err, Vec::new()))
    }

    /// 失败时返回 `false`
    pub async fn safe_is_member<T>(&self, key: &str, member: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        self.is_member(key, member)
            .await
            .unwrap_or_else(|err| absorb("safe_is_member", key, &err, false))
    }

    /// 失败时返回空列表
    pub async fn safe_members<T>(&self, key: &str) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        self.members(key)
            .await
            .unwrap_or_else(|err| absorb("safe_members", key, &err, Vec::new()))
    }

    /// 失败时返回空表
    pub async fn safe_hash_get_all<T>(&self, key: &str) -> HashMap<String, T>
    where
        T: DeserializeOwned,
    {
        self.hash_get_all(key)
            .await
            .unwrap_or_else(|err| absorb("safe_hash_get_all", key, &err, HashMap::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MockKeyValueStore, StoreError};
    use crate::config::CacheConfig;
    use std::sync::Arc;

    fn failing_engine() -> CacheEngine {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::Backend("timeout exceeded".into())));
        store
            .expect_set()
            .returning(|_, _, _| Err(StoreError::Backend("ECONNREFUSED".into())));
        store
            .expect_sismember()
            .returning(|_, _| Err(StoreError::Backend("ECONNREFUSED".into())));
        store
            .expect_hgetall()
            .returning(|_| Err(StoreError::Backend("ECONNREFUSED".into())));
        CacheEngine::new(CacheConfig::default(), Arc::new(store)).unwrap()
    }

    #[tokio::test]
    async fn test_safe_variants_return_defaults() {
        let engine = failing_engine();
        assert_eq!(engine.safe_get::<String>("k").await, None);
        assert!(!engine.safe_set("k", &1, SetOptions::default()).await);
        assert!(!engine.safe_is_member("s", "a").await);
        assert!(engine.safe_hash_get_all::<i64>("h").await.is_empty());
        assert_eq!(engine.stats().errors, 4);
    }

    #[tokio::test]
    async fn test_safe_variants_absorb_validation_errors() {
        let engine = CacheEngine::new(CacheConfig::default(), Arc::new(MockKeyValueStore::new())).unwrap();
        assert!(engine.safe_range::<String>("bad key", 0, -1).await.is_empty());
        assert!(engine.safe_members::<String>("").await.is_empty());
        assert_eq!(engine.safe_increment("with space").await, None);
        assert!(!engine.safe_delete("").await);
    }
}
