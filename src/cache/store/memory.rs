//! # 进程内存储后端
//!
//! 语义与 Redis 保持一致（惰性过期、glob 扫描、类型错误措辞），用于本地开发与测试。

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError, StoreResult};

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";
const OVERFLOW: &str = "ERR increment or decrement would overflow";

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
}

/// 存储项
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<u64>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + Duration::from_secs(t)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前未过期的键数量
    pub async fn len(&self) -> usize {
        let data = self.data.lock().await;
        data.values().filter(|entry| !entry.is_expired()).count()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn backend_error(message: &str) -> StoreError {
    StoreError::Backend(message.to_string())
}

fn purge_expired(data: &mut HashMap<String, Entry>, key: &str) {
    if data.get(key).is_some_and(Entry::is_expired) {
        data.remove(key);
    }
}

/// Redis 风格的闭区间下标换算，返回 `None` 表示空区间
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

/// 把 glob 模式转为锚定的正则
fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StoreError::Backend(format!("ERR invalid pattern: {e}")))
}

fn parse_integer(raw: &str) -> StoreResult<i64> {
    raw.parse().map_err(|_| backend_error(NOT_INTEGER))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Str(value)) => Ok(Some(value.clone())),
            Some(_) => Err(backend_error(WRONG_TYPE)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> StoreResult<()> {
        if ttl == Some(0) {
            return Err(backend_error("ERR invalid expire time in 'set' command"));
        }
        let mut data = self.data.lock().await;
        data.insert(key.to_string(), Entry::new(Value::Str(value.to_string()), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> StoreResult<bool> {
        if ttl == 0 {
            return Err(backend_error("ERR invalid expire time in 'set' command"));
        }
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        if data.contains_key(key) {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            Entry::new(Value::Str(value.to_string()), Some(ttl)),
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            Some(Value::Str(current)) if current == expected => {
                data.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = data.remove(key)
                && !entry.is_expired()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        Ok(data.contains_key(key))
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let mut data = self.data.lock().await;
        Ok(keys
            .iter()
            .map(|key| {
                purge_expired(&mut data, key);
                // MGET 对非字符串类型返回 nil
                match data.get(key).map(|entry| &entry.value) {
                    Some(Value::Str(value)) => Some(value.clone()),
                    _ => None,
                }
            })
            .collect())
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<u64>) -> StoreResult<()> {
        if ttl == Some(0) {
            return Err(backend_error("ERR invalid expire time in 'set' command"));
        }
        let mut data = self.data.lock().await;
        for (key, value) in entries {
            data.insert(key.clone(), Entry::new(Value::Str(value.clone()), ttl));
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: u64) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        if ttl == 0 {
            return Ok(data.remove(key).is_some());
        }
        match data.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        Ok(match data.get(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                i64::try_from(secs).unwrap_or(i64::MAX)
            }
        })
    }

    async fn incr(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Str("0".to_string()), None));
        let Value::Str(raw) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        let next = parse_integer(raw)?
            .checked_add(delta)
            .ok_or_else(|| backend_error(OVERFLOW))?;
        *raw = next.to_string();
        Ok(next)
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let mut data = self.data.lock().await;
        data.retain(|_, entry| !entry.is_expired());
        let mut keys: Vec<String> = data
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn lpush(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new()), None));
        let Value::List(list) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        for value in values {
            list.push_front(value.clone());
        }
        Ok(list.len() as u64)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let Some(entry) = data.get_mut(key) else {
            return Ok(());
        };
        let Value::List(list) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        match resolve_range(list.len(), start, stop) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => {
                data.remove(key);
            }
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(resolve_range(list.len(), start, stop)
                .map(|(from, to)| list.range(from..=to).cloned().collect())
                .unwrap_or_default()),
            Some(_) => Err(backend_error(WRONG_TYPE)),
        }
    }

    async fn sadd(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new()), None));
        let Value::Set(set) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        Ok(members
            .iter()
            .filter(|member| set.insert((*member).clone()))
            .count() as u64)
    }

    async fn srem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let Some(entry) = data.get_mut(key) else {
            return Ok(0);
        };
        let Value::Set(set) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        let removed = members.iter().filter(|member| set.remove(*member)).count() as u64;
        if set.is_empty() {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            None => Ok(false),
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(backend_error(WRONG_TYPE)),
        }
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(backend_error(WRONG_TYPE)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        hash.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        match data.get(key).map(|entry| &entry.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(backend_error(WRONG_TYPE)),
        }
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut data = self.data.lock().await;
        purge_expired(&mut data, key);
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(backend_error(WRONG_TYPE));
        };
        let current = match hash.get(field) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| backend_error("ERR hash value is not an integer"))?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| backend_error(OVERFLOW))?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.data.lock().await.clear();
        Ok(())
    }
}
