//! # 批量上限守卫

use crate::error::{CacheError, Result};

/// 批量操作条目数上限检查，发生在任何存储 I/O 之前
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchGuard {
    max_batch_size: usize,
}

impl BatchGuard {
    #[must_use]
    pub const fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    #[must_use]
    pub const fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// 超过上限时整体拒绝，否则原样（保持顺序）返回
    pub fn check<'a, T>(&self, operation: &str, items: &'a [T]) -> Result<&'a [T]> {
        if items.len() > self.max_batch_size {
            return Err(CacheError::batch(operation, items.len(), self.max_batch_size));
        }
        Ok(items)
    }

    /// 按上限切分，供模式删除这类先枚举后批量的操作使用
    pub fn chunks<'a, T>(&self, items: &'a [T]) -> impl Iterator<Item = &'a [T]> + 'a {
        items.chunks(self.max_batch_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_limit_is_inclusive() {
        let guard = BatchGuard::new(100);
        let items: Vec<u32> = (0..100).collect();
        assert_eq!(guard.check("multi_get", &items).unwrap(), items.as_slice());

        let items: Vec<u32> = (0..101).collect();
        let err = guard.check("multi_get", &items).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Batch {
                batch_size: 101,
                max_allowed: 100
            }
        );
        assert_eq!(err.operation_name(), "multi_get");
    }

    #[test]
    fn test_chunks_respect_limit() {
        let guard = BatchGuard::new(3);
        let items: Vec<u32> = (0..8).collect();
        let sizes: Vec<usize> = guard.chunks(&items).map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![3, 3, 2]);
        assert!(guard.chunks::<u32>(&[]).next().is_none());
    }
}
