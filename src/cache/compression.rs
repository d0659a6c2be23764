//! # 压缩过滤器
//!
//! 根据配置的开关与阈值决定是否 gzip 压缩编码后的载荷。
//! 解压只由信封里的 `compressed` 标志触发。

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// 压缩过滤器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionFilter {
    enabled: bool,
    threshold: usize,
    /// 解压输出上限，防止异常数据膨胀
    max_output: usize,
}

impl CompressionFilter {
    #[must_use]
    pub const fn new(enabled: bool, threshold: usize, max_output: usize) -> Self {
        Self {
            enabled,
            threshold,
            max_output,
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.compression_enabled,
            config.compression_threshold,
            config.max_value_bytes(),
        )
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 启用且严格大于阈值时压缩
    #[must_use]
    pub const fn should_compress(&self, size_bytes: usize) -> bool {
        self.enabled && size_bytes > self.threshold
    }

    /// gzip 压缩
    pub fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(input.len() / 2), Compression::default());
        encoder
            .write_all(input)
            .and_then(|()| encoder.finish())
            .map_err(|e| CacheError::serialization("compress", "gzip 压缩失败").with_source(e))
    }

    /// gzip 解压，输出超过上限视为数据损坏
    pub fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        let limit = u64::try_from(self.max_output).unwrap_or(u64::MAX);
        let mut decoder = GzDecoder::new(input).take(limit.saturating_add(1));
        let mut output = Vec::with_capacity(input.len().saturating_mul(2).min(self.max_output));
        decoder
            .read_to_end(&mut output)
            .map_err(|e| CacheError::serialization("decompress", "gzip 解压失败").with_source(e))?;

        if output.len() > self.max_output {
            return Err(CacheError::serialization(
                "decompress",
                format!("解压后大小超过上限 {} 字节", self.max_output),
            ));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CompressionFilter {
        CompressionFilter::new(true, 1024, 1024 * 1024)
    }

    #[test]
    fn test_should_compress_threshold() {
        assert!(filter().should_compress(2000));
        assert!(!filter().should_compress(500));
        assert!(!filter().should_compress(1024));
        assert!(!CompressionFilter::new(false, 1024, 1024).should_compress(2000));
    }

    #[test]
    fn test_compress_then_decompress() {
        let input = "AAPL ".repeat(500);
        let compressed = filter().compress(input.as_bytes()).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(filter().decompress(&compressed).unwrap(), input.as_bytes());
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let err = filter().decompress(b"definitely not gzip").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Serialization);
    }

    #[test]
    fn test_decompress_enforces_limit() {
        let input = vec![b'x'; 4096];
        let compressed = filter().compress(&input).unwrap();
        let small = CompressionFilter::new(true, 16, 1000);
        assert!(small.decompress(&compressed).is_err());
    }
}
