//! # 值编解码
//!
//! 所有写入存储的值都包在信封里：
//!
//! ```json
//! {"data": ..., "storedAt": 1700000000000, "compressed": false, "metadata": {...}}
//! ```
//!
//! - JSON 编码、未压缩：`data` 就是值本身的 JSON
//! - JSON 编码、已压缩：`data` 是 `base64(gzip(json))`
//! - MessagePack 编码：`data` 是 `base64(msgpack)`，压缩时为 `base64(gzip(msgpack))`

use std::fmt;
use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use super::compression::CompressionFilter;
use crate::error::{CacheError, Result, ValidationKind};

/// 载荷编码
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 文本 JSON
    #[default]
    Json,
    /// 紧凑二进制 MessagePack
    MsgPack,
}

impl Encoding {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MsgPack => "msgpack",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" | "rmp" => Ok(Self::MsgPack),
            other => Err(CacheError::serialization(
                "deserialize",
                format!("不支持的解码器: {other}"),
            )),
        }
    }
}

/// 是否压缩
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressMode {
    /// 由压缩过滤器按阈值决定
    #[default]
    Auto,
    /// 强制压缩
    Always,
    /// 不压缩
    Never,
}

/// 压缩元数据，仅在评估过压缩时存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub stored_at: i64,
    pub compressed: bool,
    pub original_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_size: Option<usize>,
}

/// 存储信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub data: Value,
    #[serde(default)]
    pub stored_at: i64,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// 值编解码器
#[derive(Debug, Clone, Copy)]
pub struct ValueCodec {
    compression: CompressionFilter,
}

impl ValueCodec {
    #[must_use]
    pub const fn new(compression: CompressionFilter) -> Self {
        Self { compression }
    }

    #[must_use]
    pub const fn compression(&self) -> &CompressionFilter {
        &self.compression
    }

    /// 把值编码为信封字符串
    pub fn serialize<T>(&self, value: &T, encoding: Encoding, mode: CompressMode) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        let payload = encode_payload(value, encoding)?;
        let stored_at = chrono::Utc::now().timestamp_millis();

        let evaluated = match mode {
            CompressMode::Auto => self.compression.is_enabled(),
            CompressMode::Always => true,
            CompressMode::Never => false,
        };
        let compress = match mode {
            CompressMode::Auto => self.compression.should_compress(payload.len()),
            CompressMode::Always => true,
            CompressMode::Never => false,
        };

        let (data, compressed_size) = if compress {
            let compressed = self.compression.compress(&payload)?;
            let size = compressed.len();
            (Value::String(general_purpose::STANDARD.encode(compressed)), Some(size))
        } else {
            let data = match encoding {
                Encoding::Json => serde_json::from_slice(&payload).map_err(|e| {
                    CacheError::serialization("serialize", "JSON 载荷无法回读").with_source(e)
                })?,
                Encoding::MsgPack => Value::String(general_purpose::STANDARD.encode(&payload)),
            };
            (data, None)
        };

        let envelope = Envelope {
            data,
            stored_at,
            compressed: compress,
            metadata: evaluated.then(|| Metadata {
                stored_at,
                compressed: compress,
                original_size: payload.len(),
                compressed_size,
            }),
        };

        serde_json::to_string(&envelope).map_err(|e| {
            CacheError::serialization("serialize", "信封序列化失败").with_source(e)
        })
    }

    /// 从信封字符串解码值
    pub fn deserialize<T>(&self, raw: &str, encoding: Encoding) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let envelope = parse_envelope(raw)?;
        self.decode_envelope(envelope, encoding)
    }

    /// 按解码器名称解码；不支持的名称在任何解码之前失败
    pub fn deserialize_with<T>(&self, raw: &str, decoder: Option<&str>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let encoding = decoder.map_or(Ok(Encoding::Json), |name| name.parse::<Encoding>())?;
        self.deserialize(raw, encoding)
    }

    /// 解码已解析的信封
    pub fn decode_envelope<T>(&self, envelope: Envelope, encoding: Encoding) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if envelope.compressed {
            let packed = base64_payload(&envelope.data)?;
            let payload = self.compression.decompress(&packed)?;
            return decode_payload(&payload, encoding);
        }

        match encoding {
            Encoding::Json => serde_json::from_value(envelope.data).map_err(|e| {
                CacheError::serialization("deserialize", format!("JSON 解码失败: {e}")).with_source(e)
            }),
            Encoding::MsgPack => {
                let payload = base64_payload(&envelope.data)?;
                decode_payload(&payload, encoding)
            }
        }
    }
}

fn encode_payload<T>(value: &T, encoding: Encoding) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    match encoding {
        Encoding::Json => serde_json::to_vec(value).map_err(|e| {
            CacheError::serialization("serialize", format!("JSON 编码失败: {e}")).with_source(e)
        }),
        Encoding::MsgPack => rmp_serde::to_vec_named(value).map_err(|e| {
            CacheError::serialization("serialize", format!("MessagePack 编码失败: {e}"))
                .with_source(e)
        }),
    }
}

fn decode_payload<T>(payload: &[u8], encoding: Encoding) -> Result<T>
where
    T: DeserializeOwned,
{
    match encoding {
        Encoding::Json => serde_json::from_slice(payload).map_err(|e| {
            CacheError::serialization("deserialize", format!("JSON 解码失败: {e}")).with_source(e)
        }),
        Encoding::MsgPack => rmp_serde::from_slice(payload).map_err(|e| {
            CacheError::serialization("deserialize", format!("MessagePack 解码失败: {e}"))
                .with_source(e)
        }),
    }
}

fn base64_payload(data: &Value) -> Result<Vec<u8>> {
    let Value::String(encoded) = data else {
        return Err(CacheError::serialization(
            "deserialize",
            "二进制载荷必须是 base64 字符串",
        ));
    };
    general_purpose::STANDARD.decode(encoded).map_err(|e| {
        CacheError::serialization("deserialize", format!("base64 解码失败: {e}")).with_source(e)
    })
}

/// 解析信封；空输入为校验错误，缺少 `data` 字段为序列化错误
pub fn parse_envelope(raw: &str) -> Result<Envelope> {
    if raw.trim().is_empty() {
        return Err(CacheError::validation(
            "deserialize",
            ValidationKind::EmptyInput,
            "缓存值为空",
        ));
    }

    let value: Value = serde_json::from_str(raw).map_err(|e| {
        CacheError::serialization("deserialize", format!("信封不是合法 JSON: {e}")).with_source(e)
    })?;

    match &value {
        Value::Object(object) if object.contains_key("data") => {}
        _ => {
            return Err(CacheError::serialization(
                "deserialize",
                "信封缺少 data 字段",
            ));
        }
    }

    serde_json::from_value(value).map_err(|e| {
        CacheError::serialization("deserialize", format!("信封格式错误: {e}")).with_source(e)
    })
}

/// 是否为合法信封（JSON 对象且含 `data` 与 `storedAt`）
#[must_use]
pub fn is_valid_envelope(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw).is_ok_and(|value| {
        value
            .as_object()
            .is_some_and(|object| object.contains_key("data") && object.contains_key("storedAt"))
    })
}

/// 不做类型解码，直接取出 `data` 字段
#[must_use]
pub fn extract_data(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut object)) => object.remove("data"),
        _ => None,
    }
}

/// 取出 `metadata` 字段，信封损坏或没有元数据时返回空对象
#[must_use]
pub fn extract_metadata(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(mut object)) => match object.remove("metadata") {
            Some(Value::Object(metadata)) => metadata,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        last: f64,
        volume: u64,
        tags: Vec<String>,
    }

    fn codec() -> ValueCodec {
        ValueCodec::new(CompressionFilter::new(true, 1024, 10 * 1024 * 1024))
    }

    fn quote() -> Quote {
        Quote {
            symbol: "AAPL".to_string(),
            last: 189.5,
            volume: 1_000_000,
            tags: vec!["tech".to_string()],
        }
    }

    #[test]
    fn test_small_json_value_is_stored_inline() {
        let raw = codec().serialize(&quote(), Encoding::Json, CompressMode::Auto).unwrap();
        let envelope: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope["data"]["symbol"], json!("AAPL"));
        assert_eq!(envelope["compressed"], json!(false));
        assert_eq!(envelope["metadata"]["compressed"], json!(false));
        assert!(envelope["metadata"].get("compressedSize").is_none());

        let back: Quote = codec().deserialize(&raw, Encoding::Json).unwrap();
        assert_eq!(back, quote());
    }

    #[test]
    fn test_large_value_is_compressed() {
        let big = "x".repeat(4096);
        let raw = codec().serialize(&big, Encoding::Json, CompressMode::Auto).unwrap();
        assert!(raw.len() < big.len());

        let metadata = extract_metadata(&raw);
        assert_eq!(metadata.get("compressed"), Some(&json!(true)));
        assert_eq!(metadata.get("originalSize"), Some(&json!(4098)));
        assert!(metadata.contains_key("compressedSize"));

        let back: String = codec().deserialize(&raw, Encoding::Json).unwrap();
        assert_eq!(back, big);
    }

    #[test]
    fn test_msgpack_round_trip() {
        for mode in [CompressMode::Never, CompressMode::Always] {
            let raw = codec().serialize(&quote(), Encoding::MsgPack, mode).unwrap();
            assert!(extract_data(&raw).is_some_and(|data| data.is_string()));
            let back: Quote = codec().deserialize(&raw, Encoding::MsgPack).unwrap();
            assert_eq!(back, quote());
        }
    }

    #[test]
    fn test_never_mode_has_no_metadata() {
        let raw = codec().serialize(&quote(), Encoding::Json, CompressMode::Never).unwrap();
        assert!(extract_metadata(&raw).is_empty());
        assert!(is_valid_envelope(&raw));
    }

    #[test]
    fn test_none_serializes_to_null() {
        let raw = codec()
            .serialize(&Option::<Quote>::None, Encoding::Json, CompressMode::Auto)
            .unwrap();
        assert_eq!(extract_data(&raw), Some(Value::Null));
        let back: Option<Quote> = codec().deserialize(&raw, Encoding::Json).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn test_unencodable_value_is_serialization_error() {
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), 3u8);
        let err = codec().serialize(&map, Encoding::Json, CompressMode::Auto).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_missing_data_field() {
        let err = codec()
            .deserialize::<Value>(r#"{"storedAt": 1, "compressed": false}"#, Encoding::Json)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_empty_input_is_validation_error() {
        let err = codec().deserialize::<Value>("", Encoding::Json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation(ValidationKind::EmptyInput));

        let err = codec().deserialize::<Value>("not json", Encoding::Json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_unknown_decoder_fails_fast() {
        let err = codec()
            .deserialize_with::<Value>("garbage that would not parse", Some("yaml"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(err.message().contains("yaml"));
    }

    #[test]
    fn test_malformed_binary_payload() {
        let raw = r#"{"data": "%%%not-base64%%%", "storedAt": 1, "compressed": false}"#;
        let err = codec().deserialize::<Value>(raw, Encoding::MsgPack).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);

        let raw = r#"{"data": "aGVsbG8=", "storedAt": 1, "compressed": true}"#;
        let err = codec().deserialize::<Value>(raw, Encoding::Json).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_envelope_helpers() {
        assert!(is_valid_envelope(r#"{"data": 1, "storedAt": 2}"#));
        assert!(!is_valid_envelope(r#"{"data": 1}"#));
        assert!(!is_valid_envelope("[1, 2]"));
        assert!(!is_valid_envelope("{"));
        assert_eq!(extract_data(r#"{"data": [1, 2]}"#), Some(json!([1, 2])));
        assert_eq!(extract_data("oops"), None);
        assert!(extract_metadata("oops").is_empty());
    }
}
