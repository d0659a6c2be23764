//! # 缓存模块
//!
//! 远程键值存储前的缓存引擎：键规范、TTL 分层、信封编解码、压缩、批量守卫、
//! 咨询锁与容错门面。

pub mod batch;
pub mod codec;
pub mod compression;
pub mod engine;
pub mod keys;
pub mod lock;
pub mod safe;
pub mod single_flight;
pub mod stats;
pub mod store;
pub mod ttl;

pub use batch::BatchGuard;
pub use codec::{CompressMode, Encoding, Envelope, Metadata, ValueCodec};
pub use compression::CompressionFilter;
pub use engine::{CacheEngine, SetOptions};
pub use keys::{CacheKey, KeyBuilder, ParsedKey};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError, StoreResult};
pub use ttl::{TtlPolicy, TtlTier};
