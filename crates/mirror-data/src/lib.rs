//! mirror-data: record shapes, configuration and the backing store for the
//! chain activity mirror.
//!
//! The store is a short-lived, best-effort index of pending transactions and
//! recently mined blocks. It is never a source of truth: a missing record
//! means "unknown", not "does not exist on chain".

pub mod codec;
pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod types;

pub use codec::Codec;
pub use config::MirrorConfig;
pub use error::{MirrorError, MirrorResult};
pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;
pub use store::{MirrorBackend, SharedBackend};
pub use types::{
    BlockRecord, CanonicalBlock, FieldMap, Fields, LogSummary, MinedStatus, TxRecord, TxSummary,
};
