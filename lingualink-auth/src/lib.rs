//! Credential management for the Lingualink gateway.
//!
//! [`KeyStore`] is the durable record of API keys (SQLite-backed);
//! [`CachedKeyVerifier`] layers a TTL-bounded, positive-only verification
//! cache in front of it for the request hot path.

mod cache;
mod store;

pub use cache::{
    cache_key, CacheStats, CachedKeyVerifier, CachedVerdict, MokaVerifyCache, Verification,
    VerifyCache,
};
pub use store::{ApiKeyRecord, CreateKey, KeyStore, KeyStoreStats};
