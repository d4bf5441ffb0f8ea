//! Storage Engine Module
//!
//! A concurrency-safe mapping from key to `(value, optional expiry)`,
//! shared by every client connection. It has no knowledge of the wire
//! protocol.
//!
//! ## Features
//!
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **TTL Support**: Keys can carry a millisecond-precision deadline
//! - **Lazy Expiry**: Expired keys are removed when next read
//!
//! ## Example
//!
//! ```
//! use emberkv::storage::StorageEngine;
//! use bytes::Bytes;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = Arc::new(StorageEngine::new());
//!
//! engine.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(engine.get(&Bytes::from("name")), Some(Bytes::from("Ariz")));
//!
//! engine.set_with_ttl(Bytes::from("gone"), Bytes::from("x"), Duration::ZERO);
//! assert_eq!(engine.get(&Bytes::from("gone")), None);
//! ```

pub mod engine;

pub use engine::{Entry, StorageEngine, StorageStats};
