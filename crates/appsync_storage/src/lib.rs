//! # AppSync Storage
//!
//! Storage engines for the AppSync application synchronization service.
//!
//! Each user owns named collections of application records. Clients sync by
//! asking for everything modified since their last sync and by pushing
//! batches of records. Every backend implements [`StorageEngine`].
//!
//! ## Design Principles
//!
//! - One engine per process, chosen at startup by [`EngineBuilder`]
//! - A collection's `last_modified` never moves backwards
//! - Deletion is a terminal marker until the next write recreates the collection
//! - Backend-library errors are translated to [`StorageError`] at the boundary
//!
//! ## Available Engines
//!
//! - [`DocumentStoreBackend`] - Optimistic concurrency over a document store
//!   (optionally behind a [`MetadataCache`])
//! - [`RelationalBackend`] - SQLite tables with a retry-once policy
//! - [`MirroredBackend`] - Dual writes for migrating between engines
//! - [`MemoryBackend`] - In-process reference engine
//!
//! ## Example
//!
//! ```rust
//! use appsync_storage::{Application, MemoryBackend, PassThroughBroker, StorageEngine, Timestamp};
//! use std::sync::Arc;
//!
//! let engine = MemoryBackend::new(Arc::new(PassThroughBroker::new()));
//! let app = Application::new("https://app.example.com").with_field("name", "Example");
//! let committed = engine.add_applications("u1", "apps", &[app], "token").unwrap();
//!
//! let apps = engine.get_applications("u1", "apps", Timestamp::ZERO, "token").unwrap();
//! assert_eq!(apps[0].0, committed);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod application;
mod auth;
mod cache;
mod config;
pub mod docstore;
mod engine;
mod error;
mod memory;
mod mirrored;
mod sql;
mod timestamp;

pub use application::{Application, ORIGIN_FIELD};
pub use auth::{
    AssertionVerifier, DummyVerifier, PassThroughBroker, SessionTokenBroker, TokenBroker,
};
pub use cache::{CacheClient, CacheError, MemoryCache, MetadataCache, DEFAULT_CACHE_CAPACITY};
pub use config::{
    BackendConfig, CacheConfig, ConfigError, EngineBuilder, EngineConfig, SessionConfig, SqlConfig,
};
pub use docstore::DocumentStoreBackend;
pub use engine::StorageEngine;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use mirrored::MirroredBackend;
pub use sql::RelationalBackend;
pub use timestamp::Timestamp;
