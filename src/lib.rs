//! memvault
//!
//! A memory-persistence engine for a knowledge-storage server: durably
//! stores named, optionally project-scoped text memories and makes them
//! retrievable by exact key, by filtered listing, and by semantic
//! similarity search.
//!
//! # Architecture
//!
//! - **File store**: canonical, human-readable tree of frontmatter files,
//!   one directory per project
//! - **Database mirror**: optional Postgres/pgvector secondary store used
//!   for similarity search and ephemeral-storage fallback
//! - **Embedder**: optional HTTP embedding service, strictly best-effort
//! - **Service**: the orchestrator combining the three under an explicit
//!   consistency and fallback policy
//!
//! # Modules
//!
//! - [`domain`]: memory, summary, and search-result types
//! - [`frontmatter`]: the on-disk text codec
//! - [`store`]: file store, mirror trait, Postgres mirror, error taxonomy
//! - [`embedding`]: embedding provider trait and HTTP client
//! - [`service`]: the Write/Read/List/Delete/Search orchestrator
//! - [`config`]: environment-driven configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::default_trait_access)]

pub mod config;
pub mod domain;
pub mod embedding;
pub mod frontmatter;
pub mod service;
pub mod store;

pub use config::{EmbeddingConfig, MemoryConfig, StorageConfig};
pub use domain::{
    ListFilter, Memory, MemorySummary, SearchOptions, SearchResult, WriteOptions,
};
pub use embedding::{Embedder, HttpEmbedder};
pub use service::MemoryService;
pub use store::files::FileStore;
pub use store::postgres::PostgresMirror;
pub use store::{MemoryMirror, StoreError};
