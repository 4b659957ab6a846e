//! Storage backends: the canonical file tree and the optional database mirror.

use crate::domain::{Memory, MemorySummary, SearchOptions};
use async_trait::async_trait;

pub mod files;
pub mod postgres;

/// Hard failure modes of the storage layer.
///
/// Soft conditions never appear here: "not found" is `Ok(None)`, a file that
/// fails to parse during listing is skipped, and a missing embedding is a
/// valid state. What remains is genuine I/O trouble, caller mistakes, and
/// mirror reachability.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File-store I/O other than "not found": permissions, disk, rename.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A memory or project name that cannot be a single path component.
    #[error("invalid memory or project name: {0}")]
    InvalidName(String),

    /// The database mirror is configured but unreachable or failing.
    #[error("database mirror unavailable: {0}")]
    MirrorUnavailable(String),

    /// Semantic search was requested without a configured mirror.
    #[error("semantic search requires a configured database mirror")]
    MirrorNotConfigured,
}

/// The optional secondary store: duplicated rows plus embeddings.
///
/// Used for similarity search and as a durability fallback when the file
/// store's backing volume did not survive (e.g. an ephemeral container
/// restart). None of these operations may be assumed reachable; callers
/// decide per operation whether `MirrorUnavailable` degrades or propagates.
#[async_trait]
pub trait MemoryMirror: Send + Sync + std::fmt::Debug {
    /// Insert or update keyed by `(name, project)`. An absent embedding
    /// must never clear a previously stored one.
    async fn upsert(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<(), StoreError>;

    /// Fetch one memory by key.
    async fn fetch(&self, name: &str, project: Option<&str>)
    -> Result<Option<Memory>, StoreError>;

    /// Delete by key, returning whether a row was actually removed.
    async fn delete(&self, name: &str, project: Option<&str>) -> Result<bool, StoreError>;

    /// List summaries filtered by project partition and category. Tag
    /// filtering happens in-process in the service, with file-store
    /// semantics.
    async fn list(
        &self,
        project: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<MemorySummary>, StoreError>;

    /// Rows with a non-null embedding and `1 - cosine_distance >= threshold`,
    /// ordered by descending similarity, truncated to `limit`.
    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<(Memory, f32)>, StoreError>;
}

/// Any-intersection tag matching; an empty request matches everything.
pub(crate) fn tags_intersect(have: &[String], want: &[String]) -> bool {
    want.is_empty() || want.iter().any(|tag| have.contains(tag))
}
