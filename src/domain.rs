//! Core data model for stored memories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named, optionally project-scoped text entry with metadata.
///
/// `(name, project)` uniquely identifies a memory across both stores.
/// `project = None` means the global partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub name: String,
    pub content: String,
    pub category: Option<String>,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Present only when a mirror is configured and embedding generation
    /// succeeded for this write. Absence is a valid state, not an error.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// Listing view of a memory: metadata only, no body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub name: String,
    pub category: Option<String>,
    pub project: Option<String>,
    pub tags: Vec<String>,
    /// Byte length of the memory body.
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A similarity-search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Cosine similarity in [0, 1].
    pub score: f32,
    /// Resolved (not existence-verified) file-store path for the memory.
    pub path: PathBuf,
}

/// Optional metadata attached to a write.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub category: Option<String>,
    pub project: Option<String>,
    pub tags: Vec<String>,
}

/// Filters applied to a listing.
///
/// Category matches exactly; tags match when any requested tag intersects
/// the memory's tag set. An empty tag filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub project: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// Scoping for a similarity search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub project: Option<String>,
    pub category: Option<String>,
    pub limit: usize,
    /// Minimum similarity a row must meet to be included.
    pub threshold: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            project: None,
            category: None,
            limit: 5,
            threshold: 0.7,
        }
    }
}
