//! The orchestrator: Write/Read/List/Delete/Search over the file store,
//! the optional database mirror, and the optional embedder.
//!
//! Consistency policy: the file store is canonical and must succeed for a
//! write to count as durable; the mirror is a best-effort index that also
//! serves as the fallback when the file tree's backing volume was wiped.
//! Mirror failures degrade for write/list/delete and propagate for search,
//! which has no substitute path.

use crate::config::MemoryConfig;
use crate::domain::{
    ListFilter, Memory, MemorySummary, SearchOptions, SearchResult, WriteOptions,
};
use crate::embedding::{Embedder, HttpEmbedder};
use crate::store::files::FileStore;
use crate::store::postgres::PostgresMirror;
use crate::store::{MemoryMirror, StoreError, tags_intersect};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct MemoryService {
    files: FileStore,
    mirror: Option<Arc<dyn MemoryMirror>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryService {
    pub fn new(
        files: FileStore,
        mirror: Option<Arc<dyn MemoryMirror>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            files,
            mirror,
            embedder,
        }
    }

    /// Wire a service from configuration: file store always, mirror and
    /// embedder only when configured. A configured-but-unreachable database
    /// is an error here, at construction, rather than on every call.
    pub async fn from_config(config: &MemoryConfig) -> Result<Self, StoreError> {
        let files = FileStore::new(&config.storage.base_dir);

        let mirror: Option<Arc<dyn MemoryMirror>> = match &config.storage.database_url {
            Some(url) => {
                let mirror = PostgresMirror::new(url).await?;
                info!("database mirror connected");
                Some(Arc::new(mirror))
            }
            None => None,
        };

        let embedder: Option<Arc<dyn Embedder>> = if config.embedding.is_configured() {
            Some(Arc::new(HttpEmbedder::new(config.embedding.clone())))
        } else {
            None
        };

        Ok(Self::new(files, mirror, embedder))
    }

    pub fn file_store(&self) -> &FileStore {
        &self.files
    }

    /// Create or wholesale-replace a memory. Returns the resolved file path
    /// as the write receipt.
    ///
    /// The existing record's creation time is reused, making repeated
    /// writes idempotent with respect to `created_at`. The file write is
    /// the durability gate; a mirror upsert failure afterwards is logged
    /// as a partial failure and never rolled back.
    pub async fn write(
        &self,
        name: &str,
        content: &str,
        options: WriteOptions,
    ) -> Result<PathBuf, StoreError> {
        let project = options.project.as_deref();
        let created_at = match self.read(name, project).await? {
            Some(existing) => existing.created_at,
            None => Utc::now(),
        };

        let embedding = match &self.embedder {
            Some(embedder) => embedder.generate(content).await,
            None => None,
        };

        let memory = Memory {
            name: name.to_string(),
            content: content.to_string(),
            category: options.category,
            project: options.project,
            tags: options.tags,
            created_at,
            updated_at: Utc::now(),
            embedding: embedding.clone(),
        };

        let path = self.files.write(&memory).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.upsert(&memory, embedding.as_deref()).await {
                warn!(
                    name,
                    error = %e,
                    "mirror upsert failed after successful file write (partial failure)"
                );
            }
        }

        Ok(path)
    }

    /// Read by key: file store first (authoritative), mirror as fallback.
    /// Absence from both is `Ok(None)`, never an error.
    pub async fn read(
        &self,
        name: &str,
        project: Option<&str>,
    ) -> Result<Option<Memory>, StoreError> {
        if let Some(memory) = self.files.read(name, project).await? {
            return Ok(Some(memory));
        }

        let Some(mirror) = &self.mirror else {
            return Ok(None);
        };
        match mirror.fetch(name, project).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(name, error = %e, "mirror fetch failed; treating as not found");
                Ok(None)
            }
        }
    }

    /// List one partition. An empty file-store result is ambiguous between
    /// "genuinely empty" and "backing volume reset", so it falls back to
    /// the mirror when one is configured. Both paths sort descending by
    /// update time.
    pub async fn list(&self, filter: ListFilter) -> Result<Vec<MemorySummary>, StoreError> {
        let entries = self
            .files
            .list(
                filter.project.as_deref(),
                filter.category.as_deref(),
                &filter.tags,
            )
            .await?;
        if !entries.is_empty() {
            return Ok(entries);
        }

        let Some(mirror) = &self.mirror else {
            return Ok(entries);
        };
        match mirror
            .list(filter.project.as_deref(), filter.category.as_deref())
            .await
        {
            Ok(rows) => {
                debug!(count = rows.len(), "file store empty, using mirror listing");
                Ok(rows
                    .into_iter()
                    .filter(|row| tags_intersect(&row.tags, &filter.tags))
                    .collect())
            }
            Err(e) => {
                warn!(error = %e, "mirror listing failed; returning empty file view");
                Ok(entries)
            }
        }
    }

    /// Delete from both stores independently; a memory that survived only
    /// in the mirror must still be deletable. Returns true if either store
    /// removed something.
    pub async fn delete(&self, name: &str, project: Option<&str>) -> Result<bool, StoreError> {
        let file_result = self.files.delete(name, project).await;

        let removed_row = match &self.mirror {
            Some(mirror) => match mirror.delete(name, project).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(name, error = %e, "mirror delete failed");
                    false
                }
            },
            None => false,
        };

        let removed_file = file_result?;
        Ok(removed_file || removed_row)
    }

    /// Semantic search. Requires a configured mirror; there is no
    /// brute-force fallback over the file tree. An unavailable embedding
    /// degrades to an empty result set rather than an error.
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let mirror = self.mirror.as_ref().ok_or(StoreError::MirrorNotConfigured)?;

        let query_embedding = match &self.embedder {
            Some(embedder) => embedder.generate(query).await,
            None => None,
        };
        let Some(query_embedding) = query_embedding else {
            warn!("no query embedding available, returning empty search result");
            return Ok(Vec::new());
        };

        let rows = mirror.similarity_search(&query_embedding, &options).await?;
        Ok(rows
            .into_iter()
            .map(|(memory, score)| {
                let path = self.files.resolve_path(&memory.name, memory.project.as_deref());
                SearchResult {
                    memory,
                    score,
                    path,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// In-process mirror with real similarity math, for orchestrator tests.
    #[derive(Debug, Default)]
    struct FakeMirror {
        rows: Mutex<HashMap<(String, String), (Memory, Option<Vec<f32>>)>>,
    }

    impl FakeMirror {
        fn key(name: &str, project: Option<&str>) -> (String, String) {
            (name.to_string(), project.unwrap_or("").to_string())
        }

        fn insert(&self, memory: Memory, embedding: Option<Vec<f32>>) {
            let key = Self::key(&memory.name, memory.project.as_deref());
            self.rows.lock().unwrap().insert(key, (memory, embedding));
        }

        fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
            let dot_product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
            let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                return 0.0;
            }
            dot_product / (norm_a * norm_b)
        }
    }

    #[async_trait]
    impl MemoryMirror for FakeMirror {
        async fn upsert(
            &self,
            memory: &Memory,
            embedding: Option<&[f32]>,
        ) -> Result<(), StoreError> {
            let key = Self::key(&memory.name, memory.project.as_deref());
            let mut rows = self.rows.lock().unwrap();
            let kept = match (&embedding, rows.get(&key)) {
                // An absent embedding never clears a stored one.
                (None, Some((_, existing))) => existing.clone(),
                _ => embedding.map(<[f32]>::to_vec),
            };
            rows.insert(key, (memory.clone(), kept));
            Ok(())
        }

        async fn fetch(
            &self,
            name: &str,
            project: Option<&str>,
        ) -> Result<Option<Memory>, StoreError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.get(&Self::key(name, project)).map(|(m, _)| m.clone()))
        }

        async fn delete(&self, name: &str, project: Option<&str>) -> Result<bool, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            Ok(rows.remove(&Self::key(name, project)).is_some())
        }

        async fn list(
            &self,
            project: Option<&str>,
            category: Option<&str>,
        ) -> Result<Vec<MemorySummary>, StoreError> {
            let rows = self.rows.lock().unwrap();
            let partition = project.unwrap_or("");
            let mut summaries: Vec<MemorySummary> = rows
                .values()
                .filter(|(m, _)| m.project.as_deref().unwrap_or("") == partition)
                .filter(|(m, _)| category.is_none() || m.category.as_deref() == category)
                .map(|(m, _)| MemorySummary {
                    name: m.name.clone(),
                    category: m.category.clone(),
                    project: m.project.clone(),
                    tags: m.tags.clone(),
                    size_bytes: m.content.len() as u64,
                    created_at: m.created_at,
                    updated_at: m.updated_at,
                })
                .collect();
            summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(summaries)
        }

        async fn similarity_search(
            &self,
            query: &[f32],
            options: &SearchOptions,
        ) -> Result<Vec<(Memory, f32)>, StoreError> {
            let rows = self.rows.lock().unwrap();
            let mut matches: Vec<(Memory, f32)> = rows
                .values()
                .filter_map(|(m, embedding)| {
                    let embedding = embedding.as_ref()?;
                    let score = Self::cosine_similarity(query, embedding);
                    (score >= options.threshold).then(|| (m.clone(), score))
                })
                .filter(|(m, _)| {
                    options.project.is_none() || m.project == options.project
                })
                .filter(|(m, _)| {
                    options.category.is_none() || m.category == options.category
                })
                .collect();
            matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            matches.truncate(options.limit);
            Ok(matches)
        }
    }

    /// Mirror that is configured but unreachable.
    #[derive(Debug)]
    struct DownMirror;

    #[async_trait]
    impl MemoryMirror for DownMirror {
        async fn upsert(&self, _: &Memory, _: Option<&[f32]>) -> Result<(), StoreError> {
            Err(StoreError::MirrorUnavailable("connection refused".into()))
        }
        async fn fetch(&self, _: &str, _: Option<&str>) -> Result<Option<Memory>, StoreError> {
            Err(StoreError::MirrorUnavailable("connection refused".into()))
        }
        async fn delete(&self, _: &str, _: Option<&str>) -> Result<bool, StoreError> {
            Err(StoreError::MirrorUnavailable("connection refused".into()))
        }
        async fn list(
            &self,
            _: Option<&str>,
            _: Option<&str>,
        ) -> Result<Vec<MemorySummary>, StoreError> {
            Err(StoreError::MirrorUnavailable("connection refused".into()))
        }
        async fn similarity_search(
            &self,
            _: &[f32],
            _: &SearchOptions,
        ) -> Result<Vec<(Memory, f32)>, StoreError> {
            Err(StoreError::MirrorUnavailable("connection refused".into()))
        }
    }

    /// Embedder that maps texts about eviction near each other and
    /// everything else onto an orthogonal axis.
    #[derive(Debug)]
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn generate(&self, text: &str) -> Option<Vec<f32>> {
            if text.contains("eviction") {
                Some(vec![0.9, 0.1, 0.0])
            } else {
                Some(vec![0.0, 0.1, 0.9])
            }
        }
    }

    /// Embedder whose backing service is down.
    #[derive(Debug)]
    struct UnavailableEmbedder;

    #[async_trait]
    impl Embedder for UnavailableEmbedder {
        async fn generate(&self, _: &str) -> Option<Vec<f32>> {
            None
        }
    }

    fn file_only_service(dir: &std::path::Path) -> MemoryService {
        MemoryService::new(FileStore::new(dir), None, None)
    }

    fn mirrored_service(dir: &std::path::Path, mirror: Arc<FakeMirror>) -> MemoryService {
        MemoryService::new(
            FileStore::new(dir),
            Some(mirror),
            Some(Arc::new(StubEmbedder)),
        )
    }

    fn sample_memory(name: &str, content: &str, project: Option<&str>) -> Memory {
        let now = Utc::now();
        Memory {
            name: name.to_string(),
            content: content.to_string(),
            category: None,
            project: project.map(str::to_string),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn test_write_then_read_scenario() {
        let dir = tempdir().unwrap();
        let service = file_only_service(dir.path());

        service
            .write(
                "release-notes",
                "v1 shipped",
                WriteOptions {
                    project: Some("acme".to_string()),
                    ..WriteOptions::default()
                },
            )
            .await
            .unwrap();

        let read = service
            .read("release-notes", Some("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.content, "v1 shipped");
        assert!(read.category.is_none());
    }

    #[tokio::test]
    async fn test_rewrite_preserves_created_at() {
        let dir = tempdir().unwrap();
        let service = file_only_service(dir.path());
        let options = || WriteOptions {
            project: Some("acme".to_string()),
            ..WriteOptions::default()
        };

        service
            .write("release-notes", "v1 shipped", options())
            .await
            .unwrap();
        let first = service
            .read("release-notes", Some("acme"))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        service
            .write("release-notes", "v2 shipped", options())
            .await
            .unwrap();
        let second = service
            .read("release-notes", Some("acme"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.content, "v2 shipped");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn test_read_missing_is_none_not_error() {
        let dir = tempdir().unwrap();
        let service = file_only_service(dir.path());
        assert!(service.read("missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_on_empty_store_is_false() {
        let dir = tempdir().unwrap();
        let service = file_only_service(dir.path());
        assert!(!service.delete("missing", Some("none")).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_reaches_both_stores() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        let service = mirrored_service(dir.path(), Arc::clone(&mirror));

        let path = service
            .write("topic-a", "Building a cache eviction policy", WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("topic-a.md"));

        assert!(service.file_store().read("topic-a", None).await.unwrap().is_some());
        let row = mirror.fetch("topic-a", None).await.unwrap().unwrap();
        assert_eq!(row.content, "Building a cache eviction policy");
    }

    #[tokio::test]
    async fn test_read_falls_back_to_mirror() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        mirror.insert(sample_memory("only-mirrored", "survived the wipe", None), None);
        let service = mirrored_service(dir.path(), mirror);

        let read = service.read("only-mirrored", None).await.unwrap().unwrap();
        assert_eq!(read.content, "survived the wipe");
    }

    #[tokio::test]
    async fn test_list_falls_back_when_file_store_empty() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        mirror.insert(sample_memory("a", "one", Some("acme")), None);
        mirror.insert(sample_memory("b", "two", Some("acme")), None);
        let service = mirrored_service(dir.path(), mirror);

        let listed = service
            .list(ListFilter {
                project: Some("acme".to_string()),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_list_prefers_non_empty_file_store() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        mirror.insert(sample_memory("stale", "mirror-only", None), None);
        let service = mirrored_service(dir.path(), Arc::clone(&mirror));

        service
            .write("fresh", "on disk", WriteOptions::default())
            .await
            .unwrap();

        let listed = service.list(ListFilter::default()).await.unwrap();
        // File view is authoritative when non-empty: 'fresh' plus nothing
        // from the mirror besides its own upserted copy.
        assert!(listed.iter().any(|s| s.name == "fresh"));
        assert!(!listed.iter().any(|s| s.name == "stale"));
    }

    #[tokio::test]
    async fn test_mirror_fallback_applies_tag_filter() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        let mut tagged = sample_memory("tagged", "one", None);
        tagged.tags = vec!["keep".to_string()];
        mirror.insert(tagged, None);
        mirror.insert(sample_memory("untagged", "two", None), None);
        let service = mirrored_service(dir.path(), mirror);

        let listed = service
            .list(ListFilter {
                tags: vec!["keep".to_string()],
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "tagged");
    }

    #[tokio::test]
    async fn test_delete_mirror_only_memory_returns_true() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        mirror.insert(sample_memory("ghost", "mirror only", None), None);
        let service = mirrored_service(dir.path(), Arc::clone(&mirror));

        assert!(service.delete("ghost", None).await.unwrap());
        assert!(mirror.fetch("ghost", None).await.unwrap().is_none());
        assert!(!service.delete("ghost", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_finds_similar_memory() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        let service = mirrored_service(dir.path(), mirror);

        service
            .write("topic-a", "Building a cache eviction policy", WriteOptions::default())
            .await
            .unwrap();
        service
            .write("topic-b", "Notes from the offsite", WriteOptions::default())
            .await
            .unwrap();

        let results = service
            .search(
                "eviction strategy",
                SearchOptions {
                    threshold: 0.5,
                    limit: 5,
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();

        assert!(results.iter().any(|r| r.memory.name == "topic-a"));
        assert!(!results.iter().any(|r| r.memory.name == "topic-b"));
        let hit = results.iter().find(|r| r.memory.name == "topic-a").unwrap();
        assert_eq!(hit.path, dir.path().join("topic-a.md"));
        assert!(hit.score >= 0.5);
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_threshold() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        let service = mirrored_service(dir.path(), Arc::clone(&mirror));

        for i in 0..4 {
            service
                .write(
                    &format!("eviction-{i}"),
                    "another eviction note",
                    WriteOptions::default(),
                )
                .await
                .unwrap();
        }
        // A row without an embedding must never be returned.
        mirror.insert(sample_memory("no-embedding", "eviction too", None), None);

        let results = service
            .search(
                "eviction strategy",
                SearchOptions {
                    threshold: 0.5,
                    limit: 2,
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score >= 0.5));
        assert!(!results.iter().any(|r| r.memory.name == "no-embedding"));
    }

    #[tokio::test]
    async fn test_search_without_mirror_is_hard_error() {
        let dir = tempdir().unwrap();
        let service = file_only_service(dir.path());
        let result = service.search("anything", SearchOptions::default()).await;
        assert!(matches!(result, Err(StoreError::MirrorNotConfigured)));
    }

    #[tokio::test]
    async fn test_search_with_unavailable_embedder_is_empty() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());
        let service = MemoryService::new(
            FileStore::new(dir.path()),
            Some(mirror),
            Some(Arc::new(UnavailableEmbedder)),
        );
        let results = service
            .search("anything", SearchOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_operations_degrade_when_mirror_is_down() {
        let dir = tempdir().unwrap();
        let service = MemoryService::new(
            FileStore::new(dir.path()),
            Some(Arc::new(DownMirror)),
            None,
        );

        // Write, read, list and delete all survive an unreachable mirror.
        service
            .write("resilient", "still durable", WriteOptions::default())
            .await
            .unwrap();
        let read = service.read("resilient", None).await.unwrap().unwrap();
        assert_eq!(read.content, "still durable");
        let listed = service.list(ListFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(service.delete("resilient", None).await.unwrap());

        // Search does not: there is no substitute path.
        let service = MemoryService::new(
            FileStore::new(dir.path()),
            Some(Arc::new(DownMirror)),
            Some(Arc::new(StubEmbedder)),
        );
        let result = service.search("anything", SearchOptions::default()).await;
        assert!(matches!(result, Err(StoreError::MirrorUnavailable(_))));
    }

    #[tokio::test]
    async fn test_upsert_without_embedding_keeps_stored_one() {
        let dir = tempdir().unwrap();
        let mirror = Arc::new(FakeMirror::default());

        // First write with an embedder, second without one.
        let service = mirrored_service(dir.path(), Arc::clone(&mirror));
        service
            .write("note", "eviction details", WriteOptions::default())
            .await
            .unwrap();

        let degraded = MemoryService::new(
            FileStore::new(dir.path()),
            Some(Arc::clone(&mirror) as Arc<dyn MemoryMirror>),
            Some(Arc::new(UnavailableEmbedder)),
        );
        degraded
            .write("note", "eviction details, revised", WriteOptions::default())
            .await
            .unwrap();

        let results = degraded_search_via(&mirror).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.content, "eviction details, revised");
    }

    async fn degraded_search_via(mirror: &FakeMirror) -> Vec<(Memory, f32)> {
        mirror
            .similarity_search(
                &[0.9, 0.1, 0.0],
                &SearchOptions {
                    threshold: 0.5,
                    limit: 5,
                    ..SearchOptions::default()
                },
            )
            .await
            .unwrap()
    }
}
