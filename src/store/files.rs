//! Canonical file-tree store: one directory per project, one frontmatter
//! file per memory.
//!
//! This store is the authoritative representation whenever it is non-empty.
//! Files are human-editable; writes go through a temp-file-then-rename so
//! concurrent readers never observe a torn file.

use super::{StoreError, tags_intersect};
use crate::domain::{Memory, MemorySummary};
use crate::frontmatter::{self, Frontmatter, Value};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// File suffix for serialized memories.
pub const MEMORY_SUFFIX: &str = ".md";

#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Pure, deterministic path computation:
    /// `<base>/<project>/<name>.md`, or `<base>/<name>.md` for the global
    /// partition. Does not touch the filesystem.
    pub fn resolve_path(&self, name: &str, project: Option<&str>) -> PathBuf {
        self.partition_dir(project)
            .join(format!("{name}{MEMORY_SUFFIX}"))
    }

    fn partition_dir(&self, project: Option<&str>) -> PathBuf {
        match project {
            Some(project) => self.base_dir.join(project),
            None => self.base_dir.clone(),
        }
    }

    /// Serialize and durably write one memory, creating the partition
    /// directory as needed. The write is an atomic replace.
    pub async fn write(&self, memory: &Memory) -> Result<PathBuf, StoreError> {
        validate_component(&memory.name)?;
        if let Some(project) = &memory.project {
            validate_component(project)?;
        }

        let dir = self.partition_dir(memory.project.as_deref());
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.resolve_path(&memory.name, memory.project.as_deref());
        // The temp name must be unique per write: concurrent writers of the
        // same key each publish only their own complete bytes via rename.
        static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);
        let tmp = dir.join(format!(
            "{}{MEMORY_SUFFIX}.{}.{}.tmp",
            memory.name,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let blob = frontmatter::serialize_memory(memory);

        tokio::fs::write(&tmp, blob.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(name = %memory.name, path = %path.display(), "memory file written");
        Ok(path)
    }

    /// Read one memory by key. Absence is `Ok(None)`; any other I/O failure
    /// propagates as a hard error.
    pub async fn read(
        &self,
        name: &str,
        project: Option<&str>,
    ) -> Result<Option<Memory>, StoreError> {
        validate_component(name)?;
        if let Some(project) = project {
            validate_component(project)?;
        }

        let path = self.resolve_path(name, project);
        let blob = match tokio::fs::read_to_string(&path).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let fallback = file_modified_time(&path).await;
        Ok(Some(memory_from_blob(name, project, &blob, fallback)))
    }

    /// Enumerate memory files in one partition, parsing each header into a
    /// summary. Files that fail to read or decode are skipped, not fatal.
    pub async fn list(
        &self,
        project: Option<&str>,
        category: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<MemorySummary>, StoreError> {
        if let Some(project) = project {
            validate_component(project)?;
        }

        let dir = self.partition_dir(project);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(name) = file_name.strip_suffix(MEMORY_SUFFIX) else {
                continue;
            };

            let path = entry.path();
            let blob = match tokio::fs::read_to_string(&path).await {
                Ok(blob) => blob,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable memory file");
                    continue;
                }
            };

            let fallback = file_modified_time(&path).await;
            let memory = memory_from_blob(name, project, &blob, fallback);

            if category.is_some() && memory.category.as_deref() != category {
                continue;
            }
            if !tags_intersect(&memory.tags, tags) {
                continue;
            }

            summaries.push(MemorySummary {
                name: memory.name,
                category: memory.category,
                project: memory.project,
                tags: memory.tags,
                size_bytes: memory.content.len() as u64,
                created_at: memory.created_at,
                updated_at: memory.updated_at,
            });
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// Remove the file if present. Returns whether a removal occurred;
    /// absence is not an error.
    pub async fn delete(&self, name: &str, project: Option<&str>) -> Result<bool, StoreError> {
        validate_component(name)?;
        if let Some(project) = project {
            validate_component(project)?;
        }

        let path = self.resolve_path(name, project);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(name, path = %path.display(), "memory file removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Names and projects become single path components; anything that could
/// escape the base directory is rejected before any I/O.
fn validate_component(value: &str) -> Result<(), StoreError> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
    {
        return Err(StoreError::InvalidName(value.to_string()));
    }
    Ok(())
}

async fn file_modified_time(path: &Path) -> DateTime<Utc> {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified),
        Err(_) => Utc::now(),
    }
}

/// Interpret a parsed document as a memory. The partition directory, not the
/// header, decides the project; header timestamps fall back to the file's
/// mtime when missing or malformed.
fn memory_from_blob(
    name: &str,
    project: Option<&str>,
    blob: &str,
    fallback: DateTime<Utc>,
) -> Memory {
    let (header, body) = frontmatter::parse(blob);
    Memory {
        name: name.to_string(),
        content: body.to_string(),
        category: header
            .get("category")
            .and_then(Value::as_text)
            .map(str::to_string),
        project: project.map(str::to_string),
        tags: header
            .get("tags")
            .and_then(Value::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default(),
        created_at: header_timestamp(&header, "createdAt").unwrap_or(fallback),
        updated_at: header_timestamp(&header, "updatedAt").unwrap_or(fallback),
        embedding: None,
    }
}

fn header_timestamp(header: &Frontmatter, key: &str) -> Option<DateTime<Utc>> {
    header
        .get(key)
        .and_then(Value::as_text)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
}
