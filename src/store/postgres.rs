//! Postgres/pgvector implementation of the memory mirror.
//!
//! Rows duplicate the file store's memories plus their embeddings. The
//! project partition is stored as `TEXT NOT NULL DEFAULT ''` so the
//! `(name, project)` unique key and `ON CONFLICT` behave with the global
//! partition; `None` maps to the empty string at this boundary.

use super::{MemoryMirror, StoreError};
use crate::domain::{Memory, MemorySummary, SearchOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

#[derive(Debug)]
pub struct PostgresMirror {
    pool: PgPool,
}

impl PostgresMirror {
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await
            .map_err(unavailable)?;

        // Run Migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::MirrorUnavailable(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MemoryMirror for PostgresMirror {
    async fn upsert(&self, memory: &Memory, embedding: Option<&[f32]>) -> Result<(), StoreError> {
        let embedding_vector = embedding.map(|e| Vector::from(e.to_vec()));

        sqlx::query(
            r#"
            INSERT INTO memories (name, project, content, category, tags, embedding, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name, project) DO UPDATE SET
                content = EXCLUDED.content,
                category = EXCLUDED.category,
                tags = EXCLUDED.tags,
                embedding = COALESCE(EXCLUDED.embedding, memories.embedding),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&memory.name)
        .bind(memory.project.as_deref().unwrap_or(""))
        .bind(&memory.content)
        .bind(memory.category.as_deref())
        .bind(&memory.tags)
        .bind(embedding_vector)
        .bind(memory.created_at)
        .bind(memory.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn fetch(
        &self,
        name: &str,
        project: Option<&str>,
    ) -> Result<Option<Memory>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT name, project, content, category, tags, created_at, updated_at
            FROM memories
            WHERE name = $1 AND project = $2
            "#,
        )
        .bind(name)
        .bind(project.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| memory_from_row(&row)).transpose()
    }

    async fn delete(&self, name: &str, project: Option<&str>) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM memories WHERE name = $1 AND project = $2")
            .bind(name)
            .bind(project.unwrap_or(""))
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(
        &self,
        project: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<MemorySummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, project, category, tags, octet_length(content) AS size_bytes,
                   created_at, updated_at
            FROM memories
            WHERE project = $1
              AND ($2::text IS NULL OR category = $2)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(project.unwrap_or(""))
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut summaries = Vec::new();
        for row in rows {
            let size_bytes: i32 = row.try_get("size_bytes").map_err(unavailable)?;
            summaries.push(MemorySummary {
                name: row.try_get("name").map_err(unavailable)?,
                category: row.try_get("category").map_err(unavailable)?,
                project: project_from_column(row.try_get("project").map_err(unavailable)?),
                tags: row.try_get("tags").map_err(unavailable)?,
                size_bytes: size_bytes.max(0) as u64,
                created_at: row.try_get("created_at").map_err(unavailable)?,
                updated_at: row.try_get("updated_at").map_err(unavailable)?,
            });
        }
        Ok(summaries)
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<(Memory, f32)>, StoreError> {
        let embedding_vector = Vector::from(query.to_vec());
        let limit_i64 = options.limit as i64;
        let threshold_f64 = f64::from(options.threshold);

        let rows = sqlx::query(
            r#"
            SELECT name, project, content, category, tags, created_at, updated_at,
                   1 - (embedding <=> $1) AS score
            FROM memories
            WHERE embedding IS NOT NULL
              AND ($2::text IS NULL OR project = $2)
              AND ($3::text IS NULL OR category = $3)
              AND 1 - (embedding <=> $1) >= $4
            ORDER BY embedding <=> $1
            LIMIT $5
            "#,
        )
        .bind(embedding_vector)
        .bind(options.project.as_deref())
        .bind(options.category.as_deref())
        .bind(threshold_f64)
        .bind(limit_i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut matches = Vec::new();
        for row in rows {
            let memory = memory_from_row(&row)?;
            // pgvector's distance operator yields f64.
            let score: f64 = row.try_get("score").map_err(unavailable)?;
            matches.push((memory, score as f32));
        }
        Ok(matches)
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::MirrorUnavailable(e.to_string())
}

fn project_from_column(project: String) -> Option<String> {
    if project.is_empty() { None } else { Some(project) }
}

fn memory_from_row(row: &sqlx::postgres::PgRow) -> Result<Memory, StoreError> {
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(unavailable)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(unavailable)?;
    Ok(Memory {
        name: row.try_get("name").map_err(unavailable)?,
        content: row.try_get("content").map_err(unavailable)?,
        category: row.try_get("category").map_err(unavailable)?,
        project: project_from_column(row.try_get("project").map_err(unavailable)?),
        tags: row.try_get("tags").map_err(unavailable)?,
        created_at,
        updated_at,
        // Embeddings stay in the database; callers never need them back.
        embedding: None,
    })
}
