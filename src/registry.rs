use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::config::AppConfig;
use crate::models::{IndexStatus, IndexedDocument};

/// Local record of what has been pushed to each vector store collection,
/// plus the history of index jobs.
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage_dir).await?;
        Self::open(&config.sqlite_dsn()).await
    }

    pub async fn open(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let registry = Self { pool };
        registry.migrate().await?;
        Ok(registry)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                source TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                byte_len INTEGER NOT NULL,
                indexed_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE TABLE IF NOT EXISTS index_jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                message TEXT,
                total_files INTEGER NOT NULL,
                indexed_count INTEGER NOT NULL,
                skipped_count INTEGER NOT NULL,
                removed_count INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_documents(&self, documents: &[IndexedDocument]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for doc in documents {
            sqlx::query(
                r#"
                INSERT INTO collection_documents
                    (collection, id, source, content_hash, byte_len, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    source = excluded.source,
                    content_hash = excluded.content_hash,
                    byte_len = excluded.byte_len,
                    indexed_at = excluded.indexed_at
                "#,
            )
            .bind(&doc.collection)
            .bind(&doc.id)
            .bind(&doc.source)
            .bind(&doc.content_hash)
            .bind(doc.byte_len)
            .bind(doc.indexed_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_documents(&self, collection: &str) -> Result<Vec<IndexedDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT collection, id, source, content_hash, byte_len, indexed_at
            FROM collection_documents
            WHERE collection = ?
            ORDER BY id ASC
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_document).collect())
    }

    /// Document id -> content hash for every document registered against
    /// `collection`.
    pub async fn document_hashes(&self, collection: &str) -> Result<HashMap<String, String>> {
        let rows =
            sqlx::query("SELECT id, content_hash FROM collection_documents WHERE collection = ?")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<String, _>("content_hash")))
            .collect())
    }

    pub async fn delete_documents(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM collection_documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_documents(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM collection_documents WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_index_status(&self, status: &IndexStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO index_jobs (job_id, status, stage, message, total_files, indexed_count,
                                    skipped_count, removed_count, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                stage = excluded.stage,
                message = excluded.message,
                total_files = excluded.total_files,
                indexed_count = excluded.indexed_count,
                skipped_count = excluded.skipped_count,
                removed_count = excluded.removed_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&status.job_id)
        .bind(&status.status)
        .bind(&status.stage)
        .bind(&status.message)
        .bind(status.total_files)
        .bind(status.indexed_count)
        .bind(status.skipped_count)
        .bind(status.removed_count)
        .bind(status.started_at.to_rfc3339())
        .bind(status.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_index_status(&self, job_id: &str) -> Result<Option<IndexStatus>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, status, stage, message, total_files, indexed_count, skipped_count,
                   removed_count, started_at, updated_at
            FROM index_jobs
            WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IndexStatus {
            job_id: r.get("job_id"),
            status: r.get("status"),
            stage: r.get("stage"),
            message: r.get("message"),
            total_files: r.get("total_files"),
            indexed_count: r.get("indexed_count"),
            skipped_count: r.get("skipped_count"),
            removed_count: r.get("removed_count"),
            started_at: parse_timestamp(&r.get::<String, _>("started_at")),
            updated_at: parse_timestamp(&r.get::<String, _>("updated_at")),
        }))
    }
}

fn row_to_document(row: SqliteRow) -> IndexedDocument {
    IndexedDocument {
        collection: row.get("collection"),
        id: row.get("id"),
        source: row.get("source"),
        content_hash: row.get("content_hash"),
        byte_len: row.get("byte_len"),
        indexed_at: parse_timestamp(&row.get::<String, _>("indexed_at")),
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
