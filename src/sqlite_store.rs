//! SQLite-backed [`VectorStore`] and [`DocumentStore`].
//!
//! Embeddings live in a text column as `"[v1, v2, ...]"` and similarity is
//! computed in process: rows matching the filter are loaded, parsed and
//! ranked by cosine similarity.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use docrag_core::embedding::{cosine_similarity, format_vector, parse_vector};
use docrag_core::models::{Document, VectorMetadata, VectorRecord};
use docrag_core::store::{
    sort_by_similarity, DocumentStore, ScoredVector, SearchFilter, VectorStore,
};

/// SQLite implementation of both store traits over one pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Document {
    let metadata_json: String = row.get("metadata_json");
    let filename: String = row.get("filename");
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
        warn!(document = %filename, "unreadable document metadata: {}", e);
        Default::default()
    });
    Document {
        id: row.get("id"),
        filename,
        content: row.get("content"),
        metadata,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_record(row: &SqliteRow) -> Option<VectorRecord> {
    let id: String = row.get("id");
    let embedding: String = row.get("embedding");
    let metadata_json: String = row.get("metadata_json");

    let embedding = match parse_vector(&embedding) {
        Ok(v) => v,
        Err(e) => {
            warn!(vector = %id, "skipping unreadable embedding: {:#}", e);
            return None;
        }
    };
    let metadata: VectorMetadata = match serde_json::from_str(&metadata_json) {
        Ok(m) => m,
        Err(e) => {
            warn!(vector = %id, "skipping unreadable vector metadata: {}", e);
            return None;
        }
    };

    Some(VectorRecord {
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        embedding,
        content: row.get("content"),
        metadata,
    })
}

const INSERT_VECTOR: &str = r#"
    INSERT INTO document_vectors (id, document_id, chunk_index, level, embedding, content, metadata_json)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl VectorStore for SqliteStore {
    async fn create_vector(&self, record: &VectorRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(INSERT_VECTOR)
            .bind(&id)
            .bind(&record.document_id)
            .bind(record.chunk_index)
            .bind(record.metadata.level.as_u8() as i64)
            .bind(format_vector(&record.embedding))
            .bind(&record.content)
            .bind(serde_json::to_string(&record.metadata)?)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn create_vectors_batch(&self, records: &[VectorRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(INSERT_VECTOR)
                .bind(Uuid::new_v4().to_string())
                .bind(&record.document_id)
                .bind(record.chunk_index)
                .bind(record.metadata.level.as_u8() as i64)
                .bind(format_vector(&record.embedding))
                .bind(&record.content)
                .bind(serde_json::to_string(&record.metadata)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn similarity_search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredVector>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, document_id, chunk_index, embedding, content, metadata_json \
             FROM document_vectors WHERE 1 = 1",
        );
        if let Some(document_id) = &filter.document_id {
            qb.push(" AND document_id = ").push_bind(document_id.clone());
        }
        if let Some(levels) = &filter.levels {
            qb.push(" AND level IN (");
            let mut separated = qb.separated(", ");
            for level in levels {
                separated.push_bind(level.as_u8() as i64);
            }
            separated.push_unseparated(")");
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut results: Vec<ScoredVector> = rows
            .iter()
            .filter_map(row_to_record)
            .map(|record| ScoredVector {
                similarity: cosine_similarity(embedding, &record.embedding),
                record,
            })
            .collect();

        sort_by_similarity(&mut results);
        results.truncate(limit);
        Ok(results)
    }

    async fn delete_vectors_by_document(&self, document_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_vectors(&self, document_id: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_vectors WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, doc: &Document) -> Result<Document> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, content, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.content)
        .bind(serde_json::to_string(&doc.metadata)?)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;

        self.get_document(&doc.filename)
            .await?
            .ok_or_else(|| anyhow::anyhow!("document {} missing after upsert", doc.filename))
    }

    async fn get_document(&self, filename: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, filename, content, metadata_json, created_at, updated_at \
             FROM documents WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn get_all_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, filename, content, metadata_json, created_at, updated_at \
             FROM documents ORDER BY filename",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        // Explicit in case the connection was opened without foreign keys.
        sqlx::query("DELETE FROM document_vectors WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::{db, migrate};
    use docrag_core::models::{ChunkLevel, DocumentMetadata, IndexState};
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let config = parse_config(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("docrag.sqlite").display()
        ))
        .unwrap();
        let pool = db::connect(&config).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn doc(id: &str, filename: &str, content: &str, at: i64) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            content: content.to_string(),
            metadata: DocumentMetadata {
                confidence_data: None,
                chunk_count: 1,
                index_state: Some(IndexState::FullyIndexed),
            },
            created_at: at,
            updated_at: at,
        }
    }

    fn record(doc_id: &str, index: i64, embedding: Vec<f32>, meta: VectorMetadata) -> VectorRecord {
        VectorRecord {
            document_id: doc_id.to_string(),
            chunk_index: index,
            embedding,
            content: format!("content {}", index),
            metadata: meta,
        }
    }

    #[tokio::test]
    async fn test_upsert_by_filename() {
        let (_tmp, store) = open().await;
        let first = store.create_document(&doc("id-1", "a.txt", "v1", 10)).await.unwrap();
        let second = store.create_document(&doc("id-2", "a.txt", "v2", 20)).await.unwrap();

        assert_eq!(first.id, "id-1");
        assert_eq!(second.id, "id-1");
        assert_eq!(second.content, "v2");
        assert_eq!(second.created_at, 10);
        assert_eq!(second.updated_at, 20);
        assert_eq!(second.metadata.index_state, Some(IndexState::FullyIndexed));
        assert_eq!(store.get_all_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_and_filters() {
        let (_tmp, store) = open().await;
        store.create_document(&doc("d1", "a.txt", "x", 1)).await.unwrap();
        let records = vec![
            record("d1", 0, vec![1.0, 0.0, 0.0], VectorMetadata::chunk("a.txt")),
            record("d1", 1, vec![0.7, 0.7, 0.0], VectorMetadata::chunk("a.txt")),
            record("d1", 2, vec![0.0, 1.0, 0.0], VectorMetadata::chunk("a.txt")),
            record("d1", -2, vec![0.9, 0.1, 0.0], VectorMetadata::document_summary("a.txt")),
        ];
        assert_eq!(store.create_vectors_batch(&records).await.unwrap(), 4);

        let hits = store
            .similarity_search(&[1.0, 0.0, 0.0], 3, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].record.chunk_index, 0);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let summaries = store
            .similarity_search(
                &[1.0, 0.0, 0.0],
                10,
                &SearchFilter::levels(&[ChunkLevel::DocumentSummary]),
            )
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].record.metadata.level, ChunkLevel::DocumentSummary);
    }

    #[tokio::test]
    async fn test_delete_document_cascades() {
        let (_tmp, store) = open().await;
        store.create_document(&doc("d1", "a.txt", "x", 1)).await.unwrap();
        store
            .create_vector(&record("d1", 0, vec![1.0], VectorMetadata::chunk("a.txt")))
            .await
            .unwrap();
        assert_eq!(store.count_vectors("d1").await.unwrap(), 1);

        assert!(store.delete_document("d1").await.unwrap());
        assert_eq!(store.count_vectors("d1").await.unwrap(), 0);
        assert!(store.get_document("a.txt").await.unwrap().is_none());
        assert!(!store.delete_document("d1").await.unwrap());
    }

    #[tokio::test]
    async fn test_vector_round_trip() {
        let (_tmp, store) = open().await;
        store.create_document(&doc("d1", "a.txt", "x", 1)).await.unwrap();
        let embedding = vec![0.125f32, -3.5, 2.0e-3, 7.0];
        store
            .create_vector(&record(
                "d1",
                -1,
                embedding.clone(),
                VectorMetadata::group_summary("a.txt", 0, (0, 7)),
            ))
            .await
            .unwrap();

        let hits = store
            .similarity_search(&embedding, 1, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].record.embedding, embedding);
        assert_eq!(hits[0].record.metadata.chunk_range, Some((0, 7)));
    }
}
