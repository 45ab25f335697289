//! libSQL storage layer for the chunk index (offline mode).
//!
//! The [`Storage`] struct wraps a local libSQL database holding indexed
//! chunks, their embeddings, and a small registry of indexed documents.
//!
//! **Access rules:**
//! - `index` and the pipeline: read-write (sole writer) via [`Storage::open`]
//! - `search`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, Value, params};
use specweaver_shared::{Result, Segment, SpecWeaverError};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// A row of the document registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub name: String,
    pub page_count: usize,
    pub chunk_count: usize,
    pub indexed_at: String,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpecWeaverError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(SpecWeaverError::storage)?;

        let conn = db.connect().map_err(SpecWeaverError::storage)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SpecWeaverError::EmptyIndex);
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(SpecWeaverError::storage)?;

        let conn = db.connect().map_err(SpecWeaverError::storage)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        SpecWeaverError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SpecWeaverError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Insert a batch of segments in one transaction.
    pub async fn insert_chunks(&self, segments: &[Segment]) -> Result<()> {
        self.check_writable()?;
        if segments.is_empty() {
            return Ok(());
        }

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(SpecWeaverError::storage)?;
        insert_rows(&tx, segments).await?;
        tx.commit().await.map_err(SpecWeaverError::storage)?;
        Ok(())
    }

    /// Swap a document's chunks for `segments` in one transaction.
    /// Returns the number of chunks removed.
    pub async fn replace_document_chunks(
        &self,
        document_name: &str,
        segments: &[Segment],
    ) -> Result<usize> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(SpecWeaverError::storage)?;
        let removed = tx
            .execute(
                "DELETE FROM chunks WHERE document_name = ?1",
                params![document_name],
            )
            .await
            .map_err(SpecWeaverError::storage)?;
        insert_rows(&tx, segments).await?;
        tx.commit().await.map_err(SpecWeaverError::storage)?;
        Ok(removed as usize)
    }

    /// Delete all chunks and documents in one transaction. Returns the number
    /// of chunks removed.
    pub async fn clear(&self) -> Result<usize> {
        self.check_writable()?;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(SpecWeaverError::storage)?;
        let removed = tx
            .execute("DELETE FROM chunks", params![])
            .await
            .map_err(SpecWeaverError::storage)?;
        tx.execute("DELETE FROM documents", params![])
            .await
            .map_err(SpecWeaverError::storage)?;
        tx.commit().await.map_err(SpecWeaverError::storage)?;
        Ok(removed as usize)
    }

    /// Number of stored chunks.
    pub async fn count_chunks(&self) -> Result<usize> {
        let count = self
            .single_i64("SELECT COUNT(*) FROM chunks", params![])
            .await?;
        Ok(count as usize)
    }

    /// Highest chunk id ever stored, if any chunk exists.
    pub async fn max_chunk_id(&self) -> Result<Option<i64>> {
        let count = self.count_chunks().await?;
        if count == 0 {
            return Ok(None);
        }
        let max = self
            .single_i64("SELECT COALESCE(MAX(id), 0) FROM chunks", params![])
            .await?;
        Ok(Some(max))
    }

    /// Highest position index stored for a document, if it has chunks.
    pub async fn max_position(&self, document_name: &str) -> Result<Option<i64>> {
        let count = self
            .single_i64(
                "SELECT COUNT(*) FROM chunks WHERE document_name = ?1",
                params![document_name],
            )
            .await?;
        if count == 0 {
            return Ok(None);
        }
        let max = self
            .single_i64(
                "SELECT COALESCE(MAX(position_index), 0) FROM chunks WHERE document_name = ?1",
                params![document_name],
            )
            .await?;
        Ok(Some(max))
    }

    /// Load every segment ordered by id.
    pub async fn load_segments(&self) -> Result<Vec<Segment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, document_name, position_index, text, embedding
                 FROM chunks ORDER BY id",
                params![],
            )
            .await
            .map_err(SpecWeaverError::storage)?;

        let mut segments = Vec::new();
        while let Some(row) = rows.next().await.map_err(SpecWeaverError::storage)? {
            let blob: Vec<u8> = row.get(4).map_err(SpecWeaverError::storage)?;
            segments.push(Segment {
                id: row.get::<i64>(0).map_err(SpecWeaverError::storage)?,
                document_name: row.get::<String>(1).map_err(SpecWeaverError::storage)?,
                position_index: row.get::<i64>(2).map_err(SpecWeaverError::storage)?,
                text: row.get::<String>(3).map_err(SpecWeaverError::storage)?,
                embedding: decode_embedding(&blob)?,
            });
        }
        Ok(segments)
    }

    // -----------------------------------------------------------------------
    // Document registry
    // -----------------------------------------------------------------------

    /// Record (or refresh) a document after indexing.
    pub async fn upsert_document(
        &self,
        name: &str,
        page_count: usize,
        chunk_count: usize,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO documents (name, page_count, chunk_count, indexed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                   page_count = excluded.page_count,
                   chunk_count = excluded.chunk_count,
                   indexed_at = excluded.indexed_at",
                params![name, page_count as i64, chunk_count as i64, now.as_str()],
            )
            .await
            .map_err(SpecWeaverError::storage)?;
        Ok(())
    }

    /// List indexed documents by name.
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, page_count, chunk_count, indexed_at FROM documents ORDER BY name",
                params![],
            )
            .await
            .map_err(SpecWeaverError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(SpecWeaverError::storage)? {
            results.push(DocumentRecord {
                name: row.get::<String>(0).map_err(SpecWeaverError::storage)?,
                page_count: row.get::<i64>(1).map_err(SpecWeaverError::storage)? as usize,
                chunk_count: row.get::<i64>(2).map_err(SpecWeaverError::storage)? as usize,
                indexed_at: row.get::<String>(3).map_err(SpecWeaverError::storage)?,
            });
        }
        Ok(results)
    }

    async fn single_i64(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<i64> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(SpecWeaverError::storage)?;
        match rows.next().await.map_err(SpecWeaverError::storage)? {
            Some(row) => row.get::<i64>(0).map_err(SpecWeaverError::storage),
            None => Ok(0),
        }
    }
}

async fn insert_rows(conn: &Connection, segments: &[Segment]) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    for segment in segments {
        conn.execute(
            "INSERT INTO chunks (id, document_name, position_index, text, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                segment.id,
                segment.document_name.as_str(),
                segment.position_index,
                segment.text.as_str(),
                Value::Blob(encode_embedding(&segment.embedding)),
                now.as_str(),
            ],
        )
        .await
        .map_err(SpecWeaverError::storage)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Embedding encoding
// ---------------------------------------------------------------------------

/// Encode an embedding as little-endian `f32` bytes.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(SpecWeaverError::Storage(format!(
            "embedding blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
