//! Vector collection backed by SQLite.
//!
//! Every point lives in one shared collection; tenant isolation comes only
//! from payload filters (`workspace_id`, `conversation_id`). Embeddings are
//! stored as little-endian `f32` BLOBs and searched by brute-force cosine
//! similarity.

mod models;

pub use models::{
    BatchIngestRequest, BatchIngestResponse, ChunkPayload, DeleteResponse, HealthResponse,
    IngestRequest, IngestResponse, SearchHit, SearchRequest, point_id,
};

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::chunking::Chunker;
use crate::embeddings::{EmbedMode, EmbeddingGenerator};
use crate::error::{DatabaseError, ServiceError, ServiceResult};

/// Store for embedded document chunks
pub struct VectorStore {
    conn: Mutex<Connection>,
    collection: String,
    embeddings: Arc<EmbeddingGenerator>,
    chunker: Chunker,
}

struct StoredPoint {
    document_id: String,
    workspace_id: String,
    conversation_id: Option<String>,
    chunk_index: i64,
    content: String,
    metadata: Option<String>,
    embedding: Vec<u8>,
}

impl VectorStore {
    /// Open or create the store at the given path and make sure the collection exists
    pub fn open(
        path: &Path,
        collection: &str,
        embeddings: Arc<EmbeddingGenerator>,
        chunker: Chunker,
    ) -> ServiceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ServiceError::Config {
                message: format!("cannot create directory {}: {}", parent.display(), e),
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(DatabaseError::Query)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                distance TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS points (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                conversation_id TEXT,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT,
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_points_document ON points(collection, document_id);
            CREATE INDEX IF NOT EXISTS idx_points_workspace ON points(collection, workspace_id);
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: e.to_string(),
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
            embeddings,
            chunker,
        };
        store.ensure_collection()?;
        Ok(store)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the collection if it does not exist. Returns whether it was created.
    pub fn ensure_collection(&self) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();
        let dimension = self.embeddings.dimension();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?1",
                params![self.collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        match existing {
            Some(stored) if stored as usize == dimension => {
                debug!(collection = %self.collection, "Collection exists");
                Ok(false)
            }
            Some(stored) => Err(ServiceError::Config {
                message: format!(
                    "collection {} has dimension {}, embeddings produce {}",
                    self.collection, stored, dimension
                ),
            }),
            None => {
                conn.execute(
                    "INSERT INTO collections (name, dimension, distance, created_at) VALUES (?1, ?2, 'cosine', ?3)",
                    params![
                        self.collection,
                        dimension as i64,
                        chrono::Utc::now().to_rfc3339()
                    ],
                )
                .map_err(DatabaseError::Query)?;
                info!(collection = %self.collection, dimension, "Created vector collection");
                Ok(true)
            }
        }
    }

    /// Embed and upsert points. Existing points with the same id are overwritten.
    pub async fn upsert(&self, points: Vec<ChunkPayload>) -> ServiceResult<usize> {
        self.write_points(points, None).await
    }

    /// Chunk, embed, and upsert a whole document.
    ///
    /// Points of the same document beyond the new chunk count are removed, so
    /// re-ingesting shorter content never leaves stale chunks behind.
    pub async fn index_document(&self, request: &IngestRequest) -> ServiceResult<usize> {
        request.validate()?;

        let points: Vec<ChunkPayload> = self
            .chunker
            .chunk(request.content.trim())
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| request.payload_for_chunk(index, chunk))
            .collect();

        let count = self
            .write_points(points, Some(request.document_id.as_str()))
            .await?;

        info!(doc_id = %request.document_id, chunks = count, "Indexed document");
        Ok(count)
    }

    async fn write_points(
        &self,
        points: Vec<ChunkPayload>,
        prune_document: Option<&str>,
    ) -> ServiceResult<usize> {
        let passages: Vec<String> = points.iter().map(|p| p.content.clone()).collect();
        let vectors = self.embeddings.embed_passages(&passages).await?;

        let now = chrono::Utc::now().to_rfc3339();
        let count = points.len();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        for (payload, vector) in points.iter().zip(vectors.iter()) {
            let metadata =
                serde_json::to_string(&payload.extra).map_err(DatabaseError::Serialization)?;

            tx.execute(
                r#"
                INSERT INTO points (collection, id, document_id, workspace_id, conversation_id, chunk_index, content, metadata, embedding, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    workspace_id = excluded.workspace_id,
                    conversation_id = excluded.conversation_id,
                    chunk_index = excluded.chunk_index,
                    content = excluded.content,
                    metadata = excluded.metadata,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
                params![
                    self.collection,
                    payload.point_id().to_string(),
                    payload.document_id,
                    payload.workspace_id,
                    payload.conversation_id,
                    payload.chunk_index as i64,
                    payload.content,
                    metadata,
                    embedding_to_bytes(vector),
                    now,
                ],
            )
            .map_err(DatabaseError::Query)?;
        }

        if let Some(document_id) = prune_document {
            let pruned = tx
                .execute(
                    "DELETE FROM points WHERE collection = ?1 AND document_id = ?2 AND chunk_index >= ?3",
                    params![self.collection, document_id, count as i64],
                )
                .map_err(DatabaseError::Query)?;
            if pruned > 0 {
                debug!(doc_id = %document_id, pruned, "Pruned stale chunks");
            }
        }

        tx.commit().map_err(DatabaseError::Query)?;

        metrics::counter!("archivist_chunks_indexed_total").increment(count as u64);
        Ok(count)
    }

    /// Scoped semantic search.
    ///
    /// With a conversation, points of that conversation and points with no
    /// conversation are both eligible. Results scoring below the threshold are
    /// dropped before the limit is applied.
    pub async fn search(&self, request: &SearchRequest) -> ServiceResult<Vec<SearchHit>> {
        request.validate()?;
        metrics::counter!("archivist_searches_total").increment(1);

        let query = request.query.trim();
        let query_embedding = self.embeddings.embed(query, EmbedMode::Query).await?;

        let mut sql = String::from(
            "SELECT document_id, workspace_id, conversation_id, chunk_index, content, metadata, embedding \
             FROM points WHERE collection = ?1",
        );
        let mut args: Vec<&str> = vec![self.collection.as_str()];

        if let Some(workspace_id) = request.workspace_id.as_deref() {
            args.push(workspace_id);
            sql.push_str(&format!(" AND workspace_id = ?{}", args.len()));
        }
        if let Some(conversation_id) = request.conversation_id.as_deref() {
            args.push(conversation_id);
            sql.push_str(&format!(
                " AND (conversation_id IS NULL OR conversation_id = ?{})",
                args.len()
            ));
        }

        let candidates: Vec<StoredPoint> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;
            stmt.query_map(params_from_iter(args.iter()), |row| {
                Ok(StoredPoint {
                    document_id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    conversation_id: row.get(2)?,
                    chunk_index: row.get(3)?,
                    content: row.get(4)?,
                    metadata: row.get(5)?,
                    embedding: row.get(6)?,
                })
            })
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?
        };

        let mut hits = Vec::new();
        for point in candidates {
            let score = cosine_similarity(&query_embedding, &bytes_to_embedding(&point.embedding));
            if score < request.threshold {
                continue;
            }
            hits.push((score, point));
        }

        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(request.limit);

        let results = hits
            .into_iter()
            .map(|(score, point)| point.into_hit(score))
            .collect::<ServiceResult<Vec<_>>>()?;

        debug!(
            results = results.len(),
            workspace_id = ?request.workspace_id,
            conversation_id = ?request.conversation_id,
            "Search completed"
        );
        Ok(results)
    }

    /// Remove every point of a document. Removing nothing is not an error.
    pub fn delete_document(&self, document_id: &str) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn
            .execute(
                "DELETE FROM points WHERE collection = ?1 AND document_id = ?2",
                params![self.collection, document_id],
            )
            .map_err(DatabaseError::Query)?;

        info!(doc_id = %document_id, removed, "Deleted document points");
        Ok(removed)
    }

    pub fn count_document_points(&self, document_id: &str) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM points WHERE collection = ?1 AND document_id = ?2",
                params![self.collection, document_id],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }

    /// Total points in the collection; fails if the database is unusable
    pub fn health(&self) -> ServiceResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM points WHERE collection = ?1",
                params![self.collection],
                |row| row.get(0),
            )
            .map_err(DatabaseError::Query)?;
        Ok(count as usize)
    }
}

impl StoredPoint {
    fn into_hit(self, score: f32) -> ServiceResult<SearchHit> {
        let extra = match self.metadata {
            Some(json) => serde_json::from_str(&json).map_err(DatabaseError::Serialization)?,
            None => serde_json::Map::new(),
        };

        let payload = ChunkPayload {
            chunk_id: models::chunk_key(&self.document_id, self.chunk_index as usize),
            document_id: self.document_id,
            workspace_id: self.workspace_id,
            conversation_id: self.conversation_id,
            chunk_index: self.chunk_index as usize,
            content: self.content,
            extra,
        };

        Ok(SearchHit {
            metadata: payload.to_metadata(),
            document_id: payload.document_id,
            content: payload.content,
            score,
        })
    }
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
