use std::path::Path;

use corpus_model::{ChunkId, ChunkRecord, DocumentId, DocumentMeta};
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::debug;

use crate::{DocumentSummary, ScoredChunk, StoreError, StoreStats};

const DIMENSION_KEY: &str = "embedding_dimension";

const CHUNK_COLUMNS: &str =
    "chunk_id, doc_id, chunk_index, total_chunks, content, url, domain, title, publish_date, tags_json";

/// SQLite-backed chunk store. Embeddings live in a BLOB column next to
/// the chunk row; FTS5 keyword search is kept consistent by triggers.
///
/// The embedding dimension is fixed at `create` time and persisted in
/// `store_meta`, so every later writer and reader agrees on it.
pub struct SqliteStore {
    conn: Connection,
    dimension: usize,
}

impl SqliteStore {
    /// Create (or re-open) a file-backed store with a fixed embedding dimension.
    pub fn create<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::Validation("embedding dimension must be non-zero".into()));
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        match read_dimension(&conn)? {
            Some(existing) if existing != dimension => {
                return Err(StoreError::Backend(format!(
                    "store was created with dimension {existing}, requested {dimension}"
                )));
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                    params![DIMENSION_KEY, dimension.to_string()],
                )?;
            }
        }
        Ok(Self { conn, dimension })
    }

    /// Open an existing store; the dimension comes from the persisted marker.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        let dimension = read_dimension(&conn)?.ok_or_else(|| {
            StoreError::Backend("store has no embedding dimension marker; create it first".into())
        })?;
        Ok(Self { conn, dimension })
    }

    /// In-memory store, mainly for tests.
    pub fn in_memory(dimension: usize) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::Validation("embedding dimension must be non-zero".into()));
        }
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        conn.execute(
            "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
            params![DIMENSION_KEY, dimension.to_string()],
        )?;
        Ok(Self { conn, dimension })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert a single chunk with its embedding. Duplicate ids are
    /// rejected and leave the stored row unchanged.
    pub fn add(&mut self, chunk: &ChunkRecord, embedding: &[f32]) -> Result<(), StoreError> {
        let item = (chunk.clone(), embedding.to_vec());
        self.add_batch(std::slice::from_ref(&item))
    }

    /// Insert a batch of chunks atomically. All records are validated
    /// before any row is written; on error nothing is committed.
    pub fn add_batch(&mut self, items: &[(ChunkRecord, Vec<f32>)]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        for (chunk, embedding) in items {
            chunk.validate().map_err(|e| StoreError::Validation(e.to_string()))?;
            if embedding.len() != self.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut exists = tx.prepare("SELECT 1 FROM chunks WHERE chunk_id = ?1 LIMIT 1")?;
            let mut insert = tx.prepare(
                r#"
                INSERT INTO chunks (
                    chunk_id, doc_id, chunk_index, total_chunks, content,
                    url, domain, title, publish_date, tags_json, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            for (chunk, embedding) in items {
                let dup: Option<i64> =
                    exists.query_row([chunk.chunk_id.as_str()], |r| r.get(0)).map(Some).or_else(
                        |e| match e {
                            rusqlite::Error::QueryReturnedNoRows => Ok(None),
                            other => Err(StoreError::from(other)),
                        },
                    )?;
                if dup.is_some() {
                    return Err(StoreError::DuplicateId(chunk.chunk_id.as_str().to_string()));
                }
                let tags_json = serde_json::to_string(&chunk.meta.tags)
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
                let blob: &[u8] = bytemuck::cast_slice(embedding.as_slice());
                insert.execute(params![
                    chunk.chunk_id.as_str(),
                    chunk.doc_id.as_str(),
                    chunk.chunk_index as i64,
                    chunk.total_chunks as i64,
                    chunk.content,
                    chunk.meta.url,
                    chunk.meta.domain,
                    chunk.meta.title,
                    chunk.meta.publish_date,
                    tags_json,
                    blob,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = items.len(), "stored chunk batch");
        Ok(())
    }

    /// Exact top-k cosine similarity over all stored embeddings.
    /// Ties break by chunk id so results are stable across runs.
    pub fn vector_query(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {CHUNK_COLUMNS}, embedding FROM chunks");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let chunk = row_to_chunk(row)?;
            let blob: Vec<u8> = row.get(10)?;
            Ok((chunk, blob))
        })?;

        let mut scored: Vec<ScoredChunk> = Vec::new();
        for r in rows {
            let (chunk, blob) = r?;
            let embedding: Vec<f32> = bytemuck::pod_collect_to_vec(&blob);
            if embedding.len() != self.dimension {
                return Err(StoreError::Backend(format!(
                    "corrupt embedding blob for chunk '{}'",
                    chunk.chunk_id
                )));
            }
            let score = cosine_similarity(query, &embedding);
            scored.push(ScoredChunk { chunk, score });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// BM25 keyword search via FTS5. The raw query is reduced to
    /// alphanumeric terms OR-joined, so user input cannot break the
    /// MATCH syntax. Queries with no indexable terms match nothing.
    pub fn keyword_query(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(match_expr) = build_match_expr(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT {}, bm25(chunks_fts) as rank \n\
             FROM chunks_fts \n\
             JOIN chunks c ON c.rowid = chunks_fts.rowid \n\
             WHERE chunks_fts MATCH ?1 \n\
             ORDER BY rank LIMIT ?2",
            CHUNK_COLUMNS
                .split(", ")
                .map(|col| format!("c.{col}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![match_expr, k as i64], |row| {
            let chunk = row_to_chunk(row)?;
            let rank: f64 = row.get(10)?; // bm25: smaller (more negative) is better
            Ok(ScoredChunk { chunk, score: -(rank as f32) })
        })?;

        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        debug!(query = query, hits = out.len(), "keyword query");
        Ok(out)
    }

    /// One summary per document, taken from its chunk_index 0 row.
    pub fn document_summaries(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT doc_id, domain, title, publish_date, tags_json \n\
             FROM chunks WHERE chunk_index = 0 ORDER BY doc_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let doc_id: String = row.get(0)?;
            let domain: String = row.get(1)?;
            let title: String = row.get(2)?;
            let publish_date: Option<String> = row.get(3)?;
            let tags_json: String = row.get(4)?;
            Ok((doc_id, domain, title, publish_date, tags_json))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (doc_id, domain, title, publish_date, tags_json) = r?;
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            out.push(DocumentSummary {
                doc_id: DocumentId(doc_id),
                domain,
                title,
                publish_date,
                tags,
            });
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let total_chunks: i64 =
            self.conn.query_row("SELECT count(*) FROM chunks", [], |r| r.get(0))?;
        let total_documents: i64 =
            self.conn.query_row("SELECT count(DISTINCT doc_id) FROM chunks", [], |r| r.get(0))?;
        let unique_domains: i64 =
            self.conn.query_row("SELECT count(DISTINCT domain) FROM chunks", [], |r| r.get(0))?;
        let (earliest_date, latest_date): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT min(publish_date), max(publish_date) FROM chunks WHERE publish_date IS NOT NULL",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(StoreStats {
            total_chunks: total_chunks as u64,
            total_documents: total_documents as u64,
            unique_domains: unique_domains as u64,
            earliest_date,
            latest_date,
            embedding_dimension: self.dimension,
        })
    }

    /// Delete every chunk while keeping the dimension marker, so the
    /// store accepts new inserts with the same dimension afterwards.
    pub fn reset(&mut self) -> Result<usize, StoreError> {
        let n = self.conn.execute("DELETE FROM chunks", [])?;
        Ok(n)
    }

    /// Fetch a single chunk by its id.
    pub fn get_chunk(&self, id: &ChunkId) -> Result<Option<ChunkRecord>, StoreError> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE chunk_id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_chunk(row)?)),
            None => Ok(None),
        }
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    // Pragmas for durability and concurrency
    conn.pragma_update(None, "journal_mode", &"WAL")?;
    conn.pragma_update(None, "synchronous", &"FULL")?;
    conn.pragma_update(None, "foreign_keys", &"ON")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            rowid INTEGER PRIMARY KEY,
            chunk_id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            content TEXT NOT NULL,
            url TEXT NOT NULL,
            domain TEXT NOT NULL,
            title TEXT NOT NULL,
            publish_date TEXT,
            tags_json TEXT NOT NULL,
            embedding BLOB NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_chunk_id ON chunks(chunk_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id);
        CREATE INDEX IF NOT EXISTS idx_chunks_domain ON chunks(domain);

        -- FTS5 virtual table linked to chunks via content= and rowid
        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
            content,
            content='chunks',
            content_rowid='rowid',
            tokenize = 'unicode61'
        );

        -- Triggers to keep FTS index consistent
        CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
            INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
        END;

        CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
        END;

        CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE OF content ON chunks BEGIN
            INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
            INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
        END;
        "#,
    )?;
    Ok(())
}

fn read_dimension(conn: &Connection) -> Result<Option<usize>, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            [DIMENSION_KEY],
            |r| r.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::from(other)),
        })?;
    match value {
        Some(v) => {
            let dim = v
                .parse::<usize>()
                .map_err(|_| StoreError::Backend(format!("bad dimension marker '{v}'")))?;
            Ok(Some(dim))
        }
        None => Ok(None),
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let chunk_id: String = row.get(0)?;
    let doc_id: String = row.get(1)?;
    let chunk_index: i64 = row.get(2)?;
    let total_chunks: i64 = row.get(3)?;
    let content: String = row.get(4)?;
    let url: String = row.get(5)?;
    let domain: String = row.get(6)?;
    let title: String = row.get(7)?;
    let publish_date: Option<String> = row.get(8)?;
    let tags_json: String = row.get(9)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(ChunkRecord {
        chunk_id: ChunkId(chunk_id),
        doc_id: DocumentId(doc_id),
        chunk_index: chunk_index as u32,
        total_chunks: total_chunks as u32,
        content,
        meta: DocumentMeta { url, domain, title, publish_date, tags },
    })
}

/// Reduce arbitrary input to a safe FTS5 MATCH expression.
fn build_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" OR "))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
