//! Named document collections with a fixed embedding dimensionality.
//!
//! Each collection owns a row in `collections` and, once the first document
//! is written, a `vec0` virtual table sized to that document's embedding.
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use thiserror::Error;
use tracing::info;

use super::models::{Distance, Document, Metadata, NewDocument, ScoredDocument};
use super::{deserialize_vector, serialize_vector};

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("embedding has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding is empty")]
    EmptyEmbedding,

    #[error("embedding has zero norm")]
    ZeroNorm,

    #[error("{documents} documents but {embeddings} embeddings")]
    LengthMismatch { documents: usize, embeddings: usize },
}

pub type Result<T> = std::result::Result<T, CollectionError>;

/// Handle to a registered collection. Cheap to clone; holds no connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    id: i64,
    name: String,
}

impl Collection {
    /// Look up a collection by name, registering it if absent.
    pub fn get_or_create(conn: &Connection, name: &str) -> Result<Self> {
        conn.execute(
            "INSERT INTO collections (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            params![name],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM collections WHERE name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(Self {
            id,
            name: name.to_string(),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn vec_table(&self) -> String {
        format!("vec_collection_{}", self.id)
    }

    /// Dimensionality fixed by the first write, or `None` while the collection is empty.
    pub fn dimensions(&self, conn: &Connection) -> Result<Option<usize>> {
        let dims: Option<Option<i64>> = conn
            .query_row(
                "SELECT dimensions FROM collections WHERE id = ?",
                params![self.id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dims.flatten().map(|d| d as usize))
    }

    pub fn count(&self, conn: &Connection) -> Result<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE collection_id = ?",
            params![self.id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Write a batch of documents with their embeddings in one transaction.
    ///
    /// Returns the new document ids in input order.
    pub fn add_documents(
        &self,
        conn: &mut Connection,
        documents: &[NewDocument],
        embeddings: &[Vec<f32>],
    ) -> Result<Vec<i64>> {
        if documents.len() != embeddings.len() {
            return Err(CollectionError::LengthMismatch {
                documents: documents.len(),
                embeddings: embeddings.len(),
            });
        }
        let Some(first) = embeddings.first() else {
            return Ok(Vec::new());
        };
        let dim = first.len();
        if dim == 0 {
            return Err(CollectionError::EmptyEmbedding);
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
            return Err(CollectionError::DimensionMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }
        // Cosine distance to a zero vector is NULL
        if embeddings.iter().any(|e| e.iter().all(|x| *x == 0.0)) {
            return Err(CollectionError::ZeroNorm);
        }

        // IMMEDIATE takes the write lock up front so concurrent writers queue
        // on the busy timeout instead of failing on lock upgrade.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let table = self.vec_table();
        match self.dimensions(&tx)? {
            Some(expected) if expected != dim => {
                return Err(CollectionError::DimensionMismatch {
                    expected,
                    actual: dim,
                });
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "UPDATE collections SET dimensions = ? WHERE id = ?",
                    params![dim as i64, self.id],
                )?;
                tx.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS {table} USING vec0(embedding FLOAT[{dim}]);"
                ))?;
                info!("Collection {} fixed at {dim} dimensions", self.name);
            }
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(documents.len());
        for (doc, embedding) in documents.iter().zip(embeddings) {
            let metadata = serde_json::to_string(&doc.metadata)?;
            tx.execute(
                "INSERT INTO embeddings (collection_id, content, metadata, created_at) VALUES (?, ?, ?, ?)",
                params![self.id, doc.content, metadata, now],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                &format!("INSERT INTO {table} (rowid, embedding) VALUES (?, ?)"),
                params![id, serialize_vector(embedding)],
            )?;
            ids.push(id);
        }

        tx.commit()?;
        Ok(ids)
    }

    /// Rank stored documents by distance to `query`, closest first.
    pub fn similarity_search(
        &self,
        conn: &Connection,
        query: &[f32],
        k: usize,
        distance: Distance,
    ) -> Result<Vec<ScoredDocument>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(expected) = self.dimensions(conn)? else {
            return Ok(Vec::new());
        };
        if expected != query.len() {
            return Err(CollectionError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        // Rows without a defined distance (zero vectors) are left out of the ranking.
        let sql = format!(
            r#"
            SELECT id, content, metadata, created_at, embedding, distance
            FROM (
                SELECT
                    e.id AS id,
                    e.content AS content,
                    e.metadata AS metadata,
                    e.created_at AS created_at,
                    v.embedding AS embedding,
                    {func}(v.embedding, ?1) AS distance
                FROM {table} v
                JOIN embeddings e ON e.id = v.rowid
            )
            WHERE distance IS NOT NULL
            ORDER BY distance ASC, id ASC
            LIMIT ?2
            "#,
            func = distance.sql_function(),
            table = self.vec_table(),
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![serialize_vector(query), k as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, DateTime<Utc>>(3)?,
                row.get::<_, Vec<u8>>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, content, metadata, created_at, blob, distance) = row?;
            let metadata: Metadata = serde_json::from_str(&metadata)?;
            results.push(ScoredDocument {
                document: Document {
                    id,
                    content,
                    embedding: deserialize_vector(&blob),
                    metadata,
                    created_at,
                },
                distance,
            });
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_schema, open_connection};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, Connection) {
        let dir = tempdir().unwrap();
        let conn = open_connection(&dir.path().join("c.db"), Duration::from_secs(1)).unwrap();
        ensure_schema(&conn).unwrap();
        (dir, conn)
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let (_dir, conn) = setup();
        let a = Collection::get_or_create(&conn, "questions_mock").unwrap();
        let b = Collection::get_or_create(&conn, "questions_mock").unwrap();
        let c = Collection::get_or_create(&conn, "other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id(), c.id());
        assert_eq!(a.dimensions(&conn).unwrap(), None);
        assert_eq!(a.count(&conn).unwrap(), 0);
    }

    #[test]
    fn test_first_write_fixes_dimensions() {
        let (_dir, mut conn) = setup();
        let coll = Collection::get_or_create(&conn, "q").unwrap();

        let docs = vec![NewDocument::question_answer("What is X?", "X is Y.")];
        coll.add_documents(&mut conn, &docs, &[unit(4, 0)]).unwrap();
        assert_eq!(coll.dimensions(&conn).unwrap(), Some(4));

        let err = coll
            .add_documents(&mut conn, &docs, &[unit(8, 0)])
            .unwrap_err();
        assert!(matches!(
            err,
            CollectionError::DimensionMismatch {
                expected: 4,
                actual: 8
            }
        ));
        // The failed batch left nothing behind
        assert_eq!(coll.count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_rejects_ragged_or_empty_batches() {
        let (_dir, mut conn) = setup();
        let coll = Collection::get_or_create(&conn, "q").unwrap();
        let docs = vec![
            NewDocument::question_answer("a", "1"),
            NewDocument::question_answer("b", "2"),
        ];

        assert!(matches!(
            coll.add_documents(&mut conn, &docs, &[unit(3, 0)]),
            Err(CollectionError::LengthMismatch { .. })
        ));
        assert!(matches!(
            coll.add_documents(&mut conn, &docs, &[unit(3, 0), unit(4, 0)]),
            Err(CollectionError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            coll.add_documents(&mut conn, &docs, &[vec![], vec![]]),
            Err(CollectionError::EmptyEmbedding)
        ));
        assert!(coll.add_documents(&mut conn, &[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_zero_norm_embeddings() {
        let (_dir, mut conn) = setup();
        let coll = Collection::get_or_create(&conn, "q").unwrap();
        let docs = vec![
            NewDocument::question_answer("real", "1"),
            NewDocument::question_answer("zero", "2"),
        ];

        assert!(matches!(
            coll.add_documents(&mut conn, &docs, &[unit(3, 0), vec![0.0; 3]]),
            Err(CollectionError::ZeroNorm)
        ));
        assert_eq!(coll.count(&conn).unwrap(), 0);
        assert_eq!(coll.dimensions(&conn).unwrap(), None);
    }

    #[test]
    fn test_search_skips_rows_without_distance() {
        let (_dir, mut conn) = setup();
        let coll = Collection::get_or_create(&conn, "q").unwrap();
        coll.add_documents(
            &mut conn,
            &[NewDocument::question_answer("real", "r")],
            &[unit(3, 0)],
        )
        .unwrap();

        // A zero vector written before the write-side check existed
        conn.execute(
            "INSERT INTO embeddings (collection_id, content, metadata, created_at) VALUES (?, 'zero', '{}', ?)",
            params![coll.id(), Utc::now()],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            &format!("INSERT INTO {} (rowid, embedding) VALUES (?, ?)", coll.vec_table()),
            params![id, serialize_vector(&[0.0, 0.0, 0.0])],
        )
        .unwrap();
        assert_eq!(coll.count(&conn).unwrap(), 2);

        let hits = coll
            .similarity_search(&conn, &unit(3, 0), 5, Distance::Cosine)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.content, "real");

        // Euclidean distance is defined for the zero vector, so it still ranks
        let hits = coll
            .similarity_search(&conn, &unit(3, 0), 5, Distance::Euclidean)
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_similarity_search_orders_by_distance() {
        let (_dir, mut conn) = setup();
        let coll = Collection::get_or_create(&conn, "q").unwrap();

        let docs = vec![
            NewDocument::question_answer("far", "f"),
            NewDocument::question_answer("near", "n"),
            NewDocument::question_answer("middle", "m"),
        ];
        let embeddings = vec![
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.05, 0.0],
            vec![1.0, 1.0, 0.0],
        ];
        coll.add_documents(&mut conn, &docs, &embeddings).unwrap();

        let hits = coll
            .similarity_search(&conn, &[1.0, 0.0, 0.0], 2, Distance::Cosine)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.content, "near");
        assert_eq!(hits[1].document.content, "middle");
        assert!(hits[0].distance <= hits[1].distance);
        assert_eq!(hits[0].document.answer(), Some("n"));
        assert_eq!(hits[0].document.embedding, vec![1.0, 0.05, 0.0]);

        let all = coll
            .similarity_search(&conn, &[1.0, 0.0, 0.0], 10, Distance::Euclidean)
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_search_empty_collection_and_bad_query() {
        let (_dir, mut conn) = setup();
        let coll = Collection::get_or_create(&conn, "q").unwrap();

        let hits = coll
            .similarity_search(&conn, &[1.0, 0.0], 3, Distance::Cosine)
            .unwrap();
        assert!(hits.is_empty());

        coll.add_documents(
            &mut conn,
            &[NewDocument::question_answer("a", "1")],
            &[vec![1.0, 0.0]],
        )
        .unwrap();
        assert!(
            coll.similarity_search(&conn, &[1.0, 0.0], 0, Distance::Cosine)
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            coll.similarity_search(&conn, &[1.0, 0.0, 0.0], 1, Distance::Cosine),
            Err(CollectionError::DimensionMismatch { .. })
        ));
    }
}
