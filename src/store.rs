//! The document store: pooled, self-provisioning similarity search over Q&A pairs.
//!
//! Startup walks `Uninitialized → Connected → Provisioned → Ready → Populated`.
//! Only the initial connection wait may block for long; every later
//! operation makes a single attempt and, at the public boundary, turns any
//! failure into a logged empty result.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, CorpusConfig, StoreConfig};
use crate::corpus::{CorpusError, CorpusReader, delimiter_byte};
use crate::db::collection::{Collection, CollectionError};
use crate::db::models::{Distance, NewDocument, ScoredDocument};
use crate::db::pool::{PoolConfigError, PooledConnection, SqlitePool, build_pool};
use crate::db::retry::{self, RetryPolicy};
use crate::db::{ensure_schema, ensure_vector_extension};
use crate::embedder::{Embedder, EmbedderError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backing store unavailable after {attempts} attempts: {source}")]
    Unavailable { attempts: u32, source: r2d2::Error },

    #[error("invalid pool configuration: {0}")]
    InvalidPool(#[from] PoolConfigError),

    #[error("store is closed")]
    Closed,

    #[error("connection checkout failed: {0}")]
    Checkout(#[from] r2d2::Error),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoreState {
    Uninitialized,
    Connected,
    Provisioned,
    Ready,
    Populated,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateOutcome {
    AlreadyPopulated { documents: usize },
    Seeded { inserted: usize },
}

/// Everything [`DocumentStore::connect`] needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub pool: StoreConfig,
    pub collection: String,
    pub retry: RetryPolicy,
}

impl StoreOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            path: cfg.database_path(),
            pool: cfg.store.clone(),
            collection: cfg.collection_name(),
            retry: RetryPolicy::new(cfg.retry_interval(), cfg.startup.max_attempts),
        }
    }

    /// Options for a database file under `dir`, retrying quickly. Handy for tests and tools.
    pub fn local(dir: &Path, collection: &str) -> Self {
        let pool = StoreConfig {
            data_dir: dir.display().to_string(),
            ..StoreConfig::default()
        };
        Self {
            path: dir.join(format!("{}.db", pool.database)),
            pool,
            collection: collection.to_string(),
            retry: RetryPolicy::new(Duration::from_millis(50), 3),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DocumentStore {
    pool: Mutex<Option<SqlitePool>>,
    collection: Mutex<Option<Collection>>,
    collection_name: String,
    embedder: Arc<dyn Embedder>,
    distance: Distance,
    state: Mutex<StoreState>,
    startup_attempts: u32,
}

impl DocumentStore {
    /// Connect, provision and populate from `config`.
    ///
    /// Populate failures are logged; the store is returned either way.
    pub fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        let store = Self::connect(StoreOptions::from_config(config), embedder)?;
        if let Err(e) = store.populate_if_empty(&config.corpus) {
            error!("Failed to check or populate database: {e}");
        }
        Ok(store)
    }

    /// Wait for the backing store and run the provisioning migration.
    ///
    /// Fails when the pool bounds are invalid or the store never accepted a
    /// connection within the retry policy.
    pub fn connect(opts: StoreOptions, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        info!("Connecting to {}", opts.path.display());
        let pool = build_pool(&opts.path, &opts.pool)?;

        let ready = retry::wait_for(opts.retry, |_| pool.get()).map_err(|(source, attempts)| {
            StoreError::Unavailable { attempts, source }
        })?;

        let store = Self {
            pool: Mutex::new(Some(pool)),
            collection: Mutex::new(None),
            collection_name: opts.collection,
            embedder,
            distance: opts.pool.distance,
            state: Mutex::new(StoreState::Connected),
            startup_attempts: ready.attempts,
        };
        store.provision(&ready.value);
        Ok(store)
    }

    fn provision(&self, conn: &Connection) {
        let schema = ensure_schema(conn);
        if let Err(e) = &schema {
            error!("Error creating database schema: {e}");
        }
        let extension = ensure_vector_extension(conn);
        if let Err(e) = &extension {
            error!("Error checking vector extension: {e}");
        }

        if schema.is_ok() && extension.is_ok() {
            self.advance(StoreState::Provisioned);
        } else {
            warn!("Provisioning incomplete; continuing in degraded mode");
        }
    }

    fn advance(&self, next: StoreState) {
        let mut state = lock(&self.state);
        if next > *state && *state != StoreState::Closed {
            debug!("Store state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    pub fn state(&self) -> StoreState {
        *lock(&self.state)
    }

    /// Connection attempts the startup wait needed before the store answered.
    pub fn startup_attempts(&self) -> u32 {
        self.startup_attempts
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.pool).is_none()
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    fn checkout(&self) -> Result<PooledConnection, StoreError> {
        let pool = lock(&self.pool).clone().ok_or(StoreError::Closed)?;
        Ok(pool.get()?)
    }

    /// The memoized collection handle, constructed on first use.
    ///
    /// The slot stays locked while constructing, so concurrent first callers
    /// build it once. A failed construction leaves the slot empty for the next call.
    fn collection(&self, conn: &Connection) -> Result<Collection, StoreError> {
        let mut slot = lock(&self.collection);
        if let Some(collection) = slot.as_ref() {
            return Ok(collection.clone());
        }

        let collection = Collection::get_or_create(conn, &self.collection_name)?;
        info!("Successfully initialized collection {}", collection.name());
        *slot = Some(collection.clone());
        drop(slot);

        self.advance(StoreState::Ready);
        Ok(collection)
    }

    pub fn try_document_count(&self) -> Result<usize, StoreError> {
        let conn = self.checkout()?;
        let collection = self.collection(&conn)?;
        Ok(collection.count(&conn)?)
    }

    /// Seed the collection from the corpus file when it holds no documents.
    pub fn populate_if_empty(&self, corpus: &CorpusConfig) -> Result<PopulateOutcome, StoreError> {
        let documents = self.try_document_count()?;
        if documents > 0 {
            info!(
                "Collection {} already populated ({documents} documents)",
                self.collection_name
            );
            self.advance(StoreState::Populated);
            return Ok(PopulateOutcome::AlreadyPopulated { documents });
        }

        info!("Populating database from {}. This may take some time.", corpus.path);
        let reader = CorpusReader::open(
            Path::new(&corpus.path),
            delimiter_byte(corpus.delimiter)?,
            corpus.chunk_size,
        )?;

        let mut inserted = 0;
        for chunk in reader {
            let chunk = chunk?;
            inserted += self.add_documents(&chunk)?.len();
            debug!("Seeded {inserted} documents so far");
        }

        info!(
            "Finished populating {}: {inserted} documents",
            self.collection_name
        );
        self.advance(StoreState::Populated);
        Ok(PopulateOutcome::Seeded { inserted })
    }

    /// Embed and write a batch. The connection is checked out only after embedding.
    pub fn add_documents(&self, documents: &[NewDocument]) -> Result<Vec<i64>, StoreError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts)?;

        let mut conn = self.checkout()?;
        let collection = self.collection(&conn)?;
        Ok(collection.add_documents(&mut conn, documents, &embeddings)?)
    }

    pub fn try_insert(&self, question: &str, answer: &str) -> Result<i64, StoreError> {
        let ids = self.add_documents(&[NewDocument::question_answer(question, answer)])?;
        match ids.as_slice() {
            [id] => Ok(*id),
            other => Err(CollectionError::LengthMismatch {
                documents: 1,
                embeddings: other.len(),
            }
            .into()),
        }
    }

    /// Store `question` with `answer` as metadata. Returns the new id, or `None` on failure.
    pub fn insert(&self, question: &str, answer: &str) -> Option<i64> {
        info!("Inserting new question and answer into database");
        match self.try_insert(question, answer) {
            Ok(id) => {
                info!("Successfully inserted new document {id}");
                Some(id)
            }
            Err(e) => {
                error!("Failed to insert document: {e}");
                None
            }
        }
    }

    pub fn try_query_by_similarity(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<ScoredDocument>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(text)?;

        let conn = self.checkout()?;
        let collection = self.collection(&conn)?;
        Ok(collection.similarity_search(&conn, &query, k, self.distance)?)
    }

    /// The `k` nearest documents to `text`, best first. Empty on any failure.
    pub fn query_by_similarity(&self, text: &str, k: usize) -> Vec<ScoredDocument> {
        match self.try_query_by_similarity(text, k) {
            Ok(results) if results.is_empty() => {
                warn!("No results found for the query.");
                results
            }
            Ok(results) => results,
            Err(e) => {
                error!("Failed to execute similarity query: {e}");
                Vec::new()
            }
        }
    }

    /// Release the pool. Safe to call repeatedly; later operations return empty values.
    ///
    /// Connections still checked out close when their holders return them.
    pub fn close(&self) {
        let pool = lock(&self.pool).take();
        lock(&self.collection).take();
        *lock(&self.state) = StoreState::Closed;

        if let Some(pool) = pool {
            let state = pool.state();
            drop(pool);
            info!(
                "Closed all database connections ({} open, {} idle)",
                state.connections, state.idle_connections
            );
        }
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;
    use tempfile::tempdir;

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(MockEmbedder::default())
    }

    #[test]
    fn test_lifecycle_states() {
        let dir = tempdir().unwrap();
        let store =
            DocumentStore::connect(StoreOptions::local(dir.path(), "q"), embedder()).unwrap();
        assert_eq!(store.state(), StoreState::Provisioned);

        // The handle is built lazily on first use
        assert!(lock(&store.collection).is_none());
        assert_eq!(store.try_document_count().unwrap(), 0);
        assert_eq!(store.state(), StoreState::Ready);

        let corpus_path = dir.path().join("faq.csv");
        std::fs::write(&corpus_path, "question;answer\nA?;a\n").unwrap();
        let corpus = CorpusConfig {
            path: corpus_path.display().to_string(),
            ..CorpusConfig::default()
        };
        assert_eq!(
            store.populate_if_empty(&corpus).unwrap(),
            PopulateOutcome::Seeded { inserted: 1 }
        );
        assert_eq!(store.state(), StoreState::Populated);

        store.close();
        assert_eq!(store.state(), StoreState::Closed);
        assert!(store.is_closed());
    }

    #[test]
    fn test_unavailable_store_reports_attempts() {
        let dir = tempdir().unwrap();
        let mut opts = StoreOptions::local(&dir.path().join("absent"), "q");
        opts.pool.connect_timeout_ms = 50;
        opts.retry = RetryPolicy::new(Duration::ZERO, 2);

        match DocumentStore::connect(opts, embedder()) {
            Err(StoreError::Unavailable { attempts, .. }) => assert_eq!(attempts, 2),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("store should be unavailable"),
        }
    }

    #[test]
    fn test_operations_after_close_fail_safely() {
        let dir = tempdir().unwrap();
        let store =
            DocumentStore::connect(StoreOptions::local(dir.path(), "q"), embedder()).unwrap();
        store.close();

        assert!(matches!(store.try_insert("q", "a"), Err(StoreError::Closed)));
        assert!(store.insert("q", "a").is_none());
        assert!(store.query_by_similarity("q", 3).is_empty());
    }

    #[test]
    fn test_missing_corpus_is_an_error() {
        let dir = tempdir().unwrap();
        let store =
            DocumentStore::connect(StoreOptions::local(dir.path(), "q"), embedder()).unwrap();
        let corpus = CorpusConfig {
            path: dir.path().join("nope.csv").display().to_string(),
            ..CorpusConfig::default()
        };
        assert!(matches!(
            store.populate_if_empty(&corpus),
            Err(StoreError::Corpus(CorpusError::Open { .. }))
        ));
        assert_eq!(store.state(), StoreState::Ready);
    }

    #[test]
    fn test_invalid_pool_bounds_fail_instead_of_panicking() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.store.data_dir = dir.path().display().to_string();
        config.store.max_connections = 0;
        assert!(matches!(
            DocumentStore::open(&config, embedder()),
            Err(StoreError::InvalidPool(PoolConfigError::ZeroMaxConnections))
        ));

        config.store.max_connections = 2;
        config.store.min_connections = 5;
        assert!(matches!(
            DocumentStore::open(&config, embedder()),
            Err(StoreError::InvalidPool(PoolConfigError::MinExceedsMax { .. }))
        ));
    }

    #[test]
    fn test_non_ascii_delimiter_is_rejected() {
        let dir = tempdir().unwrap();
        let store =
            DocumentStore::connect(StoreOptions::local(dir.path(), "q"), embedder()).unwrap();
        let corpus_path = dir.path().join("faq.csv");
        std::fs::write(&corpus_path, "question;answer\nA?;a\n").unwrap();
        let corpus = CorpusConfig {
            path: corpus_path.display().to_string(),
            delimiter: '\u{013B}',
            ..CorpusConfig::default()
        };

        assert!(matches!(
            store.populate_if_empty(&corpus),
            Err(StoreError::Corpus(CorpusError::Delimiter('\u{013B}')))
        ));
        assert_eq!(store.try_document_count().unwrap(), 0);
    }
}
