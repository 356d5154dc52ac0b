//! Vector storage on SQLite and sqlite-vec: connections, pooling and provisioning.
use rusqlite::{Connection, OpenFlags, Result};
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

pub mod collection;
pub mod models;
pub mod pool;
pub mod retry;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    dimensions INTEGER,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at DATETIME NOT NULL,
    FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_embeddings_collection ON embeddings(collection_id);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open a connection to the database file with sqlite-vec registered.
///
/// The file is created if missing, but its directory must already exist:
/// a missing or unwritable directory is how an unavailable store shows up.
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    init_sqlite_vec();

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )?;

    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!("Opened {} (journal_mode={mode})", path.display());

    Ok(conn)
}

/// Create the application schema unless the catalog already lists it.
///
/// Returns `true` when the schema was created by this call.
pub fn ensure_schema(conn: &Connection) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'collections')",
        [],
        |row| row.get(0),
    )?;

    if exists {
        info!("Database schema already exists. Skipping creation.");
        return Ok(false);
    }

    conn.execute_batch(SCHEMA_SQL)?;
    info!("Successfully created database schema");
    Ok(true)
}

/// Check that the vector extension answers on this connection, returning its version.
pub fn ensure_vector_extension(conn: &Connection) -> Result<String> {
    let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    info!("sqlite-vec version: {}", vec_version);
    Ok(vec_version)
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`]. Trailing bytes that do not fill an `f32` are ignored.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
