//! r2d2 connection manager for sqlite-vec enabled SQLite connections.
use std::path::PathBuf;
use std::time::Duration;

use r2d2::{ManageConnection, Pool};
use rusqlite::Connection;
use thiserror::Error;

use super::open_connection;
use crate::config::StoreConfig;

pub type SqlitePool = Pool<SqliteVecManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteVecManager>;

/// Pool bounds r2d2 would refuse with a panic.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolConfigError {
    #[error("max_connections must be positive")]
    ZeroMaxConnections,

    #[error("min_connections ({min}) exceeds max_connections ({max})")]
    MinExceedsMax { min: u32, max: u32 },

    #[error("connect_timeout_ms must be positive")]
    ZeroConnectTimeout,
}

/// Opens connections to a single database file.
#[derive(Debug, Clone)]
pub struct SqliteVecManager {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteVecManager {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }
}

impl ManageConnection for SqliteVecManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        open_connection(&self.path, self.busy_timeout)
    }

    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _conn: &mut Connection) -> bool {
        false
    }
}

/// Build a pool without touching the database.
///
/// Connections are established on demand, so this succeeds even while the
/// backing store is unavailable; callers wait for readiness separately.
pub fn build_pool(
    path: impl Into<PathBuf>,
    cfg: &StoreConfig,
) -> Result<SqlitePool, PoolConfigError> {
    if cfg.max_connections == 0 {
        return Err(PoolConfigError::ZeroMaxConnections);
    }
    if cfg.min_connections > cfg.max_connections {
        return Err(PoolConfigError::MinExceedsMax {
            min: cfg.min_connections,
            max: cfg.max_connections,
        });
    }
    if cfg.connect_timeout_ms == 0 {
        return Err(PoolConfigError::ZeroConnectTimeout);
    }

    let manager = SqliteVecManager::new(path, Duration::from_millis(cfg.busy_timeout_ms));
    Ok(Pool::builder()
        .max_size(cfg.max_connections)
        .min_idle(Some(cfg.min_connections))
        .connection_timeout(Duration::from_millis(cfg.connect_timeout_ms))
        .build_unchecked(manager))
}
