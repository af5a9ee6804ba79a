use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use crate::error::StoreError;
use crate::schema;

/// Pool settings. Each session actor checks out its own connection, so the
/// pool bounds how many sessions can touch the store at once.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub pool_size: u32,
    /// How long a writer waits on another writer's lock.
    pub busy_timeout_ms: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout_ms: 5_000,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Runs on every new pooled connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {};\
             PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
    }
}

/// Pooled SQLite handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
    path: PathBuf,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, &PoolConfig::default())
    }

    pub fn open_with(path: &Path, config: &PoolConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let pool = build_pool(SqliteConnectionManager::file(path), config)?;
        let db = Self {
            pool,
            path: path.to_owned(),
        };
        db.with_conn(init)?;

        info!(path = %path.display(), pool_size = config.pool_size, "database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing). Every in-memory connection
    /// is its own database, so the pool holds exactly one.
    pub fn in_memory() -> Result<Self, StoreError> {
        let config = PoolConfig {
            pool_size: 1,
            ..Default::default()
        };
        let pool = build_pool(SqliteConnectionManager::memory(), &config)?;
        let db = Self {
            pool,
            path: PathBuf::from(":memory:"),
        };
        db.with_conn(init)?;
        Ok(db)
    }

    /// Execute a closure with a pooled connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.pool.get()?;
        f(&conn)
    }

    /// Execute a closure inside an IMMEDIATE transaction. Commits on `Ok`,
    /// rolls back when the closure returns `Err`.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }
}

fn build_pool(
    manager: SqliteConnectionManager,
    config: &PoolConfig,
) -> Result<Pool<SqliteConnectionManager>, StoreError> {
    Ok(Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(config.acquire_timeout)
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: config.busy_timeout_ms,
        }))
        .build(manager)?)
}

fn init(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
    }
    Ok(())
}
