//! Modular persistence composition layer.
//!
//! Independently developed business modules (Ordering, Products, ...) each
//! declare their own storage contract and entity-mapping rules; a host
//! application composes them into one physical data layer without the
//! modules knowing about each other or about the final connection topology.
//!
//! The crate is organized leaf-first:
//! - [`model`] — the shared model space and the fluent entity builders that
//!   module descriptors write into;
//! - [`module`] — module declarations and the [`StorageContract`] boundary;
//! - [`resolver`] — connection-string key resolution with a `"Default"`
//!   fallback;
//! - [`compose`] — the composition root that merges everything into a frozen
//!   [`ComposedSchema`](compose::ComposedSchema) and hands out bound
//!   contracts.
//!
//! # Features
//! - `pg`, `mysql`, `sqlite`: enable the corresponding sea-orm backend
//!
//! # Example
//! ```rust,no_run
//! use crm_db::{CompositionRoot, ConnectionResolver, ModuleDecl};
//!
//! # fn map_orders(m: &mut crm_db::model::ModuleModel<'_>) -> crm_db::Result<()> { Ok(()) }
//! # async fn demo() -> crm_db::Result<()> {
//! let resolver = ConnectionResolver::from_iter([
//!     ("Default".to_owned(), "sqlite://data/crm.db".to_owned()),
//! ]);
//! let root = CompositionRoot::new(resolver);
//! root.register_module(
//!     ModuleDecl::builder("ordering")
//!         .table_prefix("ord_")
//!         .descriptor(map_orders)
//!         .build(),
//! )?;
//! let schema = root.freeze()?;
//! tracing::info!(tables = schema.tables().len(), "storage composed");
//! # Ok(())
//! # }
//! ```

pub mod compose;
pub mod config;
pub mod ddl;
pub mod model;
pub mod module;
pub mod resolver;

pub use compose::{ComposedSchema, CompositionRoot, Phase};
pub use config::{DatabaseConfig, PoolCfg, redact_credentials_in_dsn};
pub use model::{Col, ColumnKind, ModelSpace, TableId};
pub use module::{EntityDescriptor, ModuleDecl, StorageContract};
pub use resolver::{ConnectionResolver, DEFAULT_CONNECTION};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Typed error for the composition layer.
///
/// The first three variants are the startup-time taxonomy: all fatal,
/// non-retryable, aborting composition. Storage-engine errors surface
/// through the transparent variants unchanged.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "table '{schema}.{table}' is declared by both module '{first_module}' and module '{second_module}'"
    )]
    SchemaConflict {
        schema: String,
        table: String,
        first_module: String,
        second_module: String,
    },

    #[error("operation '{operation}' is not valid in phase {phase:?}")]
    InvalidState { operation: &'static str, phase: Phase },

    #[error("unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("feature not enabled: {0}")]
    FeatureDisabled(&'static str),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    MySql,
    Sqlite,
}

/// Connection options; each backend applies the subset it supports.
#[derive(Clone, Debug)]
pub struct ConnectOpts {
    /// Maximum number of connections in the pool.
    pub max_conns: Option<u32>,
    /// Minimum number of connections in the pool.
    pub min_conns: Option<u32>,
    /// Timeout to acquire a connection from the pool.
    pub acquire_timeout: Option<Duration>,
    /// Idle timeout before a connection is closed.
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime for a connection.
    pub max_lifetime: Option<Duration>,
    /// For `SQLite` file DSNs, create parent directories if missing.
    pub create_sqlite_dirs: bool,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            max_conns: Some(10),
            min_conns: None,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            max_lifetime: None,
            create_sqlite_dirs: true,
        }
    }
}

/// Scoped storage handle: one pooled connection per resolved DSN.
///
/// Cheap to clone; units of work go through [`DbHandle::begin`] or
/// [`DbHandle::with_tx`] so that acquire-then-release is guaranteed (a
/// sea-orm transaction rolls back when dropped uncommitted).
#[derive(Debug, Clone)]
pub struct DbHandle {
    engine: DbEngine,
    dsn: String,
    conn: DatabaseConnection,
}

impl DbHandle {
    /// Detect engine by DSN scheme.
    ///
    /// Only scheme prefixes are inspected; the tail (credentials etc.) is
    /// never touched.
    ///
    /// # Errors
    /// Returns `ComposeError::UnknownDsn` if the scheme is not recognized.
    pub fn detect(dsn: &str) -> Result<DbEngine> {
        // Trim only leading whitespace to be forgiving with env files.
        let s = dsn.trim_start();

        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(DbEngine::Postgres)
        } else if s.starts_with("mysql://") {
            Ok(DbEngine::MySql)
        } else if s.starts_with("sqlite:") {
            Ok(DbEngine::Sqlite)
        } else {
            Err(ComposeError::UnknownDsn(redact_credentials_in_dsn(dsn)))
        }
    }

    /// Connect and build a handle.
    ///
    /// # Errors
    /// Returns an error if the DSN is invalid, the backend feature is not
    /// compiled in, or the connection fails.
    pub async fn connect(dsn: &str, opts: ConnectOpts) -> Result<Self> {
        let engine = Self::detect(dsn)?;
        ensure_engine_enabled(engine)?;

        let dsn = if engine == DbEngine::Sqlite {
            if opts.create_sqlite_dirs {
                prepare_sqlite_path(dsn)?;
            }
            ensure_sqlite_create_mode(dsn)
        } else {
            dsn.to_owned()
        };

        let mut options = ConnectOptions::new(&dsn);
        // A pool of plain `:memory:` connections would open one private
        // database per connection; pin it to a single connection instead.
        let max_conns = if engine == DbEngine::Sqlite && is_memory_dsn(&dsn) {
            Some(1)
        } else {
            opts.max_conns
        };
        if let Some(n) = max_conns {
            options.max_connections(n);
        }
        if let Some(n) = opts.min_conns {
            options.min_connections(n);
        }
        if let Some(t) = opts.acquire_timeout {
            options.acquire_timeout(t);
        }
        if let Some(t) = opts.idle_timeout {
            options.idle_timeout(t);
        }
        if let Some(t) = opts.max_lifetime {
            options.max_lifetime(t);
        }
        options.sqlx_logging(false);

        let conn = Database::connect(options).await?;
        tracing::debug!(dsn = %redact_credentials_in_dsn(&dsn), ?engine, "database connected");

        Ok(Self { engine, dsn, conn })
    }

    /// Get the backend.
    #[must_use]
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    /// Get the DSN used for this connection.
    #[must_use]
    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Raw sea-orm connection for query building.
    #[must_use]
    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Begin a scoped unit of work.
    ///
    /// The returned transaction rolls back on drop unless committed.
    ///
    /// # Errors
    /// Returns an error if the transaction cannot be started.
    pub async fn begin(&self) -> Result<DatabaseTransaction> {
        Ok(self.conn.begin().await?)
    }

    /// Execute a closure within a transaction.
    ///
    /// Commits on `Ok`, performs a best-effort rollback on `Err` and keeps
    /// the original error.
    ///
    /// # Errors
    /// Returns an error if the transaction cannot be started or committed,
    /// or if the closure fails.
    pub async fn with_tx<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'a> FnOnce(
            &'a DatabaseTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let tx = self.conn.begin().await?;
        match f(&tx).await {
            Ok(v) => {
                tx.commit().await?;
                Ok(v)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Graceful pool close. (Dropping the handle also closes the pool; this
    /// just makes it explicit.)
    ///
    /// # Errors
    /// Returns an error if the underlying pool fails to close.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }
}

fn ensure_engine_enabled(engine: DbEngine) -> Result<()> {
    match engine {
        DbEngine::Postgres => {
            #[cfg(not(feature = "pg"))]
            return Err(ComposeError::FeatureDisabled("pg"));
            #[cfg(feature = "pg")]
            Ok(())
        }
        DbEngine::MySql => {
            #[cfg(not(feature = "mysql"))]
            return Err(ComposeError::FeatureDisabled("mysql"));
            #[cfg(feature = "mysql")]
            Ok(())
        }
        DbEngine::Sqlite => {
            #[cfg(not(feature = "sqlite"))]
            return Err(ComposeError::FeatureDisabled("sqlite"));
            #[cfg(feature = "sqlite")]
            Ok(())
        }
    }
}

fn is_memory_dsn(dsn: &str) -> bool {
    dsn.contains(":memory:") && !dsn.contains("cache=shared")
}

/// Rewrite file-backed `SQLite` DSNs so the database file is created on
/// first open, unless the caller already chose an open mode.
fn ensure_sqlite_create_mode(dsn: &str) -> String {
    if is_memory_dsn(dsn) || dsn.contains("mode=") {
        return dsn.to_owned();
    }
    if dsn.contains('?') {
        format!("{dsn}&mode=rwc")
    } else {
        format!("{dsn}?mode=rwc")
    }
}

/// Create parent directories for file-backed `SQLite` DSNs.
fn prepare_sqlite_path(dsn: &str) -> Result<()> {
    let path = dsn
        .trim_start()
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if path.is_empty() || path.starts_with(':') || path.starts_with("file:") {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

// ===================== tests =====================
