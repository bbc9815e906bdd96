//! Store configuration.

/// Configuration for opening a relational store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to create the schema if the file holds no `nodes` table.
    pub create_if_missing: bool,

    /// Whether SQLite syncs to disk on every commit (`PRAGMA synchronous`).
    pub sync_on_commit: bool,

    /// Whether to use write-ahead journaling (`PRAGMA journal_mode = WAL`).
    pub wal_mode: bool,

    /// Whether every executed statement is logged at debug level.
    pub log_statements: bool,

    /// Name of the thread that runs queued writes.
    pub worker_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            wal_mode: false,
            log_statements: false,
            worker_name: "refgraph-writer".to_string(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the schema if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync on every commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to use write-ahead journaling.
    #[must_use]
    pub fn wal_mode(mut self, value: bool) -> Self {
        self.wal_mode = value;
        self
    }

    /// Sets whether to log executed statements.
    #[must_use]
    pub fn log_statements(mut self, value: bool) -> Self {
        self.log_statements = value;
        self
    }

    /// Sets the writer thread name.
    #[must_use]
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}
