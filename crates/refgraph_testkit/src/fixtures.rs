//! Test fixtures and store helpers.
//!
//! Stores keep a concrete handle to their writer for inspection next to the
//! [`SharedWriter`] the live graph holds.

use crate::model::{Calibration, DataGroup, DataItem, Document, Graphic};
use parking_lot::Mutex;
use refgraph_core::{CoreResult, PersistentObject};
use refgraph_storage::{
    AsyncWriter, InMemoryWriter, NodeMap, SharedWriter, SqliteReader, SqliteWriter, StoreConfig,
};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use tempfile::TempDir;

/// An in-memory store.
pub struct MemoryStore {
    /// Concrete writer.
    pub inner: Arc<Mutex<InMemoryWriter>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryWriter::new())),
        }
    }

    /// Returns a handle for live objects.
    pub fn writer(&self) -> SharedWriter {
        self.inner.clone()
    }

    /// Copies the current node map.
    pub fn node_map(&self) -> NodeMap {
        self.inner.lock().node_map().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A relational store, in memory or in a temporary file.
pub struct SqliteStore {
    /// Concrete writer.
    pub inner: Arc<Mutex<SqliteWriter>>,
    path: Option<PathBuf>,
    _temp_dir: Option<TempDir>,
}

impl SqliteStore {
    /// Creates an in-memory relational store.
    pub fn memory() -> Self {
        let writer = SqliteWriter::open_in_memory().expect("Failed to open in-memory store");
        Self {
            inner: Arc::new(Mutex::new(writer)),
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a relational store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("graph.db");
        let writer =
            SqliteWriter::open(&path, &StoreConfig::default()).expect("Failed to open file store");
        Self {
            inner: Arc::new(Mutex::new(writer)),
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a handle for live objects.
    pub fn writer(&self) -> SharedWriter {
        self.inner.clone()
    }

    /// Loads the stored graph as a node map.
    pub fn node_map(&self) -> NodeMap {
        self.inner
            .lock()
            .to_node_map()
            .expect("Failed to load node map")
    }

    /// Renders the store as a SQL script.
    pub fn dump(&self) -> String {
        self.inner.lock().dump().expect("Failed to dump store")
    }

    /// Opens a read source over a copy of the store.
    pub fn reader(&self) -> SqliteReader {
        SqliteReader::from_dump(&self.dump()).expect("Failed to reload dump")
    }
}

/// A relational store behind the asynchronous write proxy.
pub struct AsyncStore {
    /// Concrete proxy.
    pub inner: Arc<Mutex<AsyncWriter<SqliteWriter>>>,
}

impl AsyncStore {
    /// Starts a proxy over an in-memory relational store.
    pub fn memory() -> Self {
        let proxy = AsyncWriter::spawn("refgraph-test-writer", SqliteWriter::open_in_memory)
            .expect("Failed to start writer thread");
        Self {
            inner: Arc::new(Mutex::new(proxy)),
        }
    }

    /// Returns a handle for live objects.
    pub fn writer(&self) -> SharedWriter {
        self.inner.clone()
    }

    /// Waits for queued writes and loads the store as a node map.
    pub fn node_map(&self) -> NodeMap {
        self.inner
            .lock()
            .to_node_map()
            .expect("Failed to load node map")
    }

    /// Waits for queued writes and renders the store as a SQL script.
    pub fn dump(&self) -> String {
        self.inner.lock().dump().expect("Failed to dump store")
    }
}

/// Attaches `writer` to `document` and stores the whole graph.
///
/// # Errors
///
/// Returns an error if the rewrite fails.
pub fn save(document: &Document, writer: SharedWriter) -> CoreResult<()> {
    document.attach_writer(Some(writer));
    document.rewrite()
}

/// Handles to the interesting parts of [`sample_document`].
pub struct Sample {
    /// The root.
    pub document: Rc<Document>,
    /// Calibration shared by the document and two items.
    pub shared_calibration: Rc<Calibration>,
}

/// Builds a detached document with two groups, five items, graphics, data
/// blobs and one calibration shared by three owners.
pub fn sample_document() -> Sample {
    let document = Document::new("run 42");
    document.set_thumbnail(vec![0x89, 0x50, 0x4e, 0x47]);
    let shared_calibration = Calibration::new(2.0, 0.5);
    document.calibration.set(Some(Rc::clone(&shared_calibration)));

    let raw = DataGroup::new("raw");
    for (i, value) in [1.0, 2.5, 4.0].into_iter().enumerate() {
        let item = DataItem::new(&format!("raw-{i}"), value);
        item.graphics.append(Graphic::new("cross", value, 0.0));
        item.set_samples(vec![i as u8; 8]);
        if i < 2 {
            item.calibration.set(Some(Rc::clone(&shared_calibration)));
        }
        raw.items.append(item);
    }

    let derived = DataGroup::new("derived");
    let mean = DataItem::new("mean", 2.5);
    mean.calibration.set(Some(Calibration::new(1.0, -1.0)));
    mean.graphics.append(Graphic::new("line", 0.0, 2.5));
    mean.graphics.append(Graphic::new("label", 1.0, 2.5));
    derived.items.append(mean);
    derived.items.append(DataItem::new("spread", 1.5));

    document.groups.append(raw);
    document.groups.append(derived);

    Sample {
        document,
        shared_calibration,
    }
}

/// Number of nodes [`sample_document`] stores.
pub const SAMPLE_NODE_COUNT: usize = 1 + 1 + 2 + 5 + 1 + 5;
