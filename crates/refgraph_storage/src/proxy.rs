//! Asynchronous write proxy.
//!
//! [`AsyncWriter`] moves a writer onto a dedicated thread. Every
//! [`StorageWriter`] call is packaged as a job, pushed onto a FIFO queue and
//! returns at once; the worker applies jobs strictly in submission order.
//! Callers that need a result use [`AsyncWriter::call`], which blocks until
//! the job has run.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::id::NodeId;
use crate::node::{NodeMap, NodeRecord};
use crate::sqlite::{SqliteWriter, TableCounts};
use crate::writer::StorageWriter;
use refgraph_codec::Value;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

type Task<W> = Box<dyn FnOnce(&mut W) -> StoreResult<()> + Send>;

enum Job<W> {
    Run { name: &'static str, task: Task<W> },
    Shutdown,
}

/// A writer whose calls run on a worker thread.
///
/// The wrapped writer is built on the worker by a factory closure and never
/// leaves it. Failed jobs are logged on the worker and do not reach the
/// caller; a panicking job is caught and logged and the worker keeps going.
pub struct AsyncWriter<W: StorageWriter + 'static> {
    sender: Option<Sender<Job<W>>>,
    worker: Option<JoinHandle<()>>,
    disconnected: bool,
}

impl<W: StorageWriter + 'static> std::fmt::Debug for AsyncWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWriter")
            .field("closed", &self.is_closed())
            .field("disconnected", &self.disconnected)
            .finish()
    }
}

impl<W: StorageWriter + 'static> AsyncWriter<W> {
    /// Moves an existing writer onto a new worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be started.
    pub fn new(writer: W) -> StoreResult<Self> {
        Self::spawn(StoreConfig::default().worker_name, move || Ok(writer))
    }

    /// Starts a worker thread named `name` and builds the writer on it.
    ///
    /// Returns once the factory has finished.
    ///
    /// # Errors
    ///
    /// Returns the factory's error, or an error if the thread cannot be
    /// started.
    pub fn spawn<F>(name: impl Into<String>, factory: F) -> StoreResult<Self>
    where
        F: FnOnce() -> StoreResult<W> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Job<W>>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<StoreResult<()>>(1);

        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let writer = match factory() {
                    Ok(writer) => writer,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                drain(writer, &receiver);
            })
            .map_err(|e| StoreError::WorkerSpawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                sender: Some(sender),
                worker: Some(worker),
                disconnected: false,
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(StoreError::WorkerSpawn("writer factory panicked".to_string()))
            }
        }
    }

    /// Queues a job and returns without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriterClosed`] if the worker has stopped.
    pub fn submit<F>(&self, name: &'static str, task: F) -> StoreResult<()>
    where
        F: FnOnce(&mut W) -> StoreResult<()> + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(StoreError::WriterClosed)?;
        sender
            .send(Job::Run {
                name,
                task: Box::new(task),
            })
            .map_err(|_| StoreError::WriterClosed)?;
        debug!(job = name, "queued");
        Ok(())
    }

    /// Queues a job and blocks until it has run, returning its result.
    ///
    /// Every job queued earlier has run by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns the job's error, [`StoreError::WorkerPanicked`] if the job
    /// panicked, or [`StoreError::WriterClosed`] if the worker has stopped.
    pub fn call<R, F>(&self, name: &'static str, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut W) -> StoreResult<R> + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.submit(name, move |writer| {
            let _ = done_tx.send(f(writer));
            Ok(())
        })?;
        done_rx
            .recv()
            .map_err(|_| StoreError::WorkerPanicked { job: name })?
    }

    /// Returns `true` once the worker has been shut down.
    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    /// Stops the worker after every queued job has run.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread itself panicked.
    pub fn close(&mut self) -> StoreResult<()> {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Job::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| StoreError::WorkerPanicked { job: "shutdown" })?;
        }
        Ok(())
    }

    fn queue<F>(&self, name: &'static str, task: F) -> StoreResult<()>
    where
        F: FnOnce(&mut W) -> StoreResult<()> + Send + 'static,
    {
        if self.disconnected {
            return Ok(());
        }
        self.submit(name, task)
    }
}

impl AsyncWriter<SqliteWriter> {
    /// Opens a relational store on a worker thread named after
    /// `config.worker_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn sqlite(path: impl Into<PathBuf>, config: StoreConfig) -> StoreResult<Self> {
        let path = path.into();
        let name = config.worker_name.clone();
        Self::spawn(name, move || SqliteWriter::open(&path, &config))
    }

    /// Renders the store as a SQL script once queued writes have run.
    ///
    /// # Errors
    ///
    /// Returns an error if the dump fails or the worker is gone.
    pub fn dump(&self) -> StoreResult<String> {
        self.call("dump", |writer| writer.dump())
    }

    /// Counts table rows once queued writes have run.
    ///
    /// # Errors
    ///
    /// Returns an error if the count fails or the worker is gone.
    pub fn counts(&self) -> StoreResult<TableCounts> {
        self.call("counts", |writer| writer.counts())
    }

    /// Loads the store as a node map once queued writes have run.
    ///
    /// # Errors
    ///
    /// Returns an error if loading fails or the worker is gone.
    pub fn to_node_map(&self) -> StoreResult<NodeMap> {
        self.call("to_node_map", |writer| writer.to_node_map())
    }
}

impl<W: StorageWriter + 'static> Drop for AsyncWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "writer thread did not stop cleanly");
        }
    }
}

fn drain<W: StorageWriter>(mut writer: W, receiver: &Receiver<Job<W>>) {
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Shutdown => break,
            Job::Run { name, task } => {
                match panic::catch_unwind(AssertUnwindSafe(|| task(&mut writer))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(job = name, error = %e, "queued write failed"),
                    Err(_) => error!(job = name, "queued write panicked"),
                }
            }
        }
    }
    debug!("writer thread stopped");
}

impl<W: StorageWriter + 'static> StorageWriter for AsyncWriter<W> {
    fn begin_rewrite(&mut self) -> StoreResult<()> {
        self.queue("begin_rewrite", |w| w.begin_rewrite())
    }

    fn end_rewrite(&mut self) -> StoreResult<()> {
        self.queue("end_rewrite", |w| w.end_rewrite())
    }

    fn set_root(&mut self, id: NodeId) -> StoreResult<()> {
        self.queue("set_root", move |w| w.set_root(id))
    }

    fn set_type(&mut self, id: NodeId, type_tag: &str) -> StoreResult<()> {
        let type_tag = type_tag.to_string();
        self.queue("set_type", move |w| w.set_type(id, &type_tag))
    }

    fn set_property(&mut self, id: NodeId, key: &str, value: &Value) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.clone();
        self.queue("set_property", move |w| w.set_property(id, &key, &value))
    }

    fn set_item(&mut self, parent: NodeId, key: &str, item: &NodeRecord) -> StoreResult<()> {
        let key = key.to_string();
        let item = item.clone();
        self.queue("set_item", move |w| w.set_item(parent, &key, &item))
    }

    fn clear_item(&mut self, parent: NodeId, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.queue("clear_item", move |w| w.clear_item(parent, &key))
    }

    fn insert_item(
        &mut self,
        parent: NodeId,
        key: &str,
        item: &NodeRecord,
        before: usize,
    ) -> StoreResult<()> {
        let key = key.to_string();
        let item = item.clone();
        self.queue("insert_item", move |w| w.insert_item(parent, &key, &item, before))
    }

    fn remove_item(&mut self, parent: NodeId, key: &str, index: usize) -> StoreResult<()> {
        let key = key.to_string();
        self.queue("remove_item", move |w| w.remove_item(parent, &key, index))
    }

    fn set_data(&mut self, id: NodeId, key: &str, data: &[u8]) -> StoreResult<()> {
        let key = key.to_string();
        let data = data.to_vec();
        self.queue("set_data", move |w| w.set_data(id, &key, &data))
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn set_disconnected(&mut self, disconnected: bool) {
        self.disconnected = disconnected;
        let queued = self.submit("set_disconnected", move |w| {
            w.set_disconnected(disconnected);
            Ok(())
        });
        if let Err(e) = queued {
            error!(error = %e, "could not forward disconnected flag");
        }
    }

    fn write_record(&mut self, record: &NodeRecord) -> StoreResult<()> {
        let record = record.clone();
        self.queue("write_record", move |w| w.write_record(&record))
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.call("flush", |w| w.flush())
    }
}
