//! Save and reload through every backend.

use parking_lot::Mutex;
use refgraph_core::{PersistentObject, StorageReader};
use refgraph_storage::{InMemoryWriter, NodeMap, SharedWriter, SqliteReader, SqliteWriter};
use refgraph_testkit::prelude::*;
use std::rc::Rc;
use std::sync::Arc;

fn assert_sample_shape(document: &Document) {
    assert_eq!(document.title(), "run 42");
    assert_eq!(document.thumbnail(), Some(vec![0x89, 0x50, 0x4e, 0x47]));
    assert_eq!(document.item_count(), 5);

    let groups = document.groups.to_vec();
    let names: Vec<String> = groups.iter().map(|g| g.name()).collect();
    assert_eq!(names, ["raw", "derived"]);

    let raw = groups[0].items.to_vec();
    let labels: Vec<String> = raw.iter().map(|i| i.label()).collect();
    assert_eq!(labels, ["raw-0", "raw-1", "raw-2"]);
    assert_eq!(raw[1].samples(), Some(vec![1; 8]));
    assert_eq!(raw[2].graphics.get(0).map(|g| g.kind()).as_deref(), Some("cross"));

    let mean = groups[1].items.get(0).expect("mean");
    let kinds: Vec<String> = mean.graphics.to_vec().iter().map(|g| g.kind()).collect();
    assert_eq!(kinds, ["line", "label"]);
    assert_eq!(mean.calibrated(), 1.5);
}

fn assert_calibration_shared(document: &Document) {
    let shared = document.calibration.get().expect("document calibration");
    let raw = document.groups.get(0).expect("raw group").items.to_vec();
    assert!(Rc::ptr_eq(&shared, &raw[0].calibration.get().expect("raw-0")));
    assert!(Rc::ptr_eq(&shared, &raw[1].calibration.get().expect("raw-1")));
    assert!(raw[2].calibration.get().is_none());
    assert_eq!(shared.ref_count(), 3);
    assert_eq!(raw[0].calibrated(), 2.5);
}

#[test]
fn memory_round_trip() {
    let store = MemoryStore::new();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();

    let map = store.node_map();
    assert_eq!(map.len(), SAMPLE_NODE_COUNT);
    assert_consistent(&*sample.document, &map);
    assert_eq!(
        map.get(&sample.shared_calibration.id()).unwrap().ref_count,
        3
    );

    let loaded = load_document(&map).unwrap();
    assert_sample_shape(&loaded);
    assert_calibration_shared(&loaded);
    assert_eq!(loaded.id(), sample.document.id());
    assert_consistent(&*loaded, &map);
}

#[test]
fn sqlite_file_round_trip() {
    let store = SqliteStore::file();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();

    let counts = store.inner.lock().counts().unwrap();
    assert_eq!(counts.nodes, SAMPLE_NODE_COUNT as u64);
    assert_eq!(counts.items, 4);
    assert_eq!(counts.relationships, 12);
    assert_eq!(counts.data, 4);

    let reader = SqliteReader::open(store.path().unwrap()).unwrap();
    assert!(reader.verify().unwrap().is_ok());
    let loaded = load_document(&reader).unwrap();
    assert_sample_shape(&loaded);
    assert_calibration_shared(&loaded);
    assert_consistent(&*loaded, &store.node_map());
}

#[test]
fn dump_reloads_to_same_graph() {
    let store = SqliteStore::memory();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();

    let reader = store.reader();
    assert_eq!(reader.to_node_map().unwrap(), store.node_map());
    let loaded = load_document(&reader).unwrap();
    assert_sample_shape(&loaded);
}

#[test]
fn snapshot_bytes_round_trip() {
    let store = MemoryStore::new();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();

    let bytes = store.node_map().to_bytes().unwrap();
    let restored = NodeMap::from_bytes(&bytes).unwrap();
    assert_eq!(restored, store.node_map());

    let loaded = load_document(&restored).unwrap();
    assert_sample_shape(&loaded);
}

#[test]
fn snapshot_file_round_trip() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("graph.cbor");
    let store = MemoryStore::new();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();

    store.inner.lock().save_file(&path).unwrap();
    let restored = NodeMap::load_file(&path).unwrap();
    assert_eq!(restored, store.node_map());
}

#[test]
fn backends_store_identical_graphs() {
    let mirror = Arc::new(Mutex::new(MirrorWriter::new(
        InMemoryWriter::new(),
        SqliteWriter::open_in_memory().unwrap(),
    )));
    let writer: SharedWriter = mirror.clone();
    let sample = sample_document();
    save(&sample.document, writer).unwrap();

    let document = &sample.document;
    document.set_title("run 43");
    let derived = document.groups.get(1).unwrap();
    derived.items.insert(0, DataItem::new("median", 2.0));
    derived
        .items
        .get(0)
        .unwrap()
        .calibration
        .set(Some(Rc::clone(&sample.shared_calibration)));
    document.groups.remove(0);

    let guard = mirror.lock();
    let memory = guard.primary.node_map().clone();
    let sqlite = guard.secondary.to_node_map().unwrap();
    drop(guard);
    assert_eq!(memory, sqlite);
    assert_consistent(&**document, &memory);
}

#[test]
fn loaded_graph_writes_through() {
    let store = MemoryStore::new();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();
    drop(sample);

    let loaded = load_document(&store.node_map()).unwrap();
    loaded.attach_writer(Some(store.writer()));
    loaded.set_title("reloaded");
    let raw = loaded.groups.get(0).unwrap();
    raw.items.remove(2);
    raw.items.get(0).unwrap().set_value(10.0);

    let map = store.node_map();
    assert_eq!(map.len(), SAMPLE_NODE_COUNT - 2);
    assert_consistent(&*loaded, &map);
}

#[test]
fn empty_document_round_trip() {
    let store = SqliteStore::memory();
    let document = Document::new("empty");
    save(&document, store.writer()).unwrap();

    let loaded = load_document(&store.reader()).unwrap();
    assert_eq!(loaded.title(), "empty");
    assert!(loaded.groups.is_empty());
    assert!(loaded.calibration.get().is_none());
    assert!(loaded.thumbnail().is_none());
}

#[test]
fn global_registry_loads_document() {
    register_global().unwrap();
    let store = MemoryStore::new();
    let sample = sample_document();
    save(&sample.document, store.writer()).unwrap();

    let map = store.node_map();
    let mut reader = StorageReader::new(&map).unwrap();
    let loaded = reader.build_root_as::<Document>(Document::TYPE_TAG).unwrap();
    assert_sample_shape(&loaded);
    assert_eq!(reader.built_len(), SAMPLE_NODE_COUNT);
}
