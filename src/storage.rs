//! Backing storage for IDS data.
//!
//! The on-disk layout mirrors an MDSplus-style IMAS tree: one directory per
//! data entry (`<root>/<user>/<db>/<shot>/<run>/`) holding one HDF5 file per
//! IDS. Groups map to HDF5 groups, repeated structures to groups with
//! integer member names, leaves to scalar or 1-d float datasets.
//!
//! [`MemStore`] keeps whole trees in memory. It backs tests and the `memory`
//! store kind, which lets a config be exercised end to end without touching
//! the filesystem.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};

use hdf5_metno::{File, Group};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::handle::ImasHandle;
use crate::tree::{Node, Value};

/// Which backend a config selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StoreKind {
    #[default]
    #[serde(rename = "hdf5")]
    Hdf5,
    #[serde(rename = "memory")]
    Memory,
}

/// Open the store a config names.
pub fn open_store(kind: StoreKind, root: &Path) -> Box<dyn IdsStore> {
    match kind {
        StoreKind::Hdf5 => Box::new(HdfStore::new(root)),
        StoreKind::Memory => Box::new(MemStore::new()),
    }
}

/// Reads and writes whole IDS trees for a handle.
pub trait IdsStore {
    fn read_ids(&self, handle: &ImasHandle, ids: &str) -> Result<Node, StorageError>;

    fn write_ids(&self, handle: &ImasHandle, ids: &str, tree: &Node) -> Result<(), StorageError>;

    fn has_ids(&self, handle: &ImasHandle, ids: &str) -> bool;

    /// Names of all IDSes stored for a handle, sorted. An absent entry is an
    /// empty list.
    fn list_ids(&self, handle: &ImasHandle) -> Result<Vec<String>, StorageError>;

    /// Stored size in bytes, where the backend can tell. Used for reporting
    /// only.
    fn data_size(&self, _handle: &ImasHandle, _ids: &str) -> u64 {
        0
    }
}

/// Copy one IDS from one data entry to another.
pub fn copy_ids(
    store: &dyn IdsStore,
    from: &ImasHandle,
    to: &ImasHandle,
    ids: &str,
) -> Result<(), StorageError> {
    let tree = store.read_ids(from, ids)?;
    store.write_ids(to, ids, &tree)
}

/// HDF5-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct HdfStore {
    root: PathBuf,
}

impl HdfStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        HdfStore { root: root.into() }
    }

    pub fn entry_dir(&self, handle: &ImasHandle) -> PathBuf {
        self.root
            .join(&handle.user)
            .join(&handle.db)
            .join(handle.shot.to_string())
            .join(handle.run.to_string())
    }

    pub fn ids_path(&self, handle: &ImasHandle, ids: &str) -> PathBuf {
        self.entry_dir(handle).join(format!("{ids}.h5"))
    }
}

impl IdsStore for HdfStore {
    fn read_ids(&self, handle: &ImasHandle, ids: &str) -> Result<Node, StorageError> {
        let path = self.ids_path(handle, ids);
        if !path.exists() {
            return Err(StorageError::MissingIds {
                handle: handle.to_string(),
                ids: ids.to_string(),
            });
        }
        let file = File::open(path)?;
        read_group(&file, "")
    }

    fn write_ids(&self, handle: &ImasHandle, ids: &str, tree: &Node) -> Result<(), StorageError> {
        fs::create_dir_all(self.entry_dir(handle))?;
        let file = File::create(self.ids_path(handle, ids))?;
        write_group(&file, tree)
    }

    fn has_ids(&self, handle: &ImasHandle, ids: &str) -> bool {
        self.ids_path(handle, ids).exists()
    }

    fn list_ids(&self, handle: &ImasHandle) -> Result<Vec<String>, StorageError> {
        let dir = self.entry_dir(handle);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_h5 = path.extension().is_some_and(|ext| ext == "h5");
            if let (true, Some(stem)) = (is_h5, path.file_stem()) {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort_unstable();
        Ok(names)
    }

    fn data_size(&self, handle: &ImasHandle, ids: &str) -> u64 {
        fs::metadata(self.ids_path(handle, ids))
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

fn write_group(group: &Group, node: &Node) -> Result<(), StorageError> {
    match node {
        Node::Group(map) => {
            for (name, child) in map {
                write_child(group, name, child)?;
            }
        }
        Node::List(items) => {
            for (i, child) in items.iter().enumerate() {
                write_child(group, &i.to_string(), child)?;
            }
        }
        Node::Leaf(_) => return Err(StorageError::BadRoot),
    }
    Ok(())
}

fn write_child(group: &Group, name: &str, child: &Node) -> Result<(), StorageError> {
    match child {
        Node::Leaf(Value::Array(data)) => {
            group.new_dataset_builder().with_data(data).create(name)?;
        }
        Node::Leaf(Value::Scalar(v)) => {
            group.new_dataset::<f64>().create(name)?.write_scalar(v)?;
        }
        _ => {
            let sub = group.create_group(name)?;
            write_group(&sub, child)?;
        }
    }
    Ok(())
}

fn read_group(group: &Group, prefix: &str) -> Result<Node, StorageError> {
    let mut children = Vec::new();
    for name in group.member_names()? {
        let child_path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let node = match group.group(&name) {
            Ok(sub) => read_group(&sub, &child_path)?,
            Err(_) => {
                let dataset = group.dataset(&name)?;
                match dataset.shape().len() {
                    0 => Node::Leaf(Value::Scalar(dataset.read_scalar::<f64>()?)),
                    1 => Node::Leaf(Value::Array(dataset.read_1d::<f64>()?)),
                    rank => {
                        return Err(StorageError::UnsupportedRank {
                            path: child_path,
                            rank,
                        })
                    }
                }
            }
        };
        children.push((name, node));
    }
    Ok(collect_children(children))
}

/// Members named `0..n-1` form a repeated structure, anything else a group.
fn collect_children(children: Vec<(String, Node)>) -> Node {
    let all_indexed = !children.is_empty()
        && children
            .iter()
            .all(|(name, _)| name.parse::<usize>().is_ok_and(|i| i.to_string() == *name));
    if all_indexed {
        let mut items: Vec<(usize, Node)> = children
            .into_iter()
            .filter_map(|(name, node)| name.parse().ok().map(|i| (i, node)))
            .collect();
        items.sort_by_key(|(i, _)| *i);
        if items.iter().enumerate().all(|(k, (i, _))| k == *i) {
            return Node::List(items.into_iter().map(|(_, node)| node).collect());
        }
        return Node::Group(
            items
                .into_iter()
                .map(|(i, node)| (i.to_string(), node))
                .collect(),
        );
    }
    Node::Group(children.into_iter().collect())
}

/// In-memory store keyed by handle and IDS name.
#[derive(Debug, Default)]
pub struct MemStore {
    trees: RefCell<FxHashMap<(String, String), Node>>,
    reads: Cell<usize>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    pub fn insert(&self, handle: &ImasHandle, ids: &str, tree: Node) {
        self.trees
            .borrow_mut()
            .insert((handle.to_string(), ids.to_string()), tree);
    }

    /// Number of `read_ids` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl IdsStore for MemStore {
    fn read_ids(&self, handle: &ImasHandle, ids: &str) -> Result<Node, StorageError> {
        self.reads.set(self.reads.get() + 1);
        self.trees
            .borrow()
            .get(&(handle.to_string(), ids.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::MissingIds {
                handle: handle.to_string(),
                ids: ids.to_string(),
            })
    }

    fn write_ids(&self, handle: &ImasHandle, ids: &str, tree: &Node) -> Result<(), StorageError> {
        self.insert(handle, ids, tree.clone());
        Ok(())
    }

    fn has_ids(&self, handle: &ImasHandle, ids: &str) -> bool {
        self.trees
            .borrow()
            .contains_key(&(handle.to_string(), ids.to_string()))
    }

    fn list_ids(&self, handle: &ImasHandle) -> Result<Vec<String>, StorageError> {
        let key = handle.to_string();
        let mut names: Vec<String> = self
            .trees
            .borrow()
            .keys()
            .filter(|(h, _)| *h == key)
            .map(|(_, ids)| ids.clone())
            .collect();
        names.sort_unstable();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Node {
        Node::group([
            ("time", Node::array(vec![0.0, 0.5, 1.0])),
            ("b0", Node::scalar(2.4)),
            (
                "profiles_1d",
                Node::list(vec![
                    Node::group([("zeff", Node::array(vec![1.2, 1.3]))]),
                    Node::group([("zeff", Node::array(vec![1.4, 1.5]))]),
                ]),
            ),
        ])
    }

    fn handle() -> ImasHandle {
        "tester/jet/92436/1".parse().unwrap()
    }

    #[test]
    fn hdf_store_round_trips_trees() {
        let dir = tempfile::tempdir().unwrap();
        let store = HdfStore::new(dir.path());
        let tree = sample_tree();

        store.write_ids(&handle(), "core_profiles", &tree).unwrap();
        assert!(store.has_ids(&handle(), "core_profiles"));
        assert!(store.data_size(&handle(), "core_profiles") > 0);

        let back = store.read_ids(&handle(), "core_profiles").unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn list_ids_names_every_stored_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HdfStore::new(dir.path());
        assert!(store.list_ids(&handle()).unwrap().is_empty());
        store.write_ids(&handle(), "equilibrium", &sample_tree()).unwrap();
        store.write_ids(&handle(), "core_profiles", &sample_tree()).unwrap();
        assert_eq!(
            store.list_ids(&handle()).unwrap(),
            vec!["core_profiles", "equilibrium"]
        );
    }

    #[test]
    fn hdf_store_lays_out_one_file_per_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HdfStore::new(dir.path());
        assert_eq!(
            store.ids_path(&handle(), "equilibrium"),
            dir.path().join("tester/jet/92436/1/equilibrium.h5")
        );
    }

    #[test]
    fn missing_ids_is_reported_as_such() {
        let dir = tempfile::tempdir().unwrap();
        let store = HdfStore::new(dir.path());
        let err = store.read_ids(&handle(), "equilibrium").unwrap_err();
        assert!(matches!(err, StorageError::MissingIds { .. }));
        assert!(!store.has_ids(&handle(), "equilibrium"));
    }

    #[test]
    fn copy_duplicates_an_ids_between_entries() {
        let store = MemStore::new();
        let from = handle();
        let to = from.with_run(2);
        store.insert(&from, "core_profiles", sample_tree());

        copy_ids(&store, &from, &to, "core_profiles").unwrap();
        assert_eq!(
            store.read_ids(&to, "core_profiles").unwrap(),
            sample_tree()
        );
    }

    #[test]
    fn mem_store_counts_reads() {
        let store = MemStore::new();
        store.insert(&handle(), "core_profiles", sample_tree());
        store.read_ids(&handle(), "core_profiles").unwrap();
        store.read_ids(&handle(), "core_profiles").unwrap();
        assert_eq!(store.reads(), 2);
    }
}
