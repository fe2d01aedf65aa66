//! Path-addressed access to one IDS tree, with staged writes.
//!
//! Paths are slash separated, e.g. `profiles_1d/0/t_i_average`. A `*`
//! segment stands for an index into a repeated structure and is filled in
//! with [`path_at_index`] before lookup.
//!
//! Writes go through a staging buffer. Staged values shadow the tree for
//! reads, so a pipeline can chain operations on the same field, but nothing
//! reaches the tree until [`IdsMapping::commit`] and nothing reaches backing
//! storage until [`IdsMapping::sync`]. Commit validates every staged path
//! first and applies none of them if any is unwritable.

use indexmap::IndexMap;
use ndarray::Array1;

use crate::error::{SyncError, TreeError};
use crate::handle::ImasHandle;
use crate::storage::IdsStore;
use crate::tree::{Node, Value};

/// Path segment standing for an index into a repeated structure.
pub const WILDCARD: &str = "*";

/// Replace each `*` segment with the next index from `indices`, left to
/// right. Surplus indices are ignored; surplus wildcards are left in place.
pub fn path_at_index(path: &str, indices: &[usize]) -> String {
    let mut next = indices.iter();
    path.split('/')
        .map(|segment| {
            if segment == WILDCARD {
                match next.next() {
                    Some(i) => i.to_string(),
                    None => segment.to_string(),
                }
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Number of `*` segments in a path.
pub fn wildcard_count(path: &str) -> usize {
    path.split('/').filter(|s| *s == WILDCARD).count()
}

#[derive(Debug, Clone)]
pub struct IdsMapping {
    tree: Node,
    staged: IndexMap<String, Value>,
}

impl IdsMapping {
    pub fn new(tree: Node) -> Self {
        IdsMapping {
            tree,
            staged: IndexMap::new(),
        }
    }

    pub fn tree(&self) -> &Node {
        &self.tree
    }

    pub fn into_tree(self) -> Node {
        self.tree
    }

    /// Read a leaf. Staged writes shadow the tree.
    pub fn get(&self, path: &str) -> Result<&Value, TreeError> {
        if let Some(value) = self.staged.get(path) {
            return Ok(value);
        }
        self.tree.get(path)
    }

    /// Read a leaf with each `*` filled in from `index`.
    pub fn get_at(&self, path: &str, index: usize) -> Result<&Value, TreeError> {
        self.get(&path_at_index(path, &[index]))
    }

    pub fn get_array(&self, path: &str) -> Result<&Array1<f64>, TreeError> {
        self.get(path)?
            .as_array()
            .ok_or_else(|| TreeError::NotAnArray {
                path: path.to_string(),
            })
    }

    pub fn get_scalar(&self, path: &str) -> Result<f64, TreeError> {
        self.get(path)?
            .as_scalar()
            .ok_or_else(|| TreeError::NotALeaf {
                path: path.to_string(),
            })
    }

    pub fn list_len(&self, path: &str) -> Result<usize, TreeError> {
        self.tree.list_len(path)
    }

    /// Stage a write. Later stages to the same path replace earlier ones.
    pub fn stage(&mut self, path: impl Into<String>, value: Value) {
        self.staged.insert(path.into(), value);
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Apply all staged writes to the tree, in stage order.
    ///
    /// All paths are validated before any write happens; an unwritable path
    /// leaves both the tree and the staging buffer untouched.
    pub fn commit(&mut self) -> Result<(), TreeError> {
        for path in self.staged.keys() {
            self.tree.check_set(path)?;
        }
        for (path, value) in std::mem::take(&mut self.staged) {
            self.tree.set(&path, value)?;
        }
        Ok(())
    }

    /// Commit staged writes and push the tree to backing storage.
    pub fn sync(
        &mut self,
        store: &dyn IdsStore,
        handle: &ImasHandle,
        ids: &str,
    ) -> Result<(), SyncError> {
        self.commit()?;
        store.write_ids(handle, ids, &self.tree)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> IdsMapping {
        IdsMapping::new(Node::group([
            ("time", Node::array(vec![0.0, 1.0])),
            (
                "profiles_1d",
                Node::list(vec![
                    Node::group([("zeff", Node::array(vec![1.2, 1.3]))]),
                    Node::group([("zeff", Node::array(vec![1.4, 1.5]))]),
                ]),
            ),
        ]))
    }

    #[test]
    fn wildcard_substitution_is_left_to_right() {
        assert_eq!(
            path_at_index("profiles_1d/*/zeff", &[4]),
            "profiles_1d/4/zeff"
        );
        assert_eq!(
            path_at_index("a/*/b/*/c", &[1, 2]),
            "a/1/b/2/c"
        );
        // surplus wildcards stay put, surplus indices are dropped
        assert_eq!(path_at_index("a/*/b/*", &[7]), "a/7/b/*");
        assert_eq!(path_at_index("a/*/b", &[1, 9]), "a/1/b");
        assert_eq!(wildcard_count("a/*/b/*"), 2);
        assert_eq!(wildcard_count("a/b"), 0);
    }

    #[test]
    fn get_at_indexes_repeated_structures() {
        let m = mapping();
        assert_eq!(
            m.get_at("profiles_1d/*/zeff", 1)
                .unwrap()
                .as_array()
                .unwrap()
                .to_vec(),
            vec![1.4, 1.5]
        );
        assert!(matches!(
            m.get_at("profiles_1d/*/zeff", 5).unwrap_err(),
            TreeError::PathNotFound { .. }
        ));
    }

    #[test]
    fn staged_writes_shadow_reads_until_commit() {
        let mut m = mapping();
        m.stage("time", vec![5.0, 6.0].into());
        assert_eq!(
            m.get("time").unwrap().as_array().unwrap().to_vec(),
            vec![5.0, 6.0]
        );
        // the tree itself is untouched until commit
        assert_eq!(
            m.tree().get("time").unwrap().as_array().unwrap().to_vec(),
            vec![0.0, 1.0]
        );
        m.commit().unwrap();
        assert_eq!(m.staged_len(), 0);
        assert_eq!(
            m.tree().get("time").unwrap().as_array().unwrap().to_vec(),
            vec![5.0, 6.0]
        );
    }

    #[test]
    fn restaging_a_path_keeps_the_last_value() {
        let mut m = mapping();
        m.stage("time", vec![1.0].into());
        m.stage("time", vec![2.0].into());
        assert_eq!(m.staged_len(), 1);
        m.commit().unwrap();
        assert_eq!(
            m.tree().get("time").unwrap().as_array().unwrap().to_vec(),
            vec![2.0]
        );
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let mut m = mapping();
        m.stage("time", vec![9.0].into());
        m.stage("profiles_1d/5/zeff", vec![1.0].into());
        let err = m.commit().unwrap_err();
        assert!(matches!(err, TreeError::PathNotFound { .. }));
        // the valid write was held back too
        assert_eq!(
            m.tree().get("time").unwrap().as_array().unwrap().to_vec(),
            vec![0.0, 1.0]
        );
        assert_eq!(m.staged_len(), 2);
    }

    #[test]
    fn commit_creates_new_fields_under_existing_groups() {
        let mut m = mapping();
        m.stage("profiles_1d/0/zeff_error_upper", vec![0.1, 0.2].into());
        m.commit().unwrap();
        assert!(m.get("profiles_1d/0/zeff_error_upper").is_ok());
    }
}
