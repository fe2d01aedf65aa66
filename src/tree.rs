//! In-memory IDS trees.
//!
//! An IDS is modelled as a nested tree of named groups, repeated structures
//! (lists addressed by integer index) and leaf values. Leaves hold either a
//! scalar or a 1-d float array; that covers the time traces and radial
//! profiles this tool works with.

use std::fmt;

use ndarray::Array1;
use rustc_hash::FxHashMap;

use crate::error::TreeError;

/// A leaf value in an IDS tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Array(Array1<f64>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array1<f64>> {
        match self {
            Value::Scalar(_) => None,
            Value::Array(a) => Some(a),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Array(Array1::from(v))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => write!(f, "{v}"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().take(6).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                if a.len() > 6 {
                    write!(f, ", .. ({} values)", a.len())?;
                }
                write!(f, "]")
            }
        }
    }
}

/// One node of an IDS tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(FxHashMap<String, Node>),
    List(Vec<Node>),
    Leaf(Value),
}

impl Node {
    pub fn group<K, I>(entries: I) -> Node
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Node)>,
    {
        Node::Group(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }

    pub fn list(items: Vec<Node>) -> Node {
        Node::List(items)
    }

    pub fn scalar(v: f64) -> Node {
        Node::Leaf(Value::Scalar(v))
    }

    pub fn array(values: impl Into<Vec<f64>>) -> Node {
        Node::Leaf(Value::Array(Array1::from(values.into())))
    }

    fn child(&self, segment: &str) -> Option<&Node> {
        match self {
            Node::Group(map) => map.get(segment),
            Node::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Node::Leaf(_) => None,
        }
    }

    /// Walk a slash path down to the node it names.
    pub fn node_at(&self, path: &str) -> Result<&Node, TreeError> {
        let mut current = self;
        for segment in path.split('/') {
            current = current.child(segment).ok_or_else(|| TreeError::PathNotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }

    /// Read the leaf value a slash path names.
    pub fn get(&self, path: &str) -> Result<&Value, TreeError> {
        match self.node_at(path)? {
            Node::Leaf(value) => Ok(value),
            _ => Err(TreeError::NotALeaf {
                path: path.to_string(),
            }),
        }
    }

    /// Number of entries in the repeated structure a slash path names.
    pub fn list_len(&self, path: &str) -> Result<usize, TreeError> {
        match self.node_at(path)? {
            Node::List(items) => Ok(items.len()),
            _ => Err(TreeError::NotAList {
                path: path.to_string(),
            }),
        }
    }

    /// Check that [`Node::set`] would succeed for this path, without mutating.
    ///
    /// A write may create a new field under an existing group or replace an
    /// existing leaf. It may not conjure up intermediate structure or grow a
    /// repeated structure.
    pub fn check_set(&self, path: &str) -> Result<(), TreeError> {
        let (parent_path, last) = split_last(path);
        let parent = match parent_path {
            Some(p) => self.node_at(p).map_err(|_| TreeError::PathNotFound {
                path: path.to_string(),
            })?,
            None => self,
        };
        match parent {
            Node::Group(map) => match map.get(last) {
                None | Some(Node::Leaf(_)) => Ok(()),
                Some(_) => Err(TreeError::NotALeaf {
                    path: path.to_string(),
                }),
            },
            Node::List(items) => {
                let index = last.parse::<usize>().ok().filter(|i| *i < items.len());
                match index {
                    Some(i) => match items[i] {
                        Node::Leaf(_) => Ok(()),
                        _ => Err(TreeError::NotALeaf {
                            path: path.to_string(),
                        }),
                    },
                    None => Err(TreeError::PathNotFound {
                        path: path.to_string(),
                    }),
                }
            }
            Node::Leaf(_) => Err(TreeError::PathNotFound {
                path: path.to_string(),
            }),
        }
    }

    /// Write a leaf value at a slash path, under the same rules as
    /// [`Node::check_set`].
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), TreeError> {
        self.check_set(path)?;
        let (parent_path, last) = split_last(path);
        let mut parent = self;
        if let Some(p) = parent_path {
            for segment in p.split('/') {
                parent = match parent {
                    Node::Group(map) => map.get_mut(segment),
                    Node::List(items) => segment
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| items.get_mut(i)),
                    Node::Leaf(_) => None,
                }
                .ok_or_else(|| TreeError::PathNotFound {
                    path: path.to_string(),
                })?;
            }
        }
        match parent {
            Node::Group(map) => {
                map.insert(last.to_string(), Node::Leaf(value));
            }
            Node::List(items) => {
                // check_set guarantees the index is in range and names a leaf
                let i = last.parse::<usize>().map_err(|_| TreeError::PathNotFound {
                    path: path.to_string(),
                })?;
                items[i] = Node::Leaf(value);
            }
            Node::Leaf(_) => {
                return Err(TreeError::PathNotFound {
                    path: path.to_string(),
                })
            }
        }
        Ok(())
    }
}

fn split_last(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('/') {
        Some((parent, last)) => (Some(parent), last),
        None => (None, path),
    }
}
