//! Variable listings and prioritized resolution.
//!
//! Physics quantities move between IDS locations depending on code version
//! and machine, so a variable is declared as an ordered list of candidate
//! locations. Resolution walks the candidates in order and takes the first
//! one that exists and passes every accept predicate; an optional default
//! catches the rest. Nothing resolves implicitly, callers ask for names one
//! at a time.

use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, StorageError, TreeError, VariableError};
use crate::handle::ImasHandle;
use crate::mapping::IdsMapping;
use crate::storage::IdsStore;
use crate::tree::Value;

/// One candidate location for a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidatePath {
    pub ids: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A predicate a candidate value must pass to be accepted. Arrays must pass
/// at every element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcceptIf {
    pub operator: PredicateOp,
    pub args: Vec<f64>,
}

impl AcceptIf {
    pub fn accepts(&self, value: &Value) -> bool {
        match value {
            Value::Scalar(v) => self.test(*v),
            Value::Array(a) => a.iter().all(|&v| self.test(v)),
        }
    }

    fn test(&self, lhs: f64) -> bool {
        let Some(&rhs) = self.args.first() else {
            return false;
        };
        match self.operator {
            PredicateOp::Eq => lhs == rhs,
            PredicateOp::Ne => lhs != rhs,
            PredicateOp::Gt => lhs > rhs,
            PredicateOp::Ge => lhs >= rhs,
            PredicateOp::Lt => lhs < rhs,
            PredicateOp::Le => lhs <= rhs,
        }
    }
}

/// Declaration of one named variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSpec {
    pub name: String,
    pub paths: Vec<CandidatePath>,
    #[serde(default)]
    pub accept_if: Vec<AcceptIf>,
    #[serde(default)]
    pub default: Option<f64>,
}

impl VariableSpec {
    fn describe(&self) -> String {
        self.paths
            .iter()
            .map(|c| format!("{}:{}", c.ids, c.path))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The variables listing, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct VarLookup {
    specs: FxHashMap<String, VariableSpec>,
}

impl VarLookup {
    /// Load a listing from a YAML file (a sequence of variable specs).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let specs: Vec<VariableSpec> =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_specs(specs)
    }

    pub fn from_specs(specs: impl IntoIterator<Item = VariableSpec>) -> Result<Self, ConfigError> {
        let mut by_name = FxHashMap::default();
        for spec in specs {
            if spec.name.is_empty() {
                return Err(ConfigError::Validation(
                    "variable with an empty name".into(),
                ));
            }
            if spec.paths.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "variable {:?} has no candidate paths",
                    spec.name
                )));
            }
            for predicate in &spec.accept_if {
                if predicate.args.len() != 1 {
                    return Err(ConfigError::Validation(format!(
                        "variable {:?}: accept_if takes exactly one argument",
                        spec.name
                    )));
                }
            }
            if by_name.insert(spec.name.clone(), spec).is_some() {
                return Err(ConfigError::Validation(
                    "duplicate variable name in listing".into(),
                ));
            }
        }
        Ok(VarLookup { specs: by_name })
    }

    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Variable names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Resolves variables against one data entry.
///
/// Each IDS is read from the store at most once per resolver; resolving
/// several variables against the same sources costs one read per source.
pub struct VariableResolver<'a> {
    store: &'a dyn IdsStore,
    handle: &'a ImasHandle,
    lookup: &'a VarLookup,
    cache: FxHashMap<String, Option<IdsMapping>>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(store: &'a dyn IdsStore, handle: &'a ImasHandle, lookup: &'a VarLookup) -> Self {
        VariableResolver {
            store,
            handle,
            lookup,
            cache: FxHashMap::default(),
        }
    }

    /// Resolve one variable to a concrete value.
    pub fn resolve(&mut self, name: &str) -> Result<Value, VariableError> {
        let lookup = self.lookup;
        let spec = lookup
            .get(name)
            .ok_or_else(|| VariableError::UnknownVariable {
                name: name.to_string(),
            })?;
        for candidate in &spec.paths {
            let Some(mapping) = self.source(&candidate.ids)? else {
                debug!(
                    variable = name,
                    ids = %candidate.ids,
                    "candidate source not stored, trying next"
                );
                continue;
            };
            let value = match mapping.get(&candidate.path) {
                Ok(value) => value,
                Err(TreeError::PathNotFound { .. } | TreeError::NotALeaf { .. }) => {
                    debug!(
                        variable = name,
                        ids = %candidate.ids,
                        path = %candidate.path,
                        "candidate path missing, trying next"
                    );
                    continue;
                }
                Err(TreeError::NotAnArray { .. } | TreeError::NotAList { .. }) => continue,
            };
            if spec.accept_if.iter().all(|p| p.accepts(value)) {
                debug!(variable = name, ids = %candidate.ids, path = %candidate.path, "resolved");
                return Ok(value.clone());
            }
            debug!(
                variable = name,
                ids = %candidate.ids,
                path = %candidate.path,
                "candidate rejected by predicate, trying next"
            );
        }
        if let Some(default) = spec.default {
            debug!(variable = name, default, "falling back to default");
            return Ok(Value::Scalar(default));
        }
        Err(VariableError::Unresolved {
            name: name.to_string(),
            spec: spec.describe(),
        })
    }

    /// Cached read of one IDS. `None` means the store has no such IDS for
    /// this handle, which rejects candidates rather than failing the
    /// resolve.
    fn source(&mut self, ids: &str) -> Result<Option<&IdsMapping>, StorageError> {
        if !self.cache.contains_key(ids) {
            let loaded = match self.store.read_ids(self.handle, ids) {
                Ok(tree) => Some(IdsMapping::new(tree)),
                Err(StorageError::MissingIds { .. }) => None,
                Err(e) => return Err(e),
            };
            self.cache.insert(ids.to_string(), loaded);
        }
        Ok(self.cache.get(ids).and_then(Option::as_ref))
    }
}
