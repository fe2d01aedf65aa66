//! Creating run data entries from the sweep matrix.
//!
//! For every sampled combination this copies the template data entry to a
//! fresh run number, applies the combination's operations on top and
//! records the run in the manifest. Untouched IDSes are copied verbatim so
//! each run is a complete data entry.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, CreateError};
use crate::handle::{current_user, write_manifest, ImasHandle, RunRecord};
use crate::mapping::IdsMapping;
use crate::ops::{Operation, OperationDim};
use crate::samplers::Sampler;
use crate::storage::{copy_ids, IdsStore};
use crate::tree::Node;

/// The create section of the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConfig {
    pub template: ImasHandle,
    pub dimensions: Vec<OperationDim>,
    #[serde(default)]
    pub sampler: Sampler,
    /// Run number of the first generated entry.
    pub run_start: u32,
    /// Database for generated entries. Defaults to the template's.
    #[serde(default)]
    pub db: Option<String>,
}

impl CreateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions.is_empty() {
            return Err(ConfigError::Validation("create has no dimensions".into()));
        }
        for dim in &self.dimensions {
            dim.validate()?;
        }
        if self.sampler.n_samples() == Some(0) {
            return Err(ConfigError::Validation(
                "sampler n_samples must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Handle of the generated entry at `index`. Entries always land under
    /// the current user.
    fn target(&self, index: usize) -> ImasHandle {
        ImasHandle {
            user: current_user(),
            db: self.db.clone().unwrap_or_else(|| self.template.db.clone()),
            shot: self.template.shot,
            run: self.run_start + index as u32,
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Expand the sweep, write one data entry per sampled combination and the
/// manifest for them.
pub fn run_create(
    store: &dyn IdsStore,
    cfg: &CreateConfig,
    runs_file: &Path,
    force: bool,
) -> Result<Vec<RunRecord>, CreateError> {
    cfg.validate()?;
    let expanded: Vec<Vec<Operation>> = cfg.dimensions.iter().map(OperationDim::expand).collect();
    let sizes: Vec<usize> = expanded.iter().map(Vec::len).collect();
    let set = cfg.sampler.sample(&sizes)?;
    info!(
        dimensions = sizes.len(),
        combinations = set.len(),
        "expanded sweep matrix"
    );
    // run numbers are u32; the last sample must still fit
    if set.len() as u64 > u64::from(u32::MAX - cfg.run_start) + 1 {
        return Err(CreateError::Config(ConfigError::Validation(format!(
            "run_start {} with {} runs overflows the run number range",
            cfg.run_start,
            set.len()
        ))));
    }

    // ids targeted by the sweep, in dimension order, then the rest
    let mut touched: Vec<&str> = Vec::new();
    for dim in &cfg.dimensions {
        if !touched.contains(&dim.ids.as_str()) {
            touched.push(&dim.ids);
        }
    }
    let all_ids = store.list_ids(&cfg.template)?;
    let untouched: Vec<&str> = all_ids
        .iter()
        .map(String::as_str)
        .filter(|ids| !touched.contains(ids))
        .collect();

    let records: Vec<RunRecord> = (0..set.len())
        .map(|index| RunRecord {
            name: format!("run_{index:04}"),
            handle: cfg.target(index),
        })
        .collect();
    if !force {
        for record in &records {
            for ids in touched.iter().chain(&untouched) {
                if store.has_ids(&record.handle, ids) {
                    return Err(CreateError::TargetExists {
                        handle: record.handle.to_string(),
                        ids: (*ids).to_string(),
                    });
                }
            }
        }
    }

    let mut templates: FxHashMap<&str, Node> = FxHashMap::default();
    for &ids in &touched {
        templates.insert(ids, store.read_ids(&cfg.template, ids)?);
    }

    let bar = ProgressBar::new(set.len() as u64)
        .with_style(bar_style())
        .with_message("writing run entries");
    for (record, combo) in records.iter().zip(&set) {
        let picked: Vec<&Operation> = combo
            .iter()
            .zip(&expanded)
            .map(|(&choice, ops)| &ops[choice])
            .collect();
        for &ids in &touched {
            let mut mapping = IdsMapping::new(templates[ids].clone());
            for op in picked.iter().filter(|op| op.ids == ids) {
                op.apply_to(&mut mapping)
                    .map_err(|source| CreateError::Apply {
                        run: record.name.clone(),
                        ids: ids.to_string(),
                        source,
                    })?;
                debug!(
                    run = %record.name,
                    variable = %op.variable,
                    operator = ?op.operator,
                    value = op.value,
                    "applied operation"
                );
            }
            mapping.sync(store, &record.handle, ids)?;
        }
        for &ids in &untouched {
            copy_ids(store, &cfg.template, &record.handle, ids)?;
        }
        bar.inc(1);
    }
    bar.finish();

    write_manifest(runs_file, &records)?;
    info!(
        runs = records.len(),
        manifest = %runs_file.display(),
        "wrote run manifest"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::read_manifest;
    use crate::ops::Operator;
    use crate::storage::MemStore;

    fn template_handle() -> ImasHandle {
        ImasHandle {
            user: current_user(),
            db: "jet".into(),
            shot: 92436,
            run: 1,
        }
    }

    fn store() -> MemStore {
        let store = MemStore::new();
        store.insert(
            &template_handle(),
            "core_profiles",
            Node::group([
                ("b0", Node::scalar(1.0)),
                ("t_e", Node::array(vec![10.0, 20.0])),
            ]),
        );
        store.insert(
            &template_handle(),
            "equilibrium",
            Node::group([("psi", Node::array(vec![0.5, 0.6]))]),
        );
        store
    }

    fn dim(variable: &str, operator: Operator, values: &[f64]) -> OperationDim {
        OperationDim {
            ids: "core_profiles".into(),
            variable: variable.into(),
            operator,
            values: values.to_vec(),
        }
    }

    fn config() -> CreateConfig {
        CreateConfig {
            template: template_handle(),
            dimensions: vec![
                dim("b0", Operator::Multiply, &[2.0, 3.0]),
                dim("t_e", Operator::Add, &[0.0, 1.0, 2.0]),
            ],
            sampler: Sampler::CartesianProduct,
            run_start: 100,
            db: None,
        }
    }

    #[test]
    fn cartesian_create_writes_every_combination() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let runs_file = dir.path().join("runs.yaml");
        let records = run_create(&store, &config(), &runs_file, false).unwrap();

        assert_eq!(records.len(), 6);
        assert_eq!(records[0].name, "run_0000");
        assert_eq!(records[0].handle.run, 100);
        assert_eq!(records[5].handle.run, 105);
        assert_eq!(read_manifest(&runs_file).unwrap(), records);

        // run_0000 is (b0 * 2, t_e + 0), run_0004 is (b0 * 3, t_e + 1)
        let first = IdsMapping::new(
            store
                .read_ids(&records[0].handle, "core_profiles")
                .unwrap(),
        );
        assert_eq!(first.get_scalar("b0").unwrap(), 2.0);
        assert_eq!(
            first.get_array("t_e").unwrap().to_vec(),
            vec![10.0, 20.0]
        );
        let fifth = IdsMapping::new(
            store
                .read_ids(&records[4].handle, "core_profiles")
                .unwrap(),
        );
        assert_eq!(fifth.get_scalar("b0").unwrap(), 3.0);
        assert_eq!(
            fifth.get_array("t_e").unwrap().to_vec(),
            vec![11.0, 21.0]
        );
    }

    #[test]
    fn untouched_ids_are_copied_along() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let records =
            run_create(&store, &config(), &dir.path().join("runs.yaml"), false).unwrap();
        let eq = store.read_ids(&records[3].handle, "equilibrium").unwrap();
        assert_eq!(eq.get("psi").unwrap().as_array().unwrap().to_vec(), vec![0.5, 0.6]);
    }

    #[test]
    fn existing_targets_need_force() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let runs_file = dir.path().join("runs.yaml");
        run_create(&store, &config(), &runs_file, false).unwrap();
        let err = run_create(&store, &config(), &runs_file, false).unwrap_err();
        assert!(matches!(err, CreateError::TargetExists { .. }));
        run_create(&store, &config(), &runs_file, true).unwrap();
    }

    #[test]
    fn sampled_create_writes_exactly_n_runs() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.sampler = Sampler::LatinHypercube {
            n_samples: 4,
            seed: 1,
        };
        let records =
            run_create(&store, &cfg, &dir.path().join("runs.yaml"), false).unwrap();
        assert_eq!(records.len(), 4);
        for record in &records {
            assert!(store.has_ids(&record.handle, "core_profiles"));
        }
    }

    #[test]
    fn db_override_redirects_generated_entries() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.db = Some("sandbox".into());
        let records =
            run_create(&store, &cfg, &dir.path().join("runs.yaml"), false).unwrap();
        assert_eq!(records[0].handle.db, "sandbox");
        assert_eq!(records[0].handle.user, current_user());
    }

    #[test]
    fn bad_dimensions_are_rejected_up_front() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.dimensions[0].values.clear();
        let err = run_create(&store, &cfg, &dir.path().join("runs.yaml"), false).unwrap_err();
        assert!(matches!(err, CreateError::Config(_)));
    }

    #[test]
    fn overflowing_run_numbers_are_rejected() {
        let store = store();
        let dir = tempfile::tempdir().unwrap();
        let runs_file = dir.path().join("runs.yaml");
        let mut cfg = config();
        // six combinations, but only four run numbers left
        cfg.run_start = u32::MAX - 3;
        let err = run_create(&store, &cfg, &runs_file, false).unwrap_err();
        assert!(matches!(err, CreateError::Config(_)));

        cfg.run_start = u32::MAX - 5;
        let records = run_create(&store, &cfg, &runs_file, false).unwrap();
        assert_eq!(records[5].handle.run, u32::MAX);
    }
}
