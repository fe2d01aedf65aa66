//! Merging an ensemble of runs into one data entry with error bounds.
//!
//! Every run is rebased onto the template's grid and time bases (grid
//! first, then time), so that each (time step, grid point) cell lines up
//! across runs. The merged entry gets the per-cell mean written to the
//! variable's own path and mean plus one standard deviation written next to
//! it with an `_error_upper` suffix, which is how IMAS consumers pick up
//! uncertainty bands.

use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use polars::prelude::*;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, MergeError, TreeError};
use crate::handle::{ImasHandle, RunRecord};
use crate::mapping::{path_at_index, wildcard_count, IdsMapping};
use crate::rebase::{
    check_monotonic, rebase_on_grid, rebase_on_time, Extrapolate, RunSeries, TimeSlice,
};
use crate::storage::{copy_ids, IdsStore};

/// One merge step from the config: which IDS, which bases, which variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeStep {
    pub ids: String,
    /// Path of the time vector. No wildcards.
    #[serde(default = "default_time_path")]
    pub time: String,
    /// Path of the grid, with one `*` standing for the time step.
    pub grid: String,
    /// Paths of the profiles to merge, each with one `*` for the time step.
    pub variables: Vec<String>,
}

fn default_time_path() -> String {
    "time".to_string()
}

impl MergeStep {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if wildcard_count(&self.time) != 0 {
            return Err(ConfigError::Validation(format!(
                "merge step {:?}: time path may not contain wildcards",
                self.ids
            )));
        }
        if wildcard_count(&self.grid) != 1 {
            return Err(ConfigError::Validation(format!(
                "merge step {:?}: grid path needs exactly one `*`",
                self.ids
            )));
        }
        if self.variables.is_empty() {
            return Err(ConfigError::Validation(format!(
                "merge step {:?} has no variables",
                self.ids
            )));
        }
        for path in &self.variables {
            if wildcard_count(path) != 1 {
                return Err(ConfigError::Validation(format!(
                    "merge step {:?}: variable path {:?} needs exactly one `*`",
                    self.ids, path
                )));
            }
        }
        Ok(())
    }
}

/// The merge section of the config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    pub template: ImasHandle,
    pub output: ImasHandle,
    #[serde(default)]
    pub extrapolate: Extrapolate,
    pub plan: Vec<MergeStep>,
    /// Directory for per-step parquet summaries, if wanted.
    #[serde(default)]
    pub summary: Option<PathBuf>,
}

impl MergeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plan.is_empty() {
            return Err(ConfigError::Validation("merge plan is empty".into()));
        }
        if self.template == self.output {
            return Err(ConfigError::Validation(
                "merge output must differ from the template".into(),
            ));
        }
        for step in &self.plan {
            step.validate()?;
        }
        Ok(())
    }
}

/// Grid and time bases taken from the template entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceBasis {
    pub grid: Vec<f64>,
    pub time: Vec<f64>,
}

impl ReferenceBasis {
    /// The common bases are the template's time vector and its grid at the
    /// first time step. Both must be strictly increasing.
    pub fn from_template(
        store: &dyn IdsStore,
        template: &ImasHandle,
        step: &MergeStep,
    ) -> Result<Self, MergeError> {
        let mapping = IdsMapping::new(store.read_ids(template, &step.ids)?);
        let time = mapping
            .get_array(&step.time)
            .map_err(|source| MergeError::MissingReference {
                what: "time basis",
                source,
            })?
            .to_vec();
        let grid = mapping
            .get_array(&path_at_index(&step.grid, &[0]))
            .map_err(|source| MergeError::MissingReference {
                what: "grid basis",
                source,
            })?
            .to_vec();
        if time.is_empty() {
            return Err(MergeError::EmptyReference { what: "time basis" });
        }
        if grid.is_empty() {
            return Err(MergeError::EmptyReference { what: "grid basis" });
        }
        check_monotonic("time", &time)?;
        check_monotonic("grid", &grid)?;
        Ok(ReferenceBasis { grid, time })
    }
}

fn run_err(run: &RunRecord, source: TreeError) -> MergeError {
    MergeError::RunData {
        run: run.name.clone(),
        source,
    }
}

/// Pull one run's data for a step into tabular form.
pub fn extract_series(
    store: &dyn IdsStore,
    run: &RunRecord,
    step: &MergeStep,
) -> Result<RunSeries, MergeError> {
    let mapping = IdsMapping::new(store.read_ids(&run.handle, &step.ids)?);
    let time = mapping
        .get_array(&step.time)
        .map_err(|e| run_err(run, e))?
        .to_vec();
    let mut slices = Vec::with_capacity(time.len());
    for (tstep, &t) in time.iter().enumerate() {
        let grid = mapping
            .get_array(&path_at_index(&step.grid, &[tstep]))
            .map_err(|e| run_err(run, e))?
            .to_vec();
        let mut columns = Vec::with_capacity(step.variables.len());
        for path in &step.variables {
            let column = mapping
                .get_array(&path_at_index(path, &[tstep]))
                .map_err(|e| run_err(run, e))?
                .to_vec();
            columns.push(column);
        }
        slices.push(TimeSlice {
            time: t,
            grid,
            columns,
        });
    }
    Ok(RunSeries {
        run: run.name.clone(),
        vars: step.variables.clone(),
        slices,
    })
}

/// Extract one run and rebase it onto the reference bases, grid first.
pub fn prepare_series(
    store: &dyn IdsStore,
    run: &RunRecord,
    step: &MergeStep,
    basis: &ReferenceBasis,
    policy: Extrapolate,
) -> Result<RunSeries, MergeError> {
    let mut series = extract_series(store, run, step)?;
    rebase_on_grid(&mut series, &basis.grid, policy).map_err(|source| MergeError::RunRebase {
        run: run.name.clone(),
        source,
    })?;
    rebase_on_time(&mut series, &basis.time, policy).map_err(|source| MergeError::RunRebase {
        run: run.name.clone(),
        source,
    })?;
    Ok(series)
}

/// Merged statistics on the common lattice, in row-major
/// `(time step, grid point)` order.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    pub paths: Vec<String>,
    pub labels: Vec<String>,
    pub time: Vec<f64>,
    pub grid: Vec<f64>,
    pub mean: Vec<Vec<f64>>,
    pub std: Vec<Vec<f64>>,
    pub n_runs: usize,
}

impl MergedTable {
    pub fn rows(&self) -> usize {
        self.time.len() * self.grid.len()
    }

    pub fn mean_profile(&self, var: usize, tstep: usize) -> &[f64] {
        let l = self.grid.len();
        &self.mean[var][tstep * l..(tstep + 1) * l]
    }

    pub fn std_profile(&self, var: usize, tstep: usize) -> &[f64] {
        let l = self.grid.len();
        &self.std[var][tstep * l..(tstep + 1) * l]
    }
}

/// Short column labels: the last path segment, unless that would collide.
fn column_labels(paths: &[String]) -> Vec<String> {
    let shorts: Vec<&str> = paths
        .iter()
        .map(|p| p.rsplit('/').next().unwrap_or(p.as_str()))
        .collect();
    let unique: FxHashSet<&str> = shorts.iter().copied().collect();
    if unique.len() == shorts.len() {
        shorts.into_iter().map(String::from).collect()
    } else {
        paths.to_vec()
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Group rebased runs by (time step, grid point) and take mean and sample
/// standard deviation per cell. A single run merges to itself with zero
/// deviation.
pub fn aggregate(series: &[RunSeries]) -> Result<MergedTable, MergeError> {
    let first = series.first().ok_or(MergeError::NoRuns)?;
    let time: Vec<f64> = first.slices.iter().map(|s| s.time).collect();
    let grid: Vec<f64> = first.slices.first().map(|s| s.grid.clone()).unwrap_or_default();
    let n_vars = first.vars.len();
    let (t_len, g_len) = (time.len(), grid.len());
    for s in series {
        let on_lattice = s.slices.len() == t_len
            && s.vars.len() == n_vars
            && s.slices
                .iter()
                .all(|slice| slice.grid.len() == g_len && slice.columns.len() == n_vars);
        if !on_lattice {
            return Err(MergeError::LatticeMismatch {
                run: s.run.clone(),
            });
        }
    }

    let mut mean = vec![Vec::with_capacity(t_len * g_len); n_vars];
    let mut std = vec![Vec::with_capacity(t_len * g_len); n_vars];
    let mut cell = Vec::with_capacity(series.len());
    for var in 0..n_vars {
        for tstep in 0..t_len {
            for point in 0..g_len {
                cell.clear();
                cell.extend(series.iter().map(|s| s.slices[tstep].columns[var][point]));
                let (m, s) = mean_std(&cell);
                mean[var].push(m);
                std[var].push(s);
            }
        }
    }
    Ok(MergedTable {
        labels: column_labels(&first.vars),
        paths: first.vars.clone(),
        time,
        grid,
        mean,
        std,
        n_runs: series.len(),
    })
}

/// Stage the merged statistics into the output entry and sync them.
///
/// Per variable and time step this writes the mean profile to the
/// variable's path and mean plus one standard deviation to the
/// `_error_upper` sibling.
pub fn write_merged(
    store: &dyn IdsStore,
    output: &ImasHandle,
    step: &MergeStep,
    table: &MergedTable,
) -> Result<(), MergeError> {
    let mut mapping = IdsMapping::new(store.read_ids(output, &step.ids)?);
    for (var, path) in table.paths.iter().enumerate() {
        for tstep in 0..table.time.len() {
            let target = path_at_index(path, &[tstep]);
            let mean = table.mean_profile(var, tstep);
            let upper: Vec<f64> = mean
                .iter()
                .zip(table.std_profile(var, tstep))
                .map(|(m, s)| m + s)
                .collect();
            mapping.stage(format!("{target}_error_upper"), upper.into());
            mapping.stage(target, mean.to_vec().into());
        }
    }
    mapping.sync(store, output, &step.ids)?;
    Ok(())
}

/// Long-format parquet summary of one merged step.
pub fn write_summary(path: &Path, table: &MergedTable) -> Result<(), MergeError> {
    let rows = table.rows();
    let mut tstep_col: Vec<u32> = Vec::with_capacity(rows);
    let mut time_col: Vec<f64> = Vec::with_capacity(rows);
    let mut grid_col: Vec<f64> = Vec::with_capacity(rows);
    for (tstep, &time) in table.time.iter().enumerate() {
        for &point in &table.grid {
            tstep_col.push(tstep as u32);
            time_col.push(time);
            grid_col.push(point);
        }
    }
    let mut columns: Vec<Series> = vec![
        Series::new("tstep".into(), tstep_col),
        Series::new("time".into(), time_col),
        Series::new("grid".into(), grid_col),
    ];
    for (var, label) in table.labels.iter().enumerate() {
        columns.push(Series::new(label.as_str().into(), table.mean[var].as_slice()));
        columns.push(Series::new(
            format!("{label}_std").into(),
            table.std[var].as_slice(),
        ));
    }
    let mut frame: DataFrame = columns.into_iter().collect();
    let mut file = fs::File::create(path)?;
    ParquetWriter::new(&mut file).finish(&mut frame)?;
    Ok(())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Run the full merge plan: copy the template into the output entry, then
/// per step rebase every run, aggregate and write back.
pub fn run_merge(
    store: &dyn IdsStore,
    cfg: &MergeConfig,
    runs: &[RunRecord],
) -> Result<(), MergeError> {
    cfg.validate()?;
    if runs.is_empty() {
        return Err(MergeError::NoRuns);
    }
    let mut copied: FxHashSet<&str> = FxHashSet::default();
    for step in &cfg.plan {
        if copied.insert(step.ids.as_str()) {
            copy_ids(store, &cfg.template, &cfg.output, &step.ids)?;
        }
    }
    for (index, step) in cfg.plan.iter().enumerate() {
        info!(ids = %step.ids, variables = step.variables.len(), runs = runs.len(), "merging");
        let basis = ReferenceBasis::from_template(store, &cfg.template, step)?;
        let bar = ProgressBar::new(runs.len() as u64)
            .with_style(bar_style())
            .with_message(format!("rebasing {}", step.ids));
        let mut series = Vec::with_capacity(runs.len());
        for run in runs {
            series.push(prepare_series(store, run, step, &basis, cfg.extrapolate)?);
            bar.inc(1);
        }
        bar.finish();
        let table = aggregate(&series)?;
        write_merged(store, &cfg.output, step, &table)?;
        if let Some(dir) = &cfg.summary {
            fs::create_dir_all(dir)?;
            let file = dir.join(format!("merge_{index}_{}.parquet", step.ids));
            write_summary(&file, &table)?;
            info!(path = %file.display(), "wrote merge summary");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;
    use crate::tree::Node;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    fn profiles(grid: &[f64], values: &[&[f64]]) -> Node {
        Node::list(
            values
                .iter()
                .map(|v| {
                    Node::group([
                        ("grid", Node::group([("rho", Node::array(grid.to_vec()))])),
                        ("t_i_average", Node::array(v.to_vec())),
                    ])
                })
                .collect(),
        )
    }

    fn entry(time: &[f64], grid: &[f64], values: &[&[f64]]) -> Node {
        Node::group([
            ("time", Node::array(time.to_vec())),
            ("profiles_1d", profiles(grid, values)),
        ])
    }

    fn step() -> MergeStep {
        MergeStep {
            ids: "core_profiles".into(),
            time: "time".into(),
            grid: "profiles_1d/*/grid/rho".into(),
            variables: vec!["profiles_1d/*/t_i_average".into()],
        }
    }

    fn record(name: &str, handle: &ImasHandle) -> RunRecord {
        RunRecord {
            name: name.into(),
            handle: handle.clone(),
        }
    }

    fn fixture() -> (MemStore, MergeConfig, Vec<RunRecord>) {
        let store = MemStore::new();
        let template: ImasHandle = "tester/jet/92436/1".parse().unwrap();
        let run_a = template.with_run(100);
        let run_b = template.with_run(101);
        let output = template.with_run(200);
        store.insert(
            &template,
            "core_profiles",
            entry(&[0.0, 1.0], &[0.0, 1.0], &[&[0.0, 0.0], &[0.0, 0.0]]),
        );
        store.insert(
            &run_a,
            "core_profiles",
            entry(&[0.0, 1.0], &[0.0, 1.0], &[&[10.0, 20.0], &[30.0, 40.0]]),
        );
        // run b sits on a wider grid, so it exercises the grid rebase
        store.insert(
            &run_b,
            "core_profiles",
            entry(&[0.0, 1.0], &[0.0, 2.0], &[&[20.0, 40.0], &[40.0, 60.0]]),
        );
        let cfg = MergeConfig {
            template: template.clone(),
            output,
            extrapolate: Extrapolate::Strict,
            plan: vec![step()],
            summary: None,
        };
        let runs = vec![record("run_0000", &run_a), record("run_0001", &run_b)];
        (store, cfg, runs)
    }

    #[test]
    fn step_validation_checks_wildcard_shapes() {
        let mut bad = step();
        bad.grid = "profiles_1d/0/grid/rho".into();
        assert!(bad.validate().is_err());
        let mut bad = step();
        bad.time = "time/*".into();
        assert!(bad.validate().is_err());
        let mut bad = step();
        bad.variables = vec!["profiles_1d/0/t_i_average".into()];
        assert!(bad.validate().is_err());
        assert!(step().validate().is_ok());
    }

    #[test]
    fn reference_basis_comes_from_the_template() {
        let (store, cfg, _) = fixture();
        let basis = ReferenceBasis::from_template(&store, &cfg.template, &cfg.plan[0]).unwrap();
        assert_eq!(basis.time, vec![0.0, 1.0]);
        assert_eq!(basis.grid, vec![0.0, 1.0]);
    }

    #[test]
    fn missing_template_reference_is_fatal() {
        let (store, cfg, _) = fixture();
        let mut bad = cfg.plan[0].clone();
        bad.grid = "profiles_1d/*/grid/psi".into();
        let err = ReferenceBasis::from_template(&store, &cfg.template, &bad).unwrap_err();
        assert!(matches!(
            err,
            MergeError::MissingReference {
                what: "grid basis",
                ..
            }
        ));
    }

    #[test]
    fn nan_in_the_template_basis_is_fatal() {
        let (store, cfg, runs) = fixture();
        store.insert(
            &cfg.template,
            "core_profiles",
            entry(&[0.0, f64::NAN], &[0.0, 1.0], &[&[0.0, 0.0], &[0.0, 0.0]]),
        );
        let err = run_merge(&store, &cfg, &runs).unwrap_err();
        assert!(matches!(
            err,
            MergeError::Rebase(crate::error::RebaseError::NonMonotonic {
                axis: "time",
                index: 1
            })
        ));

        store.insert(
            &cfg.template,
            "core_profiles",
            entry(&[0.0, 1.0], &[0.0, f64::NAN], &[&[0.0, 0.0], &[0.0, 0.0]]),
        );
        let err = run_merge(&store, &cfg, &runs).unwrap_err();
        assert!(matches!(
            err,
            MergeError::Rebase(crate::error::RebaseError::NonMonotonic {
                axis: "grid",
                index: 1
            })
        ));
    }

    #[test]
    fn aggregation_takes_mean_and_sample_deviation_per_cell() {
        let (store, cfg, runs) = fixture();
        let basis = ReferenceBasis::from_template(&store, &cfg.template, &cfg.plan[0]).unwrap();
        let series: Vec<RunSeries> = runs
            .iter()
            .map(|r| prepare_series(&store, r, &cfg.plan[0], &basis, Extrapolate::Strict).unwrap())
            .collect();
        let table = aggregate(&series).unwrap();
        assert_eq!(table.n_runs, 2);
        assert_eq!(table.labels, vec!["t_i_average"]);
        // run b rebases to [20, 30] at t=0 and [40, 50] at t=1
        assert!(close(table.mean_profile(0, 0), &[15.0, 25.0]));
        assert!(close(table.mean_profile(0, 1), &[35.0, 45.0]));
        let spread = 50.0_f64.sqrt();
        assert!(close(table.std_profile(0, 0), &[spread, spread]));
    }

    #[test]
    fn merged_entry_carries_mean_and_error_upper() {
        let (store, cfg, runs) = fixture();
        run_merge(&store, &cfg, &runs).unwrap();
        let merged = IdsMapping::new(store.read_ids(&cfg.output, "core_profiles").unwrap());
        let mean = merged
            .get_array("profiles_1d/0/t_i_average")
            .unwrap()
            .to_vec();
        let upper = merged
            .get_array("profiles_1d/0/t_i_average_error_upper")
            .unwrap()
            .to_vec();
        let spread = 50.0_f64.sqrt();
        assert!(close(&mean, &[15.0, 25.0]));
        assert!(close(&upper, &[15.0 + spread, 25.0 + spread]));
        // untouched template fields survive the copy
        assert_eq!(
            merged.get_array("time").unwrap().to_vec(),
            vec![0.0, 1.0]
        );
    }

    #[test]
    fn single_run_merges_to_itself_with_zero_deviation() {
        let (store, cfg, runs) = fixture();
        run_merge(&store, &cfg, &runs[..1]).unwrap();
        let merged = IdsMapping::new(store.read_ids(&cfg.output, "core_profiles").unwrap());
        let mean = merged
            .get_array("profiles_1d/1/t_i_average")
            .unwrap()
            .to_vec();
        let upper = merged
            .get_array("profiles_1d/1/t_i_average_error_upper")
            .unwrap()
            .to_vec();
        assert_eq!(mean, vec![30.0, 40.0]);
        assert_eq!(upper, mean);
    }

    #[test]
    fn runs_outside_the_reference_range_fail_strict_but_clamp() {
        let (store, mut cfg, runs) = fixture();
        // narrow run: its grid only spans half of the template's
        let narrow = cfg.template.with_run(102);
        store.insert(
            &narrow,
            "core_profiles",
            entry(&[0.0, 1.0], &[0.0, 0.5], &[&[1.0, 2.0], &[3.0, 4.0]]),
        );
        let mut all = runs.clone();
        all.push(record("run_0002", &narrow));
        let err = run_merge(&store, &cfg, &all).unwrap_err();
        assert!(matches!(
            err,
            MergeError::RunRebase {
                ref run,
                source: crate::error::RebaseError::OutOfRange { .. },
            } if run == "run_0002"
        ));
        cfg.extrapolate = Extrapolate::Clamp;
        run_merge(&store, &cfg, &all).unwrap();
    }

    #[test]
    fn runs_missing_step_data_name_the_run() {
        let (store, cfg, mut runs) = fixture();
        let bare = cfg.template.with_run(103);
        store.insert(&bare, "core_profiles", entry(&[0.0], &[0.0, 1.0], &[&[1.0, 2.0]]));
        let mut bad_step = cfg.plan[0].clone();
        bad_step.variables = vec!["profiles_1d/*/zeff".into()];
        runs.push(record("run_0002", &bare));
        let err = extract_series(&store, &runs[2], &bad_step).unwrap_err();
        assert!(matches!(err, MergeError::RunData { ref run, .. } if run == "run_0002"));
    }

    #[test]
    fn no_runs_is_an_error() {
        let (store, cfg, _) = fixture();
        assert!(matches!(
            run_merge(&store, &cfg, &[]).unwrap_err(),
            MergeError::NoRuns
        ));
    }

    #[test]
    fn summary_parquet_lands_per_step() {
        let (store, mut cfg, runs) = fixture();
        let dir = tempfile::tempdir().unwrap();
        cfg.summary = Some(dir.path().join("summaries"));
        run_merge(&store, &cfg, &runs).unwrap();
        let file = dir.path().join("summaries/merge_0_core_profiles.parquet");
        assert!(file.exists());
        assert!(std::fs::metadata(&file).unwrap().len() > 0);
    }

    #[test]
    fn column_labels_fall_back_to_full_paths_on_collision() {
        let short = column_labels(&[
            "profiles_1d/*/t_i_average".into(),
            "profiles_1d/*/zeff".into(),
        ]);
        assert_eq!(short, vec!["t_i_average", "zeff"]);
        let full = column_labels(&[
            "profiles_1d/*/grid/rho".into(),
            "equilibrium_1d/*/grid/rho".into(),
        ]);
        assert_eq!(
            full,
            vec!["profiles_1d/*/grid/rho", "equilibrium_1d/*/grid/rho"]
        );
    }
}
