//! Rebasing run data onto reference bases.
//!
//! Runs in an ensemble rarely share a radial grid or time vector, so before
//! any cross-run statistics each run is interpolated onto the template's
//! bases. The grid rebase must run first: it puts every time step of a run
//! on one shared grid, which is what makes the per-grid-point time rebase
//! meaningful.

use serde::{Deserialize, Serialize};

use crate::error::RebaseError;

/// How to treat interpolation targets outside the source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Extrapolate {
    /// Fail with [`RebaseError::OutOfRange`].
    #[default]
    Strict,
    /// Hold the boundary value.
    Clamp,
}

/// Check that a basis is strictly increasing. A NaN anywhere fails.
pub fn check_monotonic(axis: &'static str, basis: &[f64]) -> Result<(), RebaseError> {
    for i in 0..basis.len() {
        let increasing = i == 0 || basis[i] > basis[i - 1];
        if !increasing || basis[i].is_nan() {
            return Err(RebaseError::NonMonotonic { axis, index: i });
        }
    }
    Ok(())
}

/// Piecewise-linear interpolation of the samples `(x, y)` onto the targets
/// `xi`. `x` must be strictly increasing and the same length as `y`. A NaN
/// target is out of range under either policy.
pub fn interp_linear(
    xi: &[f64],
    x: &[f64],
    y: &[f64],
    policy: Extrapolate,
) -> Result<Vec<f64>, RebaseError> {
    if x.is_empty() {
        return Err(RebaseError::EmptySource);
    }
    debug_assert_eq!(x.len(), y.len());
    let (lo, hi) = (x[0], x[x.len() - 1]);
    xi.iter()
        .map(|&target| {
            if target.is_nan() {
                return Err(RebaseError::OutOfRange {
                    value: target,
                    lo,
                    hi,
                });
            }
            if target < lo || target > hi {
                return match policy {
                    Extrapolate::Strict => Err(RebaseError::OutOfRange {
                        value: target,
                        lo,
                        hi,
                    }),
                    Extrapolate::Clamp => Ok(if target < lo { y[0] } else { y[y.len() - 1] }),
                };
            }
            // first index with x[j] > target; target == hi lands past the end
            let j = x.partition_point(|&v| v <= target);
            if j == x.len() {
                return Ok(y[y.len() - 1]);
            }
            let (x0, x1) = (x[j - 1], x[j]);
            let (y0, y1) = (y[j - 1], y[j]);
            Ok(y0 + (y1 - y0) * (target - x0) / (x1 - x0))
        })
        .collect()
}

/// Data of one run for one merge step: per time step, a grid and one column
/// of values per variable.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSeries {
    pub run: String,
    pub vars: Vec<String>,
    pub slices: Vec<TimeSlice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSlice {
    pub time: f64,
    pub grid: Vec<f64>,
    pub columns: Vec<Vec<f64>>,
}

fn check_columns(slice: &TimeSlice, tstep: usize) -> Result<(), RebaseError> {
    for column in &slice.columns {
        if column.len() != slice.grid.len() {
            return Err(RebaseError::ColumnLength {
                tstep,
                expected: slice.grid.len(),
                found: column.len(),
            });
        }
    }
    Ok(())
}

/// Interpolate every time step's columns onto `new_base` and install it as
/// the grid of each slice.
pub fn rebase_on_grid(
    series: &mut RunSeries,
    new_base: &[f64],
    policy: Extrapolate,
) -> Result<(), RebaseError> {
    check_monotonic("grid", new_base)?;
    for (tstep, slice) in series.slices.iter_mut().enumerate() {
        check_monotonic("grid", &slice.grid)?;
        check_columns(slice, tstep)?;
        for column in &mut slice.columns {
            *column = interp_linear(new_base, &slice.grid, column, policy)?;
        }
        slice.grid = new_base.to_vec();
    }
    Ok(())
}

/// Interpolate along time onto `new_base`, tracing each grid point through
/// the time steps. Every slice must already be on one shared grid, which
/// [`rebase_on_grid`] guarantees.
pub fn rebase_on_time(
    series: &mut RunSeries,
    new_base: &[f64],
    policy: Extrapolate,
) -> Result<(), RebaseError> {
    check_monotonic("time", new_base)?;
    if series.slices.is_empty() {
        return Err(RebaseError::EmptySource);
    }
    let times: Vec<f64> = series.slices.iter().map(|s| s.time).collect();
    check_monotonic("time", &times)?;
    let grid = series.slices[0].grid.clone();
    for (tstep, slice) in series.slices.iter().enumerate() {
        if slice.grid != grid {
            return Err(RebaseError::GridMismatch { tstep });
        }
        check_columns(slice, tstep)?;
    }

    let n_vars = series.vars.len();
    let n_points = grid.len();
    let mut rebased: Vec<TimeSlice> = new_base
        .iter()
        .map(|&time| TimeSlice {
            time,
            grid: grid.clone(),
            columns: vec![vec![0.0; n_points]; n_vars],
        })
        .collect();
    for var in 0..n_vars {
        for point in 0..n_points {
            let trace: Vec<f64> = series
                .slices
                .iter()
                .map(|s| s.columns[var][point])
                .collect();
            let interpolated = interp_linear(new_base, &times, &trace, policy)?;
            for (k, value) in interpolated.into_iter().enumerate() {
                rebased[k].columns[var][point] = value;
            }
        }
    }
    series.slices = rebased;
    Ok(())
}
