//! Mesh construction and the batched quadrature kernel.
//!
//! Two quadrature rules coexist here on purpose and must not be merged:
//!
//! - The batched COUNT/SUM path sums only the first `n_division − 1` mesh
//!   columns of each group's prediction row (left-endpoint rule). The final
//!   mesh point's contribution is excluded. This trades a known bias for
//!   amortizing one batched model evaluation across an arbitrarily large
//!   group count, and downstream answers depend on it staying exactly as is.
//! - [`approx_integrate`] is a standalone single-function primitive using
//!   the standard trapezoidal rule, kept for generic verification.

use std::collections::BTreeMap;

use aql_core::traits::Surrogate;
use aql_core::{AggregateFn, Error, Result};
use serde::{Serialize, Serializer};

use crate::model::Population;

/// Uniform evaluation grid over `[x_lb, x_ub]`, both endpoints included.
#[derive(Debug, Clone)]
pub struct Mesh {
    points: Vec<f64>,
    step: f64,
}

impl Mesh {
    /// Build an `n_division`-point mesh with step
    /// `(x_ub − x_lb) / (n_division − 1)`.
    pub fn new(x_lb: f64, x_ub: f64, n_division: usize) -> Result<Self> {
        if n_division < 2 {
            return Err(Error::Validation(format!(
                "mesh needs at least 2 divisions, got {n_division}"
            )));
        }
        if !x_lb.is_finite() || !x_ub.is_finite() {
            return Err(Error::Validation(format!(
                "mesh bounds must be finite, got [{x_lb}, {x_ub}]"
            )));
        }
        if x_ub < x_lb {
            return Err(Error::Validation(format!(
                "mesh upper bound {x_ub} is below lower bound {x_lb}"
            )));
        }
        let step = (x_ub - x_lb) / (n_division - 1) as f64;
        let mut points: Vec<f64> =
            (0..n_division).map(|i| x_lb + step * i as f64).collect();
        // Pin the last point so both endpoints are exact.
        points[n_division - 1] = x_ub;
        Ok(Self { points, step })
    }

    /// The evaluation points.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// The uniform step.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the mesh is empty (never true: construction requires ≥ 2).
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Integrate one callable over `[x_lb, x_ub]` with the standard trapezoidal
/// rule on an `n_division`-point mesh.
///
/// Verification-grade accuracy; not used by the batched per-group path.
pub fn approx_integrate<F>(func: F, x_lb: f64, x_ub: f64, n_division: usize) -> Result<f64>
where
    F: Fn(&[f64]) -> Result<Vec<f64>>,
{
    let mesh = Mesh::new(x_lb, x_ub, n_division)?;
    let p = func(mesh.points())?;
    if p.len() != mesh.len() {
        return Err(Error::Computation(format!(
            "integrand returned {} values for {} mesh points",
            p.len(),
            mesh.len()
        )));
    }
    let interior: f64 = p[1..p.len() - 1].iter().sum();
    Ok((0.5 * (p[0] + p[p.len() - 1]) + interior) * mesh.step())
}

/// Per-group aggregate outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateEstimate {
    /// A defined estimate.
    Value(f64),
    /// AVG over a range where the COUNT estimate is zero.
    Undefined,
}

impl Serialize for AggregateEstimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            AggregateEstimate::Value(v) => serializer.serialize_f64(*v),
            AggregateEstimate::Undefined => serializer.serialize_none(),
        }
    }
}

fn check_grid_shape(grid: &[Vec<f64>], n_groups: usize, n_points: usize, what: &str) -> Result<()> {
    if grid.len() != n_groups {
        return Err(Error::Computation(format!(
            "{what} grid has {} rows for {} groups",
            grid.len(),
            n_groups
        )));
    }
    if let Some(row) = grid.iter().find(|row| row.len() != n_points) {
        return Err(Error::Computation(format!(
            "{what} grid row has {} columns for {} mesh points",
            row.len(),
            n_points
        )));
    }
    Ok(())
}

/// Batched estimation over every requested group in one surrogate call.
///
/// The density (and, for SUM/AVG, regression) grid is evaluated once over
/// the full groups × mesh cross-product. COUNT and SUM are scaled by the
/// group's total-population count; the factor cancels in AVG, so
/// `AVG = SUM / COUNT` holds exactly. Groups with no known total are
/// excluded from the result rather than aborting the rest.
pub fn estimate(
    agg: AggregateFn,
    surrogate: &dyn Surrogate,
    x_lb: f64,
    x_ub: f64,
    groups: &[String],
    n_division: usize,
    totals: &Population,
) -> Result<BTreeMap<String, AggregateEstimate>> {
    let mesh = Mesh::new(x_lb, x_ub, n_division)?;
    let n = mesh.len();

    let density = surrogate.density_grid(groups, mesh.points())?;
    check_grid_shape(&density, groups.len(), n, "density")?;

    let regression = match agg {
        AggregateFn::Count => None,
        AggregateFn::Sum | AggregateFn::Avg => {
            let grid = surrogate.regression_grid(groups, mesh.points())?.ok_or_else(|| {
                Error::Validation(
                    "model has no regression estimator; only COUNT is available".to_string(),
                )
            })?;
            check_grid_shape(&grid, groups.len(), n, "regression")?;
            Some(grid)
        }
    };

    let mut out = BTreeMap::new();
    for (gi, group) in groups.iter().enumerate() {
        let Some(total) = totals.for_group(group) else {
            tracing::debug!(group = %group, "no total population count, group excluded");
            continue;
        };
        let total = total as f64;
        let d = &density[gi];

        // Left-endpoint rule: the last mesh column is excluded.
        let count = total * mesh.step() * d[..n - 1].iter().sum::<f64>();
        let value = match agg {
            AggregateFn::Count => AggregateEstimate::Value(count),
            AggregateFn::Sum | AggregateFn::Avg => {
                let reg = regression.as_ref().ok_or_else(|| {
                    Error::Computation("regression grid missing for SUM/AVG".to_string())
                })?;
                let r = &reg[gi];
                let sum = total
                    * mesh.step()
                    * d[..n - 1].iter().zip(&r[..n - 1]).map(|(&di, &ri)| di * ri).sum::<f64>();
                match agg {
                    AggregateFn::Sum => AggregateEstimate::Value(sum),
                    _ => {
                        if count == 0.0 {
                            AggregateEstimate::Undefined
                        } else {
                            AggregateEstimate::Value(sum / count)
                        }
                    }
                }
            }
        };
        out.insert(group.clone(), value);
    }
    Ok(out)
}

/// Estimation for a single implicit group.
pub fn estimate_single(
    agg: AggregateFn,
    surrogate: &dyn Surrogate,
    x_lb: f64,
    x_ub: f64,
    n_division: usize,
    totals: &Population,
) -> Result<AggregateEstimate> {
    let group = vec![String::new()];
    let mut out = estimate(agg, surrogate, x_lb, x_ub, &group, n_division, totals)?;
    out.remove("").ok_or_else(|| {
        Error::Computation("single-group estimation produced no value".to_string())
    })
}
