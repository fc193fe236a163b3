//! Per-group bundle estimator.
//!
//! One trained object holding a density and a conditional-mean surface for
//! every group value, answering an entire groups × points grid in a single
//! batched call. The consumer issues one call regardless of group count; the
//! batch is parallelized internally.

use std::collections::BTreeMap;

use aql_core::traits::{DensityEstimator, RegressionEstimator, Surrogate};
use aql_core::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mixture::GaussianMixture;
use crate::regression::KernelRegression;

/// One labeled training row: `(group, x, y)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRow {
    /// Group value the row belongs to.
    pub group: String,
    /// Independent-variable value.
    pub x: f64,
    /// Dependent-variable value.
    pub y: f64,
}

/// Training options for the bundle.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// EM sweeps per group density.
    pub num_epoch: usize,
    /// Mixture components per group density.
    pub num_gaussians: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { num_epoch: 400, num_gaussians: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupSurface {
    density: GaussianMixture,
    regression: KernelRegression,
}

/// Jointly-trained multi-group surrogate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureBundle {
    groups: BTreeMap<String, GroupSurface>,
}

impl MixtureBundle {
    /// Fit every group surface from labeled rows in one call.
    pub fn fit(rows: &[LabeledRow], opts: &FitOptions) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::Validation("bundle training set must be non-empty".to_string()));
        }

        let mut by_group: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for row in rows {
            let slot = by_group.entry(row.group.as_str()).or_default();
            slot.0.push(row.x);
            slot.1.push(row.y);
        }

        let groups = by_group
            .into_iter()
            .map(|(group, (xs, ys))| {
                let density = GaussianMixture::fit(&xs, opts.num_gaussians, opts.num_epoch)?;
                let regression = KernelRegression::fit(&xs, &ys)?;
                Ok((group.to_string(), GroupSurface { density, regression }))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self { groups })
    }

    /// Group values the bundle can answer for, sorted.
    pub fn group_values(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the bundle holds no groups (never true after `fit`).
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn surface(&self, group: &str) -> Result<&GroupSurface> {
        self.groups.get(group).ok_or_else(|| Error::KeyNotFound(group.to_string()))
    }
}

impl Surrogate for MixtureBundle {
    fn density_grid(&self, groups: &[String], points: &[f64]) -> Result<Vec<Vec<f64>>> {
        groups
            .par_iter()
            .map(|g| self.surface(g)?.density.pdf(points))
            .collect::<Result<Vec<_>>>()
    }

    fn regression_grid(&self, groups: &[String], points: &[f64]) -> Result<Option<Vec<Vec<f64>>>> {
        let grid = groups
            .par_iter()
            .map(|g| self.surface(g)?.regression.predict(points))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(grid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training_rows() -> Vec<LabeledRow> {
        let mut rows = Vec::new();
        for i in 0..80 {
            let x = i as f64 / 8.0;
            rows.push(LabeledRow { group: "1".to_string(), x, y: 2.0 * x });
            rows.push(LabeledRow { group: "2".to_string(), x: x + 20.0, y: 100.0 - x });
        }
        rows
    }

    #[test]
    fn test_fit_partitions_groups() {
        let bundle = MixtureBundle::fit(&training_rows(), &FitOptions::default()).unwrap();
        assert_eq!(bundle.group_values(), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(bundle.len(), 2);
    }

    #[test]
    fn test_grid_shapes_match_request() {
        let bundle = MixtureBundle::fit(&training_rows(), &FitOptions::default()).unwrap();
        let groups = bundle.group_values();
        let points = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let density = bundle.density_grid(&groups, &points).unwrap();
        assert_eq!(density.len(), 2);
        assert!(density.iter().all(|row| row.len() == points.len()));
        let reg = bundle.regression_grid(&groups, &points).unwrap().unwrap();
        assert_eq!(reg.len(), 2);
        assert!(reg.iter().all(|row| row.len() == points.len()));
    }

    #[test]
    fn test_unknown_group_is_an_error() {
        let bundle = MixtureBundle::fit(&training_rows(), &FitOptions::default()).unwrap();
        let err = bundle.density_grid(&["7".to_string()], &[1.0]).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
    }

    #[test]
    fn test_empty_training_set_rejected() {
        assert!(MixtureBundle::fit(&[], &FitOptions::default()).is_err());
    }

    #[test]
    fn test_serde_roundtrip_preserves_grid() {
        let opts = FitOptions { num_epoch: 30, num_gaussians: 2 };
        let bundle = MixtureBundle::fit(&training_rows(), &opts).unwrap();
        let json = serde_json::to_string(&bundle).unwrap();
        let bundle2: MixtureBundle = serde_json::from_str(&json).unwrap();
        let groups = bundle.group_values();
        let points = vec![2.5, 7.5];
        assert_eq!(
            bundle.density_grid(&groups, &points).unwrap(),
            bundle2.density_grid(&groups, &points).unwrap()
        );
    }
}
