//! Estimator seams for ApproxQL
//!
//! The aggregation engine never depends on how an estimator was fit. It
//! consumes trained surrogates through the traits below, so quadrature logic
//! stays decoupled from kernel-density, least-squares, or mixture internals.

use crate::Result;

/// Probability density of the predicate column, evaluated in batch.
///
/// Implementations are fit on a sample of the predicate column and must
/// return one density value per query point.
pub trait DensityEstimator: Send + Sync {
    /// Evaluate the density at each of `points`.
    fn pdf(&self, points: &[f64]) -> Result<Vec<f64>>;
}

/// Conditional mean of the target column given the predicate value,
/// evaluated in batch.
pub trait RegressionEstimator: Send + Sync {
    /// Predict the conditional mean at each of `points`.
    fn predict(&self, points: &[f64]) -> Result<Vec<f64>>;
}

/// A trained surrogate evaluated over a groups × points cross-product.
///
/// This is the contract the aggregation engine integrates against. Two
/// shapes satisfy it: a paired (density, regression) duo serving a single
/// implicit group, and a bundle answering for every group in one batched
/// call. The engine cannot tell them apart, which is the point.
pub trait Surrogate {
    /// Density matrix: one row per requested group, one column per point.
    fn density_grid(&self, groups: &[String], points: &[f64]) -> Result<Vec<Vec<f64>>>;

    /// Conditional-mean matrix with the same shape as [`Surrogate::density_grid`],
    /// or `None` when the surrogate carries no regression capability
    /// (COUNT-only models).
    fn regression_grid(&self, groups: &[String], points: &[f64]) -> Result<Option<Vec<Vec<f64>>>>;
}

impl<T: Surrogate + ?Sized> Surrogate for &T {
    fn density_grid(&self, groups: &[String], points: &[f64]) -> Result<Vec<Vec<f64>>> {
        (**self).density_grid(groups, points)
    }

    fn regression_grid(&self, groups: &[String], points: &[f64]) -> Result<Option<Vec<Vec<f64>>>> {
        (**self).regression_grid(groups, points)
    }
}
