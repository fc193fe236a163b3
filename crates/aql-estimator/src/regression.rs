//! Regression estimators.
//!
//! Two conditional-mean learners over `(x, y)` samples:
//! - [`PolyRegression`]: polynomial least squares, solved by SVD.
//! - [`KernelRegression`]: Nadaraya–Watson kernel-weighted mean.

use aql_core::traits::RegressionEstimator;
use aql_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::math::gaussian_kernel;

fn validate_xy(xs: &[f64], ys: &[f64]) -> Result<()> {
    if xs.is_empty() {
        return Err(Error::Validation("regression sample must be non-empty".to_string()));
    }
    if xs.len() != ys.len() {
        return Err(Error::Validation(format!(
            "x/y length mismatch: {} vs {}",
            xs.len(),
            ys.len()
        )));
    }
    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return Err(Error::Validation(
            "regression sample must contain only finite values".to_string(),
        ));
    }
    Ok(())
}

/// Polynomial least-squares regression `y ≈ c0 + c1·x + … + cd·x^d`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolyRegression {
    coefficients: Vec<f64>,
}

impl PolyRegression {
    /// Fit a degree-`degree` polynomial to `(xs, ys)`.
    ///
    /// Needs at least `degree + 1` observations.
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> Result<Self> {
        validate_xy(xs, ys)?;
        if xs.len() <= degree {
            return Err(Error::Validation(format!(
                "need more than {} observations for degree {}, got {}",
                degree,
                degree,
                xs.len()
            )));
        }

        let n = xs.len();
        let design = DMatrix::from_fn(n, degree + 1, |i, j| xs[i].powi(j as i32));
        let rhs = DVector::from_column_slice(ys);
        let svd = design.svd(true, true);
        let solution = svd
            .solve(&rhs, 1e-12)
            .map_err(|msg| Error::Computation(format!("least-squares solve failed: {msg}")))?;

        Ok(Self { coefficients: solution.iter().copied().collect() })
    }

    /// Fitted coefficients, constant term first.
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    #[inline]
    fn eval(&self, x: f64) -> f64 {
        // Horner evaluation, highest-order coefficient first.
        self.coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }
}

impl RegressionEstimator for PolyRegression {
    fn predict(&self, points: &[f64]) -> Result<Vec<f64>> {
        Ok(points.iter().map(|&x| self.eval(x)).collect())
    }
}

/// Nadaraya–Watson kernel regression.
///
/// Predicts the kernel-weighted mean of the stored responses. Far outside
/// the support every weight underflows to zero; the prediction then falls
/// back to the global response mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelRegression {
    xs: Vec<f64>,
    ys: Vec<f64>,
    bandwidth: f64,
    fallback: f64,
}

impl KernelRegression {
    /// Fit on `(xs, ys)` with a Silverman-style bandwidth over `xs`.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self> {
        validate_xy(xs, ys)?;
        let n = xs.len() as f64;
        let sd = if xs.len() > 1 { xs.std_dev() } else { 0.0 };
        let mut bandwidth = 1.06 * sd * n.powf(-0.2);
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            bandwidth = 1e-3;
        }
        let fallback = ys.iter().sum::<f64>() / n;
        Ok(Self { xs: xs.to_vec(), ys: ys.to_vec(), bandwidth, fallback })
    }

    /// The bandwidth in use.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

impl RegressionEstimator for KernelRegression {
    fn predict(&self, points: &[f64]) -> Result<Vec<f64>> {
        let h = self.bandwidth;
        Ok(points
            .iter()
            .map(|&x| {
                let mut num = 0.0;
                let mut den = 0.0;
                for (&xi, &yi) in self.xs.iter().zip(&self.ys) {
                    let w = gaussian_kernel((x - xi) / h);
                    num += w * yi;
                    den += w;
                }
                if den > 0.0 {
                    num / den
                } else {
                    self.fallback
                }
            })
            .collect())
    }
}
