//! 1-D Gaussian mixture density fit by EM.

use aql_core::traits::DensityEstimator;
use aql_core::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::math::normal_pdf;

/// Floor applied to component standard deviations to keep the E-step
/// numerically sane.
const MIN_SIGMA: f64 = 1e-4;

/// Gaussian mixture `Σ w_j · N(μ_j, σ_j)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianMixture {
    weights: Vec<f64>,
    means: Vec<f64>,
    sds: Vec<f64>,
}

impl GaussianMixture {
    /// Fit `n_components` by EM with `n_sweeps` full passes.
    ///
    /// Initialization is deterministic: means at sample quantiles, shared
    /// sample standard deviation, uniform weights. The component count is
    /// capped at the sample size.
    pub fn fit(sample: &[f64], n_components: usize, n_sweeps: usize) -> Result<Self> {
        if sample.is_empty() {
            return Err(Error::Validation("mixture sample must be non-empty".to_string()));
        }
        if sample.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation(
                "mixture sample must contain only finite values".to_string(),
            ));
        }
        if n_components == 0 {
            return Err(Error::Validation("n_components must be >= 1".to_string()));
        }

        let k = n_components.min(sample.len());
        let n = sample.len();

        let mut sorted = sample.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mut means: Vec<f64> = (0..k)
            .map(|j| {
                let q = (j as f64 + 0.5) / k as f64;
                sorted[((q * n as f64) as usize).min(n - 1)]
            })
            .collect();

        let overall_sd = if n > 1 { sample.std_dev() } else { 0.0 };
        let init_sd = overall_sd.max(MIN_SIGMA);
        let mut sds = vec![init_sd; k];
        let mut weights = vec![1.0 / k as f64; k];

        let mut resp = vec![0.0_f64; k];
        for _ in 0..n_sweeps {
            let mut w_acc = vec![0.0_f64; k];
            let mut mu_acc = vec![0.0_f64; k];
            let mut var_acc = vec![0.0_f64; k];

            for &x in sample {
                let mut total = 0.0;
                for j in 0..k {
                    resp[j] = weights[j] * normal_pdf(x, means[j], sds[j]);
                    total += resp[j];
                }
                if total <= 0.0 || !total.is_finite() {
                    // Point unreachable under the current components: spread
                    // responsibility uniformly instead of dividing by zero.
                    resp.iter_mut().for_each(|r| *r = 1.0 / k as f64);
                } else {
                    resp.iter_mut().for_each(|r| *r /= total);
                }
                for j in 0..k {
                    w_acc[j] += resp[j];
                    mu_acc[j] += resp[j] * x;
                }
            }

            for j in 0..k {
                if w_acc[j] > 0.0 {
                    means[j] = mu_acc[j] / w_acc[j];
                }
            }
            for &x in sample {
                let mut total = 0.0;
                for j in 0..k {
                    resp[j] = weights[j] * normal_pdf(x, means[j], sds[j]);
                    total += resp[j];
                }
                if total <= 0.0 || !total.is_finite() {
                    resp.iter_mut().for_each(|r| *r = 1.0 / k as f64);
                } else {
                    resp.iter_mut().for_each(|r| *r /= total);
                }
                for j in 0..k {
                    let d = x - means[j];
                    var_acc[j] += resp[j] * d * d;
                }
            }
            for j in 0..k {
                weights[j] = w_acc[j] / n as f64;
                if w_acc[j] > 0.0 {
                    sds[j] = (var_acc[j] / w_acc[j]).sqrt().max(MIN_SIGMA);
                } else {
                    sds[j] = MIN_SIGMA;
                }
            }
        }

        Ok(Self { weights, means, sds })
    }

    /// Component count.
    pub fn n_components(&self) -> usize {
        self.weights.len()
    }

    /// Component means.
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Component weights (sum to 1).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl DensityEstimator for GaussianMixture {
    fn pdf(&self, points: &[f64]) -> Result<Vec<f64>> {
        Ok(points
            .iter()
            .map(|&x| {
                self.weights
                    .iter()
                    .zip(&self.means)
                    .zip(&self.sds)
                    .map(|((&w, &mu), &sd)| w * normal_pdf(x, mu, sd))
                    .sum()
            })
            .collect())
    }
}
