//! Gaussian kernel density estimation.

use aql_core::traits::DensityEstimator;
use aql_core::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::math::normal_pdf;

/// Gaussian KDE over a 1-D sample.
///
/// Bandwidth defaults to Silverman's rule, `1.06 · σ · n^(-1/5)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelDensity {
    points: Vec<f64>,
    bandwidth: f64,
}

impl KernelDensity {
    /// Fit a KDE on `sample` with the Silverman bandwidth.
    pub fn fit(sample: &[f64]) -> Result<Self> {
        if sample.is_empty() {
            return Err(Error::Validation("KDE sample must be non-empty".to_string()));
        }
        if sample.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation(
                "KDE sample must contain only finite values".to_string(),
            ));
        }
        let bandwidth = silverman_bandwidth(sample);
        Ok(Self { points: sample.to_vec(), bandwidth })
    }

    /// Fit with an explicit bandwidth (must be finite and > 0).
    pub fn fit_with_bandwidth(sample: &[f64], bandwidth: f64) -> Result<Self> {
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(Error::Validation(format!(
                "bandwidth must be finite and > 0, got {bandwidth}"
            )));
        }
        let mut kde = Self::fit(sample)?;
        kde.bandwidth = bandwidth;
        Ok(kde)
    }

    /// The bandwidth in use.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    /// Number of support points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the KDE has no support points (never true after `fit`).
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Silverman's rule of thumb, with a floor for degenerate samples.
fn silverman_bandwidth(sample: &[f64]) -> f64 {
    let n = sample.len() as f64;
    let sd = if sample.len() > 1 { sample.std_dev() } else { 0.0 };
    let h = 1.06 * sd * n.powf(-0.2);
    if h.is_finite() && h > 0.0 {
        h
    } else {
        // All points identical: fall back to a narrow fixed kernel.
        1e-3
    }
}

impl DensityEstimator for KernelDensity {
    fn pdf(&self, points: &[f64]) -> Result<Vec<f64>> {
        let n = self.points.len() as f64;
        let h = self.bandwidth;
        Ok(points
            .iter()
            .map(|&x| self.points.iter().map(|&xi| normal_pdf(x, xi, h)).sum::<f64>() / n)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_sample() {
        assert!(KernelDensity::fit(&[]).is_err());
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(KernelDensity::fit(&[1.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_density_positive_and_peaked_at_mass() {
        let sample: Vec<f64> = (0..200).map(|i| (i % 10) as f64).collect();
        let kde = KernelDensity::fit(&sample).unwrap();
        let d = kde.pdf(&[4.5, 100.0]).unwrap();
        assert!(d[0] > 0.0);
        assert!(d[0] > d[1] * 100.0, "density far from the sample should be tiny");
    }

    #[test]
    fn test_integrates_to_one() {
        // Riemann sum of the pdf over a wide window should be close to 1.
        let sample: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        let kde = KernelDensity::fit(&sample).unwrap();
        let n_grid = 4000;
        let (lo, hi) = (-10.0, 20.0);
        let step = (hi - lo) / n_grid as f64;
        let grid: Vec<f64> = (0..n_grid).map(|i| lo + (i as f64 + 0.5) * step).collect();
        let mass: f64 = kde.pdf(&grid).unwrap().iter().sum::<f64>() * step;
        assert!((mass - 1.0).abs() < 0.02, "mass = {mass}");
    }

    #[test]
    fn test_degenerate_sample_gets_fallback_bandwidth() {
        let kde = KernelDensity::fit(&[3.0, 3.0, 3.0]).unwrap();
        assert!(kde.bandwidth() > 0.0);
        assert!(kde.pdf(&[3.0]).unwrap()[0].is_finite());
    }

    #[test]
    fn test_serde_roundtrip_preserves_pdf() {
        let sample: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let kde = KernelDensity::fit(&sample).unwrap();
        let json = serde_json::to_string(&kde).unwrap();
        let kde2: KernelDensity = serde_json::from_str(&json).unwrap();
        assert_eq!(kde.pdf(&[7.3]).unwrap(), kde2.pdf(&[7.3]).unwrap());
    }
}
