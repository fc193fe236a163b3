//! Persisted model records.
//!
//! A [`ModelWrapper`] is the immutable record of one trained surrogate:
//! identity, population counts, observed x-domain, and a tagged estimator
//! payload. Wrappers are created by training, persisted immediately, and
//! never mutated by estimation.

use std::collections::BTreeMap;

use aql_core::traits::{DensityEstimator, RegressionEstimator, Surrogate};
use aql_core::{Error, Result};
use aql_estimator::{GaussianMixture, KernelDensity, KernelRegression, MixtureBundle, PolyRegression};
use serde::{Deserialize, Serialize};

/// Population counts: one number for a single-group model, a mapping for a
/// per-group model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Population {
    /// Single count.
    Scalar(u64),
    /// One count per group value.
    PerGroup(BTreeMap<String, u64>),
}

impl Population {
    /// Count for `group`. A scalar answers for any group label (the single
    /// implicit group); a mapping answers only for known groups.
    pub fn for_group(&self, group: &str) -> Option<u64> {
        match self {
            Population::Scalar(n) => Some(*n),
            Population::PerGroup(map) => map.get(group).copied(),
        }
    }

    /// Sum over all groups.
    pub fn total(&self) -> u64 {
        match self {
            Population::Scalar(n) => *n,
            Population::PerGroup(map) => map.values().sum(),
        }
    }
}

/// Density estimator payload, tagged for per-variant (de)serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DensityPayload {
    /// Gaussian kernel density.
    Kde(KernelDensity),
    /// Gaussian mixture.
    Mixture(GaussianMixture),
}

impl DensityEstimator for DensityPayload {
    fn pdf(&self, points: &[f64]) -> Result<Vec<f64>> {
        match self {
            DensityPayload::Kde(d) => d.pdf(points),
            DensityPayload::Mixture(d) => d.pdf(points),
        }
    }
}

/// Regression estimator payload, tagged for per-variant (de)serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum RegressionPayload {
    /// Polynomial least squares.
    Poly(PolyRegression),
    /// Nadaraya–Watson kernel regression.
    Kernel(KernelRegression),
}

impl RegressionEstimator for RegressionPayload {
    fn predict(&self, points: &[f64]) -> Result<Vec<f64>> {
        match self {
            RegressionPayload::Poly(r) => r.predict(points),
            RegressionPayload::Kernel(r) => r.predict(points),
        }
    }
}

/// The estimator payload of a model record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum SurrogatePayload {
    /// One density plus an optional regression (absent means COUNT-only).
    Simple {
        /// Density over the independent variable.
        density: DensityPayload,
        /// Conditional mean of the dependent variable, if trained.
        regression: Option<RegressionPayload>,
    },
    /// One shared estimator answering every group in a single batched call.
    Bundle(MixtureBundle),
}

/// The persisted, immutable record of one trained surrogate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWrapper {
    /// Model name (the warehouse key stem).
    pub name: String,
    /// Source table the model was trained from.
    pub table: String,
    /// Independent-variable header.
    pub x_header: String,
    /// Dependent-variable header.
    pub y_header: String,
    /// Group-by attribute, for per-group models.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub groupby_attribute: Option<String>,
    /// Group value, set only on a leaf inside a grouped collection.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub groupby_value: Option<String>,
    /// Total population count(s).
    pub n_total: Population,
    /// Sampled count(s).
    pub n_sample: Population,
    /// Lower x-domain bound; `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x_min: Option<f64>,
    /// Upper x-domain bound; `None` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x_max: Option<f64>,
    /// Trained estimator payload.
    pub payload: SurrogatePayload,
}

impl ModelWrapper {
    /// Lower x-domain bound as a float (`-inf` when unbounded).
    pub fn x_lb(&self) -> f64 {
        self.x_min.unwrap_or(f64::NEG_INFINITY)
    }

    /// Upper x-domain bound as a float (`+inf` when unbounded).
    pub fn x_ub(&self) -> f64 {
        self.x_max.unwrap_or(f64::INFINITY)
    }

    /// Check record invariants: sampled counts never exceed totals for any
    /// group known to both sides.
    pub fn validate(&self) -> Result<()> {
        match (&self.n_sample, &self.n_total) {
            (Population::Scalar(s), Population::Scalar(t)) => {
                if s > t {
                    return Err(Error::Validation(format!(
                        "model '{}': sampled count {s} exceeds total {t}",
                        self.name
                    )));
                }
            }
            (Population::PerGroup(sampled), totals) => {
                for (group, s) in sampled {
                    if let Some(t) = totals.for_group(group) {
                        if *s > t {
                            return Err(Error::Validation(format!(
                                "model '{}', group '{group}': sampled count {s} exceeds total {t}",
                                self.name
                            )));
                        }
                    }
                }
            }
            (Population::Scalar(_), Population::PerGroup(_)) => {
                return Err(Error::Validation(format!(
                    "model '{}': scalar sampled count against per-group totals",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// View the payload through the surrogate seam the engine integrates
    /// against.
    pub fn surrogate(&self) -> Box<dyn Surrogate + '_> {
        match &self.payload {
            SurrogatePayload::Simple { density, regression } => {
                Box::new(PairSurrogate { density, regression: regression.as_ref() })
            }
            SurrogatePayload::Bundle(bundle) => Box::new(bundle),
        }
    }
}

/// Paired (density, regression) surrogate serving a single implicit group.
///
/// Every requested group label gets the same evaluation; the pair carries no
/// grouping of its own.
struct PairSurrogate<'a> {
    density: &'a DensityPayload,
    regression: Option<&'a RegressionPayload>,
}

impl Surrogate for PairSurrogate<'_> {
    fn density_grid(&self, groups: &[String], points: &[f64]) -> Result<Vec<Vec<f64>>> {
        let row = self.density.pdf(points)?;
        Ok(vec![row; groups.len().max(1)])
    }

    fn regression_grid(&self, groups: &[String], points: &[f64]) -> Result<Option<Vec<Vec<f64>>>> {
        match self.regression {
            None => Ok(None),
            Some(reg) => {
                let row = reg.predict(points)?;
                Ok(Some(vec![row; groups.len().max(1)]))
            }
        }
    }
}
