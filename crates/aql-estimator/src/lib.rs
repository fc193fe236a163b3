//! # aql-estimator
//!
//! Trainable surrogates for ApproxQL.
//!
//! This crate provides the concrete estimator capabilities the engine
//! consumes through the `aql-core` traits:
//! - Gaussian kernel density estimation
//! - Polynomial least-squares and kernel regression
//! - Gaussian mixtures fit by EM
//! - A per-group bundle answering all groups in one batched call
//!
//! Everything here is `Serialize`/`Deserialize` so trained estimators can be
//! embedded in persisted model records.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Per-group bundle estimator with batched evaluation.
pub mod bundle;
/// Gaussian kernel density estimation.
pub mod kde;
/// Scalar Gaussian helpers shared by the estimators.
pub mod math;
/// 1-D Gaussian mixtures fit by EM.
pub mod mixture;
/// Regression estimators: polynomial least squares and Nadaraya–Watson.
pub mod regression;

pub use bundle::{FitOptions, LabeledRow, MixtureBundle};
pub use kde::KernelDensity;
pub use mixture::GaussianMixture;
pub use regression::{KernelRegression, PolyRegression};
