//! # aql-core
//!
//! Core types, traits, and error handling for ApproxQL.
//!
//! This crate provides:
//! - Common error types
//! - The estimator seams consumed by the aggregation engine
//! - Query descriptors and shared value types
//! - Engine configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{Backend, EngineConfig};
pub use error::{Error, Result};
pub use traits::{DensityEstimator, RegressionEstimator, Surrogate};
pub use types::{AggregateFn, QueryDescriptor, RangePredicate, SamplingMethod};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
