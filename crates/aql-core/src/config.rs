//! Engine configuration.
//!
//! One flat option set covering storage, sampling, training, and quadrature.
//! Loadable from a JSON file; every field has a default so partial configs
//! are fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Regression backend used for grouped models.
///
/// Selected once per statement; all later dispatch is on this enum, not on
/// the raw config string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backend {
    /// One independently-fit (density, regression) leaf per group value.
    #[serde(rename = "qreg")]
    Qreg,
    /// One shared estimator answering all groups in a single batched call.
    #[default]
    #[serde(rename = "mdn")]
    Mdn,
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qreg" => Ok(Backend::Qreg),
            "mdn" => Ok(Backend::Mdn),
            other => Err(Error::Validation(format!(
                "unknown reg_type '{other}' (expected qreg or mdn)"
            ))),
        }
    }
}

/// Static engine option set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Warehouse root directory holding persisted models.
    #[serde(rename = "warehousedir")]
    pub warehouse_dir: PathBuf,

    /// Field delimiter for raw delimited sources.
    #[serde(default = "default_split_char")]
    pub csv_split_char: char,

    /// Regression backend for grouped models.
    #[serde(rename = "reg_type", default)]
    pub backend: Backend,

    /// Print timing lines to stdout.
    #[serde(default)]
    pub verbose: bool,

    /// Training sweeps for the mixture backend.
    #[serde(default = "default_num_epoch")]
    pub num_epoch: usize,

    /// Mixture components for the mixture backend.
    #[serde(default = "default_num_gaussians")]
    pub num_gaussians: usize,

    /// Default mesh division count for quadrature.
    #[serde(rename = "mesh_grid_num", default = "default_mesh_grid_num")]
    pub mesh_grid_num: usize,

    /// Absolute quadrature tolerance, forwarded to estimator trainers.
    #[serde(default = "default_epsabs")]
    pub epsabs: f64,

    /// Relative quadrature tolerance, forwarded to estimator trainers.
    #[serde(default = "default_epsrel")]
    pub epsrel: f64,

    /// Subdivision limit, forwarded to estimator trainers.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Density estimator family label, forwarded to estimator trainers.
    #[serde(default = "default_density_type")]
    pub density_type: String,

    /// Additionally materialize the training sample as a CSV next to the
    /// model. A side option only: sampling itself always happens.
    #[serde(default)]
    pub save_sample: bool,
}

fn default_split_char() -> char {
    ','
}

fn default_num_epoch() -> usize {
    400
}

fn default_num_gaussians() -> usize {
    4
}

fn default_mesh_grid_num() -> usize {
    20
}

fn default_epsabs() -> f64 {
    10.0
}

fn default_epsrel() -> f64 {
    0.1
}

fn default_limit() -> usize {
    30
}

fn default_density_type() -> String {
    "kde".to_string()
}

impl EngineConfig {
    /// Config with defaults rooted at `warehouse_dir`.
    pub fn with_warehouse(warehouse_dir: impl Into<PathBuf>) -> Self {
        Self {
            warehouse_dir: warehouse_dir.into(),
            csv_split_char: default_split_char(),
            backend: Backend::default(),
            verbose: false,
            num_epoch: default_num_epoch(),
            num_gaussians: default_num_gaussians(),
            mesh_grid_num: default_mesh_grid_num(),
            epsabs: default_epsabs(),
            epsrel: default_epsrel(),
            limit: default_limit(),
            density_type: default_density_type(),
            save_sample: false,
        }
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check option invariants.
    pub fn validate(&self) -> Result<()> {
        if self.mesh_grid_num < 2 {
            return Err(Error::Validation(format!(
                "mesh_grid_num must be >= 2, got {}",
                self.mesh_grid_num
            )));
        }
        if self.num_gaussians == 0 {
            return Err(Error::Validation("num_gaussians must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::from_str("qreg").unwrap(), Backend::Qreg);
        assert_eq!(Backend::from_str("mdn").unwrap(), Backend::Mdn);
        assert!(Backend::from_str("ols").is_err());
    }

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::with_warehouse("/tmp/wh");
        assert_eq!(cfg.csv_split_char, ',');
        assert_eq!(cfg.mesh_grid_num, 20);
        assert_eq!(cfg.num_epoch, 400);
        assert_eq!(cfg.num_gaussians, 4);
        assert_eq!(cfg.backend, Backend::Mdn);
        assert!(!cfg.verbose);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_json_config() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"warehousedir": "/tmp/wh", "reg_type": "qreg", "verbose": true}"#,
        )
        .unwrap();
        assert_eq!(cfg.backend, Backend::Qreg);
        assert!(cfg.verbose);
        assert_eq!(cfg.mesh_grid_num, 20);
    }

    #[test]
    fn test_mesh_grid_num_floor() {
        let mut cfg = EngineConfig::with_warehouse("/tmp/wh");
        cfg.mesh_grid_num = 1;
        assert!(cfg.validate().is_err());
    }
}
