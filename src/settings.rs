/*
Run settings

Plain serde structs. Every field has a default, so a JSON file only needs to
name the values it changes:

    { "cluster": { "natoms": 13 }, "minimizer": { "max_iterations": 500 } }
*/

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_NATOMS, DEFAULT_SCALE, DEFAULT_SEED, EPSILON_ARGON, SIGMA_ARGON};
use crate::error::ClusterError;
use crate::lj_parameters::LJParameters;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerSettings {
    pub history: usize,                // number of stored L-BFGS correction pairs
    pub max_iterations: usize,
    pub gradient_tolerance: f64,       // on the largest gradient component
    pub energy_tolerance: f64,         // relative energy change between iterations
    pub sufficient_decrease: f64,      // Armijo constant c1
    pub curvature: f64,                // Wolfe constant c2
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        MinimizerSettings {
            history: 10,
            max_iterations: 15000,
            gradient_tolerance: 1e-5,
            energy_tolerance: 2.220446049250313e-9,
            sufficient_decrease: 1e-4,
            curvature: 0.9,
        }
    }
}

impl MinimizerSettings {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.history == 0 {
            return Err(ClusterError::invalid("history must hold at least one pair"));
        }
        if !(self.gradient_tolerance >= 0.0 && self.energy_tolerance >= 0.0) {
            return Err(ClusterError::invalid("tolerances must be non-negative"));
        }
        if !(0.0 < self.sufficient_decrease
            && self.sufficient_decrease < self.curvature
            && self.curvature < 1.0)
        {
            return Err(ClusterError::invalid(format!(
                "line search constants need 0 < c1 < c2 < 1, got c1 = {}, c2 = {}",
                self.sufficient_decrease, self.curvature
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub natoms: usize,
    pub scale: f64,
    pub seed: u64,
    pub sigma: f64,
    pub epsilon: f64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            natoms: DEFAULT_NATOMS,
            scale: DEFAULT_SCALE,
            seed: DEFAULT_SEED,
            sigma: SIGMA_ARGON,
            epsilon: EPSILON_ARGON,
        }
    }
}

impl ClusterSettings {
    pub fn parameters(&self) -> Result<LJParameters, ClusterError> {
        LJParameters::new(self.sigma, self.epsilon)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub cluster: ClusterSettings,
    pub minimizer: MinimizerSettings,
}

impl RunSettings {
    pub fn from_json_str(text: &str) -> Result<Self, ClusterError> {
        serde_json::from_str(text).map_err(|source| ClusterError::Settings {
            path: "<inline>".to_string(),
            source,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ClusterError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ClusterError::Io {
            path: path_str.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ClusterError::Settings {
            path: path_str,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings = RunSettings::from_json_str(
            r#"{ "cluster": { "natoms": 13 }, "minimizer": { "max_iterations": 500 } }"#,
        )
        .unwrap();
        assert_eq!(settings.cluster.natoms, 13);
        assert_eq!(settings.cluster.seed, DEFAULT_SEED);
        assert_eq!(settings.minimizer.max_iterations, 500);
        assert_eq!(settings.minimizer.history, 10);
    }

    #[test]
    fn empty_json_is_the_default() {
        assert_eq!(RunSettings::from_json_str("{}").unwrap(), RunSettings::default());
    }

    #[test]
    fn reads_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let settings = RunSettings {
            cluster: ClusterSettings {
                natoms: 7,
                ..ClusterSettings::default()
            },
            ..RunSettings::default()
        };
        fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
        assert_eq!(RunSettings::from_json_file(&path).unwrap(), settings);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = RunSettings::from_json_str(r#"{ "cluster": { "natoms": "many" } }"#)
            .expect_err("natoms must be a number");
        assert!(matches!(err, ClusterError::Settings { .. }));
    }

    #[test]
    fn validates_minimizer_settings() {
        assert!(MinimizerSettings::default().validate().is_ok());
        let bad = MinimizerSettings {
            curvature: 1e-5,
            ..MinimizerSettings::default()
        };
        assert!(bad.validate().is_err());
        let bad = MinimizerSettings {
            history: 0,
            ..MinimizerSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}
