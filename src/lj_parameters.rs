/*
Lennard-Jones pair potential

The potential is written in terms of the squared separation r2 so that no
square root is needed anywhere in the energy or force loops:

    sr6    = (sigma^2 / r2)^3
    V(r2)  = 4 eps (sr6^2 - sr6)
    g(r2)  = -24 eps / r2 (2 sr6^2 - sr6)

g is chosen so that g(r2_ij) * (x_j - x_i) is the force that atom j exerts on
atom i, i.e. the force on i is the sum of g * displacement over all j != i.
*/

use serde::{Deserialize, Serialize};

use crate::constants::{EPSILON_ARGON, SIGMA_ARGON};
use crate::error::ClusterError;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LJParameters {
    pub sigma: f64,   // length scale, distance at which V = 0
    pub epsilon: f64, // depth of the potential well
}

impl LJParameters {
    pub fn new(sigma: f64, epsilon: f64) -> Result<Self, ClusterError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(ClusterError::invalid(format!(
                "sigma must be positive and finite, got {sigma}"
            )));
        }
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(ClusterError::invalid(format!(
                "epsilon must be positive and finite, got {epsilon}"
            )));
        }
        Ok(LJParameters { sigma, epsilon })
    }

    /// Reduced units, sigma = epsilon = 1.
    pub fn reduced() -> Self {
        LJParameters {
            sigma: 1.0,
            epsilon: 1.0,
        }
    }

    pub fn argon() -> Self {
        LJParameters {
            sigma: SIGMA_ARGON,
            epsilon: EPSILON_ARGON,
        }
    }

    /// Separation of the pair minimum, sigma * 2^(1/6).
    pub fn equilibrium_distance(&self) -> f64 {
        self.sigma * 2f64.powf(1.0 / 6.0)
    }
}

impl Default for LJParameters {
    fn default() -> Self {
        LJParameters::reduced()
    }
}

fn check_r2(r2: f64) -> Result<(), ClusterError> {
    // r2 = +inf is allowed, it is how the evaluator masks the self pair
    if r2 > 0.0 {
        Ok(())
    } else {
        Err(ClusterError::ContractViolation { r2 })
    }
}

pub fn pair_potential(r2: f64, params: &LJParameters) -> Result<f64, ClusterError> {
    check_r2(r2)?;
    let sr2 = params.sigma * params.sigma / r2;
    let sr6 = sr2 * sr2 * sr2;
    Ok(4.0 * params.epsilon * (sr6 * sr6 - sr6))
}

pub fn pair_gradient_scalar(r2: f64, params: &LJParameters) -> Result<f64, ClusterError> {
    check_r2(r2)?;
    let sr2 = params.sigma * params.sigma / r2;
    let sr6 = sr2 * sr2 * sr2;
    Ok(-24.0 * params.epsilon / r2 * (2.0 * sr6 * sr6 - sr6))
}
