/*
Energy and force evaluator

Reduces the all-pairs geometry of a configuration into

    E   = 1/2 sum_{i != j} V(r2_ij)
    F_i =     sum_{j != i} g(r2_ij) (x_j - x_i)

The energy runs over ordered pairs and is halved; the forces are not halved
because each ordered pair (i, j) only contributes to atom i. Rows of the pair
matrices are independent, so large clusters reduce them on the rayon pool.
*/

use argmin::core::{CostFunction, Gradient};
use itertools::Itertools;
use log::trace;
use nalgebra::Vector3;
use ndarray::{Array2, Array3};
use rayon::prelude::*;

use crate::cluster::Configuration;
use crate::error::ClusterError;
use crate::geometry::{distances, mask_self_pairs};
use crate::lj_parameters::{pair_gradient_scalar, pair_potential, LJParameters};

/// Clusters with at least this many atoms are reduced in parallel.
pub const PARALLEL_THRESHOLD: usize = 64;

#[derive(Clone, Debug)]
pub struct Evaluation {
    pub energy: f64,
    pub forces: Option<Vec<Vector3<f64>>>,
}

impl Evaluation {
    /// Gradient of the energy in the flat 3N layout, i.e. minus the forces.
    pub fn gradient_flat(&self) -> Option<Vec<f64>> {
        self.forces
            .as_ref()
            .map(|forces| forces.iter().flat_map(|f| [-f.x, -f.y, -f.z]).collect())
    }

    pub fn net_force(&self) -> Option<Vector3<f64>> {
        self.forces
            .as_ref()
            .map(|forces| forces.iter().fold(Vector3::zeros(), |acc, f| acc + f))
    }
}

#[derive(Clone, Debug)]
pub struct Evaluator {
    params: LJParameters,
    parallel_threshold: usize,
}

impl Evaluator {
    pub fn new(params: LJParameters) -> Self {
        Evaluator {
            params,
            parallel_threshold: PARALLEL_THRESHOLD,
        }
    }

    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold.max(1);
        self
    }

    pub fn parameters(&self) -> &LJParameters {
        &self.params
    }

    pub fn evaluate(
        &self,
        configuration: &Configuration,
        compute_forces: bool,
    ) -> Result<Evaluation, ClusterError> {
        let n = configuration.len();
        let (displacement, mut r2) = distances(configuration);
        mask_self_pairs(&mut r2);

        let row = |i: usize| self.row_terms(i, &displacement, &r2, compute_forces);
        let rows: Vec<(f64, Vector3<f64>)> = if n >= self.parallel_threshold {
            (0..n).into_par_iter().map(row).collect::<Result<_, _>>()?
        } else {
            (0..n).map(row).collect::<Result<_, _>>()?
        };

        let energy = rows.iter().map(|(e, _)| e).sum::<f64>() / 2.0;
        if !energy.is_finite() {
            return Err(ClusterError::NumericalFailure {
                pair: None,
                quantity: "energy",
            });
        }
        trace!("evaluated {n} atoms, energy {energy:.8}");

        let forces = compute_forces.then(|| rows.into_iter().map(|(_, f)| f).collect());
        Ok(Evaluation { energy, forces })
    }

    /// Accepts the optimizer's flat 3N layout and reshapes it first.
    pub fn evaluate_flat(
        &self,
        flat: &[f64],
        compute_forces: bool,
    ) -> Result<Evaluation, ClusterError> {
        let configuration = Configuration::from_flat(flat)?;
        self.evaluate(&configuration, compute_forces)
    }

    pub fn energy(&self, configuration: &Configuration) -> Result<f64, ClusterError> {
        Ok(self.evaluate(configuration, false)?.energy)
    }

    /// V(r2_ij) for every ordered pair, zero on the diagonal.
    pub fn pair_energy_matrix(
        &self,
        configuration: &Configuration,
    ) -> Result<Array2<f64>, ClusterError> {
        let n = configuration.len();
        let (_, mut r2) = distances(configuration);
        mask_self_pairs(&mut r2);
        let mut energies = Array2::<f64>::zeros((n, n));
        for ((i, j), e) in energies.indexed_iter_mut() {
            *e = self.pair_energy(i, j, r2[[i, j]])?;
        }
        Ok(energies)
    }

    /// Direct i < j double loop, no distance matrix and no halving.
    pub fn energy_unordered(&self, configuration: &Configuration) -> Result<f64, ClusterError> {
        let positions = configuration.positions();
        let mut total_energy = 0.0;
        for (i, j) in (0..positions.len()).tuple_combinations() {
            let r2 = (positions[j] - positions[i]).norm_squared();
            total_energy += self.pair_energy(i, j, r2)?;
        }
        Ok(total_energy)
    }

    fn pair_energy(&self, i: usize, j: usize, r2: f64) -> Result<f64, ClusterError> {
        // coincident atoms off the diagonal are a numerical failure of the
        // configuration, not a caller bug
        let e = pair_potential(r2, &self.params).map_err(|_| ClusterError::NumericalFailure {
            pair: Some((i, j)),
            quantity: "energy",
        })?;
        if e.is_finite() {
            Ok(e)
        } else {
            Err(ClusterError::NumericalFailure {
                pair: Some((i, j)),
                quantity: "energy",
            })
        }
    }

    fn row_terms(
        &self,
        i: usize,
        displacement: &Array3<f64>,
        r2: &Array2<f64>,
        compute_forces: bool,
    ) -> Result<(f64, Vector3<f64>), ClusterError> {
        let n = r2.nrows();
        let mut energy = 0.0;
        let mut force = Vector3::zeros();
        for j in 0..n {
            let r2_ij = r2[[i, j]];
            energy += self.pair_energy(i, j, r2_ij)?;
            if compute_forces {
                let g = pair_gradient_scalar(r2_ij, &self.params).map_err(|_| {
                    ClusterError::NumericalFailure {
                        pair: Some((i, j)),
                        quantity: "force",
                    }
                })?;
                let f = Vector3::new(
                    displacement[[i, j, 0]],
                    displacement[[i, j, 1]],
                    displacement[[i, j, 2]],
                ) * g;
                if !f.iter().all(|x| x.is_finite()) {
                    return Err(ClusterError::NumericalFailure {
                        pair: Some((i, j)),
                        quantity: "force",
                    });
                }
                force += f;
            }
        }
        Ok((energy, force))
    }
}

impl CostFunction for Evaluator {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.evaluate_flat(param, false)?.energy)
    }
}

impl Gradient for Evaluator {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let evaluation = self.evaluate_flat(param, true)?;
        Ok(evaluation.gradient_flat().unwrap_or_default())
    }
}
