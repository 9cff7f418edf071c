/*
Cluster configurations

A configuration is the ordered list of atom positions. Index order is the atom
identity, so every conversion here (flatten, reshape, generation) keeps it.
The optimizer works on the flat 3N vector, everything else on Vector3 rows.
*/

use nalgebra::Vector3;
use ndarray::Array2;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::ClusterError;

#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    positions: Vec<Vector3<f64>>,
}

impl Configuration {
    /// Builds a configuration, failing fast on N < 2 or non-finite coordinates.
    pub fn new(positions: Vec<Vector3<f64>>) -> Result<Self, ClusterError> {
        if positions.len() < 2 {
            return Err(ClusterError::invalid(format!(
                "a cluster needs at least 2 atoms, got {}",
                positions.len()
            )));
        }
        if let Some(index) = positions.iter().position(|p| !p.iter().all(|x| x.is_finite())) {
            return Err(ClusterError::invalid(format!(
                "atom {index} has a non-finite coordinate"
            )));
        }
        Ok(Configuration { positions })
    }

    /// Reshapes a flat [x0, y0, z0, x1, ...] vector into N rows.
    pub fn from_flat(flat: &[f64]) -> Result<Self, ClusterError> {
        if flat.len() % 3 != 0 {
            return Err(ClusterError::invalid(format!(
                "flat coordinate vector of length {} is not a multiple of 3",
                flat.len()
            )));
        }
        let positions = flat
            .chunks_exact(3)
            .map(|xyz| Vector3::new(xyz[0], xyz[1], xyz[2]))
            .collect();
        Configuration::new(positions)
    }

    pub fn flatten(&self) -> Vec<f64> {
        self.positions
            .iter()
            .flat_map(|p| [p.x, p.y, p.z])
            .collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vector3<f64>] {
        &self.positions
    }

    /// Plain (not squared) interatomic distances, zero on the diagonal.
    pub fn distance_matrix(&self) -> Array2<f64> {
        let n = self.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            (self.positions[j] - self.positions[i]).norm()
        })
    }
}

pub fn make_cluster<R: Rng + ?Sized>(
    natoms: usize,
    scale: f64,
    rng: &mut R,
) -> Result<Configuration, ClusterError> {
    /*
    Random cluster: every coordinate is drawn from N(0, scale) and shifted by
    -0.5. No minimum separation is enforced, close contacts are legal and just
    start the minimizer from a high energy.
     */
    if natoms < 2 {
        return Err(ClusterError::invalid(format!(
            "a cluster needs at least 2 atoms, got {natoms}"
        )));
    }
    if !(scale.is_finite() && scale > 0.0) {
        return Err(ClusterError::invalid(format!(
            "spatial scale must be positive and finite, got {scale}"
        )));
    }
    let normal = Normal::new(0.0, scale)
        .map_err(|e| ClusterError::invalid(format!("bad spatial scale {scale}: {e}")))?;

    let positions = (0..natoms)
        .map(|_| {
            Vector3::new(
                normal.sample(&mut *rng) - 0.5,
                normal.sample(&mut *rng) - 0.5,
                normal.sample(&mut *rng) - 0.5,
            )
        })
        .collect();
    Configuration::new(positions)
}

/// Same as [`make_cluster`] with a private ChaCha stream seeded from `seed`.
pub fn make_cluster_seeded(
    natoms: usize,
    scale: f64,
    seed: u64,
) -> Result<Configuration, ClusterError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    make_cluster(natoms, scale, &mut rng)
}
