/*

=========================================================
 Lennard-Jones Cluster Energy Minimization (Rust)
=========================================================

Atom Model
----------
A cluster is a list of N >= 2 positions, Vector3<f64>, with a single
(sigma, epsilon) pair shared by every atom. No box, no periodic images.

Lennard-Jones Potential
-----------------------
Written in the squared distance so no square roots are taken:
    sr6 = (sigma^2 / r2)^3
    V   = 4 eps (sr6^2 - sr6)
    g   = -24 eps / r2 (2 sr6^2 - sr6)      F_i = sum_j g (x_j - x_i)

Evaluation
----------
- All-pairs displacement tensor and r2 matrix, diagonal masked with +inf
  so V = g = 0 on self pairs.
- Energy over ordered pairs, halved. Rows reduced on rayon for large N.

Minimization
------------
- argmin L-BFGS with a More-Thuente line search over the flat 3N vector.
- Stops on gradient / energy tolerance, iteration cap, failed line search,
  or a raised cancel flag.

Glue
----
- Seeded random clusters, xyz trajectories, JSON settings,
  parallel csv sweeps over independent seeds.

=========================================================
*/

pub mod cluster;
pub mod constants;
pub mod error;
pub mod evaluator;
pub mod geometry;
pub mod lj_parameters;
pub mod minimization;
pub mod settings;
pub mod sweep;
pub mod trajectory;

pub use cluster::{make_cluster, make_cluster_seeded, Configuration};
pub use error::ClusterError;
pub use evaluator::{Evaluation, Evaluator, PARALLEL_THRESHOLD};
pub use lj_parameters::{pair_gradient_scalar, pair_potential, LJParameters};
pub use minimization::{Convergence, Lbfgs, Minimization, Minimizer, Termination};
pub use settings::{ClusterSettings, MinimizerSettings, RunSettings};
pub use sweep::{run_sweep, write_sweep_csv, SweepJob, SweepOutcome};
pub use trajectory::{read_xyz, write_xyz, Frame};
