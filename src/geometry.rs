/*
All-pairs geometry of a configuration

displacement[[i, j, k]] = x_j[k] - x_i[k]  (antisymmetric in i, j)
r2[[i, j]]              = |x_j - x_i|^2    (symmetric, zero diagonal)

Nothing downstream may feed the zero diagonal to the pair potential. The
evaluator goes through `mask_self_pairs`, which swaps the diagonal for +inf
so that V and g both come out as exactly zero for the self pair.
*/

use ndarray::{Array2, Array3};

use crate::cluster::Configuration;

pub fn distances(configuration: &Configuration) -> (Array3<f64>, Array2<f64>) {
    let positions = configuration.positions();
    let n = positions.len();

    let mut displacement = Array3::<f64>::zeros((n, n, 3));
    let mut r2 = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in (i + 1)..n {
            let d = positions[j] - positions[i];
            let d2 = d.norm_squared();
            for k in 0..3 {
                displacement[[i, j, k]] = d[k];
                displacement[[j, i, k]] = -d[k];
            }
            // filled from the same number so the matrix is exactly symmetric
            r2[[i, j]] = d2;
            r2[[j, i]] = d2;
        }
    }

    (displacement, r2)
}

pub fn mask_self_pairs(r2: &mut Array2<f64>) {
    r2.diag_mut().fill(f64::INFINITY);
}
