/*
Energy minimization

Finds the nearby local minimum of the potential energy surface with argmin's
limited-memory BFGS and a More-Thuente line search over the flat 3N vector.
The argmin solver runs inside a thin wrapper that owns the stopping rules:

    - the gradient test is the largest gradient component, and it is only
      applied once a step has been taken
    - the energy test is relative to the size of the energy
    - an accepted step that raises the energy ends the run
    - a raised cancel flag interrupts the run at an iteration boundary

The first trial step is scaled so it moves the parameters by at most one
unit. A random start with close contacts would otherwise throw atoms out of
the cluster on the first iteration.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use argmin::core::{
    CostFunction, Error as ArgminError, Executor, Gradient, IterState, LineSearch,
    OptimizationResult, Problem, Solver, State, TerminationReason, TerminationStatus, KV,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use log::{debug, info, warn};
use nalgebra::Vector3;
use serde::Serialize;

use crate::cluster::Configuration;
use crate::error::ClusterError;
use crate::evaluator::Evaluator;
use crate::settings::MinimizerSettings;

type Flat = Vec<f64>;
type LbfgsState = IterState<Flat, Flat, (), (), (), f64>;
type MoreThuente = MoreThuenteLineSearch<Flat, Flat, f64>;
type ArgminLbfgs = LBFGS<MoreThuente, Flat, Flat, f64>;

fn from_argmin(err: ArgminError) -> ClusterError {
    match err.downcast::<ClusterError>() {
        Ok(err) => err,
        Err(other) => ClusterError::Objective {
            reason: other.to_string(),
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Convergence {
    GradientTolerance,
    EnergyTolerance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Termination {
    Converged(Convergence),
    /// Iteration cap reached, the last point is still returned
    Exhausted,
    /// No step along the search direction decreased the energy
    LineSearchFailed,
    /// The cancel flag was raised between two iterations
    Interrupted,
}

impl Termination {
    pub fn is_converged(&self) -> bool {
        matches!(self, Termination::Converged(_))
    }
}

#[derive(Clone, Debug)]
pub struct FlatMinimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub initial_value: f64,
    pub gradient: Vec<f64>,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

fn max_abs(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Lends a problem to the executor, which otherwise takes ownership.
struct Borrowed<'p, O>(&'p O);

impl<O: CostFunction> CostFunction for Borrowed<'_, O> {
    type Param = O::Param;
    type Output = O::Output;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, ArgminError> {
        self.0.cost(param)
    }
}

impl<O: Gradient> Gradient for Borrowed<'_, O> {
    type Param = O::Param;
    type Gradient = O::Gradient;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, ArgminError> {
        self.0.gradient(param)
    }
}

/// argmin's L-BFGS with the cluster stopping rules layered on top.
struct GuardedLbfgs<'c> {
    lbfgs: ArgminLbfgs,
    gradient_tolerance: f64,
    energy_tolerance: f64,
    cancel: Option<&'c AtomicBool>,
    initial_cost: f64,
    convergence: Option<Convergence>,
}

impl<O> Solver<O, LbfgsState> for GuardedLbfgs<'_>
where
    ArgminLbfgs: Solver<O, LbfgsState>,
{
    const NAME: &'static str = "L-BFGS (More-Thuente)";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: LbfgsState,
    ) -> Result<(LbfgsState, Option<KV>), ArgminError> {
        let (state, kv) =
            <ArgminLbfgs as Solver<O, LbfgsState>>::init(&mut self.lbfgs, problem, state)?;
        if !state.get_cost().is_finite() {
            return Err(ClusterError::NumericalFailure {
                pair: None,
                quantity: "starting energy",
            }
            .into());
        }
        self.initial_cost = state.get_cost();
        Ok((state, kv))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        state: LbfgsState,
    ) -> Result<(LbfgsState, Option<KV>), ArgminError> {
        let (state, kv) =
            <ArgminLbfgs as Solver<O, LbfgsState>>::next_iter(&mut self.lbfgs, problem, state)?;
        debug!(
            "iteration {}: energy {:.10}",
            state.get_iter() + 1,
            state.get_cost()
        );
        Ok((state, kv))
    }

    fn terminate(&mut self, state: &LbfgsState) -> TerminationStatus {
        if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return TerminationStatus::Terminated(TerminationReason::Interrupt);
        }
        let Some(gradient) = state.get_gradient() else {
            return TerminationStatus::NotTerminated;
        };
        let largest = max_abs(gradient);
        // a start on the flat tail of the potential still takes one step
        let first = state.get_iter() == 0;
        if largest == 0.0 || (!first && largest <= self.gradient_tolerance) {
            self.convergence = Some(Convergence::GradientTolerance);
            return TerminationStatus::Terminated(TerminationReason::SolverConverged);
        }
        if first {
            return TerminationStatus::NotTerminated;
        }

        let (previous, current) = (state.get_prev_cost(), state.get_cost());
        if current > previous {
            return TerminationStatus::Terminated(TerminationReason::SolverExit(format!(
                "accepted step raised the energy from {previous:.10} to {current:.10}"
            )));
        }
        let scale = previous.abs().max(current.abs()).max(1.0);
        if previous - current <= self.energy_tolerance * scale {
            self.convergence = Some(Convergence::EnergyTolerance);
            return TerminationStatus::Terminated(TerminationReason::SolverConverged);
        }
        TerminationStatus::NotTerminated
    }
}

#[derive(Clone, Debug)]
pub struct Lbfgs {
    settings: MinimizerSettings,
}

impl Lbfgs {
    pub fn new(settings: MinimizerSettings) -> Result<Self, ClusterError> {
        settings.validate()?;
        Ok(Lbfgs { settings })
    }

    fn line_search(&self, first_step: f64) -> Result<MoreThuente, ArgminError> {
        let mut line_search = MoreThuenteLineSearch::new()
            .with_c(self.settings.sufficient_decrease, self.settings.curvature)?
            .with_bounds(first_step * f64::EPSILON.sqrt(), f64::INFINITY)?;
        line_search.initial_step_length(first_step)?;
        Ok(line_search)
    }

    /// Minimizes any argmin problem over a flat `Vec<f64>`.
    ///
    /// Objective errors raised inside the line search end the run on the last
    /// accepted point with [`Termination::LineSearchFailed`]. Errors at the
    /// starting point are returned.
    pub fn minimize_flat<O>(
        &self,
        problem: &O,
        x0: Vec<f64>,
        cancel: Option<&AtomicBool>,
    ) -> Result<FlatMinimum, ClusterError>
    where
        O: CostFunction<Param = Flat, Output = f64> + Gradient<Param = Flat, Gradient = Flat>,
    {
        if x0.is_empty() {
            return Err(ClusterError::invalid("cannot minimize an empty parameter vector"));
        }
        let g0 = problem.gradient(&x0).map_err(from_argmin)?;
        if g0.len() != x0.len() || !g0.iter().all(|g| g.is_finite()) {
            return Err(ClusterError::NumericalFailure {
                pair: None,
                quantity: "starting gradient",
            });
        }
        let norm = g0.iter().map(|g| g * g).sum::<f64>().sqrt();
        let first_step = if norm > 1.0 { norm.recip() } else { 1.0 };
        let line_search = self
            .line_search(first_step)
            .map_err(|e| ClusterError::invalid(format!("line search settings: {e}")))?;

        let solver = GuardedLbfgs {
            lbfgs: LBFGS::new(line_search, self.settings.history),
            gradient_tolerance: self.settings.gradient_tolerance,
            energy_tolerance: self.settings.energy_tolerance,
            cancel,
            initial_cost: f64::NAN,
            convergence: None,
        };
        let max_iters = u64::try_from(self.settings.max_iterations).unwrap_or(u64::MAX);
        let OptimizationResult {
            solver, mut state, ..
        } = Executor::new(Borrowed(problem), solver)
            .configure(|state: LbfgsState| state.param(x0).gradient(g0).max_iters(max_iters))
            .run()
            .map_err(from_argmin)?;

        let iterations = usize::try_from(state.get_iter()).unwrap_or(usize::MAX);
        // the starting gradient was computed outside the executor
        let mut evaluations = 1 + ["cost_count", "gradient_count"]
            .iter()
            .filter_map(|key| state.get_func_counts().get(*key))
            .map(|&n| usize::try_from(n).unwrap_or(usize::MAX))
            .sum::<usize>();
        let reason = state.get_termination_reason().cloned();
        let value = state.get_best_cost();
        let x = state.take_best_param().ok_or_else(|| ClusterError::Objective {
            reason: "solver finished without an accepted point".to_string(),
        })?;
        let last_gradient = state.take_gradient();
        let gradient = match last_gradient {
            Some(gradient) if state.get_param() == Some(&x) => gradient,
            _ => {
                evaluations += 1;
                problem.gradient(&x).map_err(from_argmin)?
            }
        };

        let termination = match reason {
            Some(TerminationReason::SolverConverged) => Termination::Converged(
                solver.convergence.unwrap_or(Convergence::GradientTolerance),
            ),
            Some(TerminationReason::Interrupt) => Termination::Interrupted,
            Some(TerminationReason::SolverExit(why)) => {
                if max_abs(&gradient) <= self.settings.gradient_tolerance {
                    Termination::Converged(Convergence::GradientTolerance)
                } else {
                    warn!("line search gave up after {iterations} iterations: {why}");
                    Termination::LineSearchFailed
                }
            }
            _ => Termination::Exhausted,
        };
        info!(
            "{termination:?} after {iterations} iterations, {evaluations} evaluations, energy {:.10} -> {value:.10}",
            solver.initial_cost
        );

        Ok(FlatMinimum {
            x,
            value,
            initial_value: solver.initial_cost,
            gradient,
            iterations,
            evaluations,
            termination,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Minimization {
    pub configuration: Configuration,
    pub energy: f64,
    pub forces: Vec<Vector3<f64>>,
    pub initial_energy: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

/// L-BFGS driver for Lennard-Jones clusters.
#[derive(Clone, Debug)]
pub struct Minimizer {
    evaluator: Evaluator,
    solver: Lbfgs,
    cancel: Option<Arc<AtomicBool>>,
}

impl Minimizer {
    pub fn new(evaluator: Evaluator, settings: MinimizerSettings) -> Result<Self, ClusterError> {
        Ok(Minimizer {
            evaluator,
            solver: Lbfgs::new(settings)?,
            cancel: None,
        })
    }

    /// Raising the flag stops the run at the next iteration boundary.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn minimize(&self, initial: &Configuration) -> Result<Minimization, ClusterError> {
        let result = self.solver.minimize_flat(
            &self.evaluator,
            initial.flatten(),
            self.cancel.as_deref(),
        )?;

        let configuration = Configuration::from_flat(&result.x)?;
        let forces = result
            .gradient
            .chunks_exact(3)
            .map(|g| -Vector3::new(g[0], g[1], g[2]))
            .collect();
        Ok(Minimization {
            configuration,
            energy: result.value,
            forces,
            initial_energy: result.initial_value,
            iterations: result.iterations,
            evaluations: result.evaluations,
            termination: result.termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::make_cluster_seeded;
    use crate::lj_parameters::LJParameters;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::AtomicUsize;

    fn reduced_minimizer() -> Minimizer {
        Minimizer::new(
            Evaluator::new(LJParameters::reduced()),
            MinimizerSettings::default(),
        )
        .unwrap()
    }

    fn dimer(separation: f64) -> Configuration {
        Configuration::new(vec![
            Vector3::new(0.3, -0.2, 0.1),
            Vector3::new(0.3 + separation, -0.2, 0.1),
        ])
        .unwrap()
    }

    struct Quadratic {
        center: Vec<f64>,
    }

    impl CostFunction for Quadratic {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Self::Param) -> Result<f64, ArgminError> {
            Ok(0.5 * x.iter().zip(&self.center).map(|(a, b)| (a - b).powi(2)).sum::<f64>())
        }
    }

    impl Gradient for Quadratic {
        type Param = Vec<f64>;
        type Gradient = Vec<f64>;

        fn gradient(&self, x: &Self::Param) -> Result<Vec<f64>, ArgminError> {
            Ok(x.iter().zip(&self.center).map(|(a, b)| a - b).collect())
        }
    }

    #[test]
    fn test_dimer_relaxes_to_equilibrium() {
        let minimizer = reduced_minimizer();
        for start in [0.95, 1.5, 2.2, 5.0, 9.0] {
            let result = minimizer.minimize(&dimer(start)).unwrap();
            assert!(result.termination.is_converged(), "{start}: {:?}", result.termination);
            assert!(result.iterations >= 1);
            let d = result.configuration.distance_matrix()[[0, 1]];
            assert_abs_diff_eq!(d, 2f64.powf(1.0 / 6.0), epsilon = 1e-4);
            assert_abs_diff_eq!(result.energy, -1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_converged_start_stays_put() {
        let minimizer = reduced_minimizer();
        let first = minimizer.minimize(&dimer(1.5)).unwrap();
        let again = minimizer.minimize(&first.configuration).unwrap();
        assert!(again.termination.is_converged(), "{:?}", again.termination);
        assert_abs_diff_eq!(again.energy, first.energy, epsilon = 1e-9);
    }

    #[test]
    fn test_trimer_becomes_equilateral() {
        let params = LJParameters::argon();
        let minimizer =
            Minimizer::new(Evaluator::new(params), MinimizerSettings::default()).unwrap();
        let start = make_cluster_seeded(3, 2.0, 1981).unwrap();
        let result = minimizer.minimize(&start).unwrap();

        assert!(result.termination.is_converged(), "{:?}", result.termination);
        assert!(result.energy <= result.initial_energy);
        let r_min = params.equilibrium_distance();
        let d = result.configuration.distance_matrix();
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            assert_abs_diff_eq!(d[[i, j]], r_min, epsilon = 1e-3);
        }
        assert_abs_diff_eq!(result.energy, -3.0 * params.epsilon, epsilon = 1e-6);
    }

    #[test]
    fn test_energy_never_increases() {
        let minimizer = reduced_minimizer();
        let start = make_cluster_seeded(13, 1.2, 4).unwrap();
        let result = minimizer.minimize(&start).unwrap();
        assert!(result.energy <= result.initial_energy);
        // the relaxed cluster is bound
        assert!(result.energy < -13.0);
        let net = result.forces.iter().fold(Vector3::zeros(), |acc, f| acc + f);
        assert!(net.norm() < 1e-6);
    }

    #[test]
    fn test_iteration_cap_is_not_an_error() {
        let minimizer = Minimizer::new(
            Evaluator::new(LJParameters::reduced()),
            MinimizerSettings {
                max_iterations: 2,
                ..MinimizerSettings::default()
            },
        )
        .unwrap();
        let start = make_cluster_seeded(10, 1.2, 12).unwrap();
        let result = minimizer.minimize(&start).unwrap();
        assert_eq!(result.termination, Termination::Exhausted);
        assert_eq!(result.iterations, 2);
        assert!(result.energy < result.initial_energy);
    }

    #[test]
    fn test_cancel_before_start_returns_initial_configuration() {
        let flag = Arc::new(AtomicBool::new(true));
        let minimizer = reduced_minimizer().with_cancel_flag(flag);
        let start = make_cluster_seeded(5, 1.2, 2).unwrap();
        let result = minimizer.minimize(&start).unwrap();
        assert_eq!(result.termination, Termination::Interrupted);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.configuration, start);
        assert_eq!(result.energy, result.initial_energy);
    }

    struct CancelAfter<'a> {
        inner: Evaluator,
        calls: AtomicUsize,
        limit: usize,
        flag: &'a AtomicBool,
    }

    impl CostFunction for CancelAfter<'_> {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Self::Param) -> Result<f64, ArgminError> {
            self.inner.cost(x)
        }
    }

    impl Gradient for CancelAfter<'_> {
        type Param = Vec<f64>;
        type Gradient = Vec<f64>;

        fn gradient(&self, x: &Self::Param) -> Result<Vec<f64>, ArgminError> {
            if self.calls.fetch_add(1, Ordering::Relaxed) + 1 >= self.limit {
                self.flag.store(true, Ordering::Relaxed);
            }
            self.inner.gradient(x)
        }
    }

    #[test]
    fn test_cancel_mid_run_keeps_progress() {
        let flag = AtomicBool::new(false);
        let objective = CancelAfter {
            inner: Evaluator::new(LJParameters::reduced()),
            calls: AtomicUsize::new(0),
            limit: 6,
            flag: &flag,
        };
        let start = make_cluster_seeded(8, 1.2, 3).unwrap().flatten();
        let solver = Lbfgs::new(MinimizerSettings::default()).unwrap();
        let result = solver.minimize_flat(&objective, start, Some(&flag)).unwrap();
        assert_eq!(result.termination, Termination::Interrupted);
        assert!(result.iterations >= 1);
        assert!(result.value < result.initial_value);
    }

    struct WrongSign;

    impl CostFunction for WrongSign {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Self::Param) -> Result<f64, ArgminError> {
            Ok(0.5 * x.iter().map(|v| v * v).sum::<f64>())
        }
    }

    impl Gradient for WrongSign {
        type Param = Vec<f64>;
        type Gradient = Vec<f64>;

        // reports the ascent direction as the gradient
        fn gradient(&self, x: &Self::Param) -> Result<Vec<f64>, ArgminError> {
            Ok(x.iter().map(|v| -v).collect())
        }
    }

    #[test]
    fn test_dead_end_line_search_is_reported() {
        let solver = Lbfgs::new(MinimizerSettings::default()).unwrap();
        let x0 = vec![1.0, -2.0, 0.5];
        let result = solver.minimize_flat(&WrongSign, x0.clone(), None).unwrap();
        assert_eq!(result.termination, Termination::LineSearchFailed);
        assert_eq!(result.x, x0);
        assert_eq!(result.value, result.initial_value);
    }

    struct Cliff;

    impl Cliff {
        fn check(x: &[f64]) -> Result<f64, ArgminError> {
            // minimum at 3 is behind a region where the energy is undefined
            if x[0] >= 2.0 {
                return Err(ClusterError::NumericalFailure {
                    pair: None,
                    quantity: "energy",
                }
                .into());
            }
            Ok(x[0] - 3.0)
        }
    }

    impl CostFunction for Cliff {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, x: &Self::Param) -> Result<f64, ArgminError> {
            Ok(Cliff::check(x)?.powi(2))
        }
    }

    impl Gradient for Cliff {
        type Param = Vec<f64>;
        type Gradient = Vec<f64>;

        fn gradient(&self, x: &Self::Param) -> Result<Vec<f64>, ArgminError> {
            Ok(vec![2.0 * Cliff::check(x)?])
        }
    }

    #[test]
    fn test_failing_trials_keep_the_last_accepted_point() {
        let solver = Lbfgs::new(MinimizerSettings::default()).unwrap();
        let result = solver.minimize_flat(&Cliff, vec![0.0], None).unwrap();
        assert_eq!(result.termination, Termination::LineSearchFailed);
        assert!(result.value.is_finite());
        assert!(result.x[0] < 2.0);
        assert!(result.value < 9.0);
        assert_abs_diff_eq!(result.gradient[0], 2.0 * (result.x[0] - 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_quadratic_converges_on_gradient() {
        let solver = Lbfgs::new(MinimizerSettings {
            energy_tolerance: 0.0,
            ..MinimizerSettings::default()
        })
        .unwrap();
        let objective = Quadratic {
            center: vec![1.0, -2.0, 3.0, 0.5],
        };
        let result = solver.minimize_flat(&objective, vec![0.0; 4], None).unwrap();
        assert_eq!(
            result.termination,
            Termination::Converged(Convergence::GradientTolerance)
        );
        assert!(max_abs(&result.gradient) <= 1e-5);
        for (x, c) in result.x.iter().zip(&objective.center) {
            assert_abs_diff_eq!(x, c, epsilon = 1e-5);
        }
    }

    struct Undefined;

    impl CostFunction for Undefined {
        type Param = Vec<f64>;
        type Output = f64;

        fn cost(&self, _: &Self::Param) -> Result<f64, ArgminError> {
            Ok(f64::NAN)
        }
    }

    impl Gradient for Undefined {
        type Param = Vec<f64>;
        type Gradient = Vec<f64>;

        fn gradient(&self, x: &Self::Param) -> Result<Vec<f64>, ArgminError> {
            Ok(vec![1.0; x.len()])
        }
    }

    #[test]
    fn test_starting_point_must_be_finite() {
        let solver = Lbfgs::new(MinimizerSettings::default()).unwrap();
        assert!(matches!(
            solver.minimize_flat(&Cliff, vec![2.5], None),
            Err(ClusterError::NumericalFailure { .. })
        ));
        assert!(matches!(
            solver.minimize_flat(&Undefined, vec![0.0, 1.0], None),
            Err(ClusterError::NumericalFailure { .. })
        ));
        assert!(matches!(
            solver.minimize_flat(&Undefined, Vec::new(), None),
            Err(ClusterError::InvalidInput { .. })
        ));
    }
}
