/*
Parallel sweeps over independent clusters

Every job builds its own seeded cluster, evaluates it and optionally
minimizes it. Jobs share nothing, so they are simply mapped over the rayon
pool; a failing job is reported in its row and does not stop the others.
*/

use std::path::Path;
use std::time::Instant;

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::make_cluster_seeded;
use crate::error::ClusterError;
use crate::evaluator::Evaluator;
use crate::lj_parameters::LJParameters;
use crate::minimization::{Convergence, Minimizer, Termination};
use crate::settings::MinimizerSettings;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepJob {
    pub natoms: usize,
    pub seed: u64,
    pub scale: f64,
    pub minimize: bool,
}

/// One csv row per job. Energies are empty when the job failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SweepOutcome {
    pub natoms: usize,
    pub seed: u64,
    pub scale: f64,
    pub initial_energy: Option<f64>,
    pub final_energy: Option<f64>,
    pub iterations: Option<usize>,
    pub status: String,
    pub seconds: f64,
}

impl SweepOutcome {
    pub fn succeeded(&self) -> bool {
        self.initial_energy.is_some()
    }
}

fn status_label(termination: Termination) -> &'static str {
    match termination {
        Termination::Converged(Convergence::GradientTolerance) => "converged-gradient",
        Termination::Converged(Convergence::EnergyTolerance) => "converged-energy",
        Termination::Exhausted => "exhausted",
        Termination::LineSearchFailed => "line-search-failed",
        Termination::Interrupted => "interrupted",
    }
}

struct JobResult {
    initial_energy: f64,
    final_energy: f64,
    iterations: usize,
    status: &'static str,
}

fn run_job(
    job: &SweepJob,
    evaluator: &Evaluator,
    minimizer: &Minimizer,
) -> Result<JobResult, ClusterError> {
    let cluster = make_cluster_seeded(job.natoms, job.scale, job.seed)?;
    if !job.minimize {
        let energy = evaluator.energy(&cluster)?;
        return Ok(JobResult {
            initial_energy: energy,
            final_energy: energy,
            iterations: 0,
            status: "evaluated",
        });
    }
    let result = minimizer.minimize(&cluster)?;
    Ok(JobResult {
        initial_energy: result.initial_energy,
        final_energy: result.energy,
        iterations: result.iterations,
        status: status_label(result.termination),
    })
}

pub fn run_sweep(
    jobs: &[SweepJob],
    parameters: LJParameters,
    settings: &MinimizerSettings,
) -> Result<Vec<SweepOutcome>, ClusterError> {
    let evaluator = Evaluator::new(parameters);
    let minimizer = Minimizer::new(evaluator.clone(), settings.clone())?;
    info!("Running sweep of {} jobs", jobs.len());

    let outcomes = jobs
        .par_iter()
        .map(|job| {
            let start = Instant::now();
            let result = run_job(job, &evaluator, &minimizer);
            let seconds = start.elapsed().as_secs_f64();
            match result {
                Ok(r) => SweepOutcome {
                    natoms: job.natoms,
                    seed: job.seed,
                    scale: job.scale,
                    initial_energy: Some(r.initial_energy),
                    final_energy: Some(r.final_energy),
                    iterations: Some(r.iterations),
                    status: r.status.to_string(),
                    seconds,
                },
                Err(err) => {
                    warn!("sweep job (natoms {}, seed {}) failed: {err}", job.natoms, job.seed);
                    SweepOutcome {
                        natoms: job.natoms,
                        seed: job.seed,
                        scale: job.scale,
                        initial_energy: None,
                        final_energy: None,
                        iterations: None,
                        status: format!("error: {err}"),
                        seconds,
                    }
                }
            }
        })
        .collect();
    Ok(outcomes)
}

pub fn write_sweep_csv(
    path: impl AsRef<Path>,
    outcomes: &[SweepOutcome],
) -> Result<(), ClusterError> {
    let mut writer = csv::Writer::from_path(path)?;
    for outcome in outcomes {
        writer.serialize(outcome)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
