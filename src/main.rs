//! Optimizes a small argon cluster and prints its interatomic distances.
//!
//!     lj_cluster [natoms]
//!
//! `RUST_LOG=debug` shows the per-iteration minimizer progress.

use std::process::ExitCode;

use env_logger::{Builder, Env};
use log::info;

use lj_cluster::{make_cluster_seeded, ClusterError, ClusterSettings, Evaluator, Minimizer, RunSettings};

fn parse_natoms() -> Result<Option<usize>, ClusterError> {
    match std::env::args().nth(1) {
        None => Ok(None),
        Some(arg) => arg
            .parse()
            .map(Some)
            .map_err(|_| ClusterError::invalid(format!("atom count must be an integer, got `{arg}`"))),
    }
}

fn run() -> Result<(), ClusterError> {
    let mut settings = RunSettings::default();
    if let Some(natoms) = parse_natoms()? {
        settings.cluster = ClusterSettings {
            natoms,
            ..settings.cluster
        };
    }
    let cluster_settings = &settings.cluster;

    println!("A {} atom cluster", cluster_settings.natoms);
    let cluster = make_cluster_seeded(
        cluster_settings.natoms,
        cluster_settings.scale,
        cluster_settings.seed,
    )?;

    let evaluator = Evaluator::new(cluster_settings.parameters()?);
    let minimizer = Minimizer::new(evaluator, settings.minimizer.clone())?;
    let result = minimizer.minimize(&cluster)?;
    info!(
        "{:?} after {} iterations, energy {:.6} -> {:.6}",
        result.termination, result.iterations, result.initial_energy, result.energy
    );

    println!("  Total energy: {:.4}", result.energy);
    println!("Distances (angstrom)");
    println!("{:.8}", result.configuration.distance_matrix());
    Ok(())
}

fn main() -> ExitCode {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
