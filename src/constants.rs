// Default parameters for the argon-like cluster used by the command line driver
pub const SIGMA_ARGON: f64 = 3.40; // angstrom
pub const EPSILON_ARGON: f64 = 0.238; // kcal/mol
pub const DEFAULT_SEED: u64 = 1981;
pub const DEFAULT_SCALE: f64 = 2.0; // standard deviation of the random cluster
pub const DEFAULT_NATOMS: usize = 3;
pub const ATOM_LABEL: &str = "Ar";
