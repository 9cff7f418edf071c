/*
Errors raised by the cluster energy code

Everything in the crate funnels into a single `ClusterError` so that the
evaluator, the minimizer and the file readers can be chained with `?`.
*/

use std::fmt;

#[derive(Debug)]
pub enum ClusterError {
    /// The configuration or a parameter can not be used at all (N < 2, NaN coordinates, ...)
    InvalidInput { reason: String },
    /// The pair potential was asked for a non-positive squared distance
    ContractViolation { r2: f64 },
    /// A non-finite energy or force showed up during a reduction
    NumericalFailure {
        pair: Option<(usize, usize)>,
        quantity: &'static str,
    },
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse {
        path: String,
        line: usize,
        reason: String,
    },
    Settings {
        path: String,
        source: serde_json::Error,
    },
    Report(csv::Error),
    /// An external objective function failed for its own reasons
    Objective { reason: String },
}

impl ClusterError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ClusterError::InvalidInput {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
            ClusterError::ContractViolation { r2 } => write!(
                f,
                "pair potential called with squared distance {r2}; it is only defined for r2 > 0"
            ),
            ClusterError::NumericalFailure {
                pair: Some((i, j)),
                quantity,
            } => write!(f, "non-finite {quantity} produced by pair ({i}, {j})"),
            ClusterError::NumericalFailure {
                pair: None,
                quantity,
            } => write!(f, "non-finite {quantity} produced during the reduction"),
            ClusterError::Io { path, source } => {
                write!(f, "I/O error while accessing `{path}`: {source}")
            }
            ClusterError::Parse { path, line, reason } => {
                write!(f, "malformed trajectory `{path}` at line {line}: {reason}")
            }
            ClusterError::Settings { path, source } => {
                write!(f, "could not read settings from `{path}`: {source}")
            }
            ClusterError::Report(source) => write!(f, "could not write sweep report: {source}"),
            ClusterError::Objective { reason } => write!(f, "objective function failed: {reason}"),
        }
    }
}

impl std::error::Error for ClusterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClusterError::Io { source, .. } => Some(source),
            ClusterError::Settings { source, .. } => Some(source),
            ClusterError::Report(source) => Some(source),
            _ => None,
        }
    }
}

impl From<csv::Error> for ClusterError {
    fn from(source: csv::Error) -> Self {
        ClusterError::Report(source)
    }
}
