//! Error types for gain synthesis, simulation and bound evaluation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// The discrete algebraic Riccati equation has no stabilizing solution.
    #[error("no stabilizing Riccati solution: {reason}")]
    NoStabilizingSolution { reason: String },

    #[error("matrix {matrix} is singular")]
    SingularMatrix { matrix: String },

    #[error("competitive bound needs a positive optimal cost, got {opt}")]
    DivisionByZero { opt: f64 },

    #[error("matrix {matrix} is not positive definite")]
    NotPositiveDefinite { matrix: &'static str },

    #[error("dimension mismatch for {what}: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        what: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("horizon must be at least one step, got {horizon}")]
    InvalidHorizon { horizon: usize },

    #[error("non-finite value in {what} at step {step}")]
    NonFinite { what: &'static str, step: usize },

    #[error("cannot generate scenario {scenario}: {reason}")]
    UnsupportedScenario { scenario: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}
