//! Myopic, online and omniscient control of a linear system under
//! disturbance forecasts with bounded error, and the competitive-ratio
//! bound relating the online policy to the offline optimum.

extern crate nalgebra as na;
extern crate rand;

pub mod bound;
pub mod disturbance;
pub mod error;
pub mod experiment;
pub mod gains;
pub mod linsystheory;
pub mod models;
pub mod offline;
pub mod rollout;
pub mod trust;

pub use bound::{bound_terms, compute_bound, BoundTerms};
pub use disturbance::{NoiseModel, Scenario};
pub use error::{Error, Result};
pub use experiment::{Experiment, ExperimentConfig, ExperimentReport, SweepPoint};
pub use gains::{solve_gains, GainBundle};
pub use models::{DisturbanceRealization, LinearQuadraticSystem};
pub use offline::{optimal_cost, solve_offline};
pub use rollout::{
    run_simulation, run_with_gains, AggregateStatistics, LambdaConfig, OnlineTrust, Policy,
    SimulationReport,
};
pub use trust::{estimate_trust, TrustEstimate, TrustEstimator, TrustMode};
