use crate::error::{Error, Result};
use crate::rollout::AggregateStatistics;

/// The two competitive-ratio bounds; either can be the tighter one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundTerms {
    /// 1 + |H|(λ²ε + (1-λ)²Z + λ(1-λ)Y) / OPT
    pub first: f64,
    /// 1 + |H|(Z + λ²W + λ(1-λ)X) / OPT
    pub second: f64,
}

impl BoundTerms {
    pub fn value(&self) -> f64 {
        self.first.min(self.second)
    }
}

pub fn bound_terms(
    opt: f64,
    lambda: f64,
    stats: &AggregateStatistics,
    h_norm: f64,
) -> Result<BoundTerms> {
    if !(opt > 0.0) {
        return Err(Error::DivisionByZero { opt });
    }
    let trust = lambda;
    let distrust = 1.0 - lambda;

    let first = 1.0
        + h_norm
            * (trust * trust * stats.epsilon / opt
                + stats.disturbance_energy * distrust * distrust / opt
                + stats.noise_disturbance_cross * distrust * trust / opt);
    let second = 1.0
        + h_norm
            * (stats.disturbance_energy / opt
                + trust * trust * stats.estimate_energy / opt
                + stats.disturbance_estimate_cross * distrust * trust / opt);

    Ok(BoundTerms { first, second })
}

/// Upper bound on online cost / optimal cost for trust parameter `lambda`.
pub fn compute_bound(
    opt: f64,
    lambda: f64,
    stats: &AggregateStatistics,
    h_norm: f64,
) -> Result<f64> {
    Ok(bound_terms(opt, lambda, stats, h_norm)?.value())
}
