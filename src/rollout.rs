extern crate nalgebra as na;

use debug_print::debug_println;

use crate::error::{Error, Result};
use crate::gains::{solve_gains, GainBundle};
use crate::linsystheory::spectral_norm;
use crate::models::{DisturbanceRealization, LinearQuadraticSystem};
use crate::trust::{
    BatchEstimator, SequenceEstimator, TrustEstimate, TrustEstimator, TrustMode,
    DEFAULT_INITIAL_LAMBDA,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Trusts the noisy forecast with a fixed λ.
    Myopic,
    /// Trusts the noisy forecast with a λ fitted from data.
    Online,
    /// Knows the true future disturbances.
    Optimal,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::Myopic, Policy::Online, Policy::Optimal];
}

/// Which disturbance sequence a policy plans with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forecast {
    Estimated,
    True,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OnlineTrust {
    Constant(f64),
    Estimated(TrustMode),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LambdaConfig {
    pub myopic: f64,
    pub online: OnlineTrust,
    /// Used by the estimators when there is no prediction energy yet.
    pub initial: f64,
}

impl Default for LambdaConfig {
    fn default() -> Self {
        Self {
            myopic: 0.5,
            online: OnlineTrust::Estimated(TrustMode::Sequence),
            initial: DEFAULT_INITIAL_LAMBDA,
        }
    }
}

/// Control law shared by all policies:
/// u(t) = -D*P*A*x(t) - λ(t) * D * sum_{s>=t} (F^(s-t))' P forecast(s)
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyLaw {
    pub forecast: Forecast,
    pub lambda: TrustEstimate,
}

/// Accumulated disturbance propagation energies, one term per step t:
/// inner_v(t) = sum_{s=t}^{T-1} |F^(s-t)|_2 |P|_2 |v(s)|
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AggregateStatistics {
    /// sum inner_noise^2
    pub epsilon: f64,
    /// W: sum inner_estimated^2
    pub estimate_energy: f64,
    /// Z: sum inner_true^2
    pub disturbance_energy: f64,
    /// Y: sum inner_noise * inner_true
    pub noise_disturbance_cross: f64,
    /// X: sum inner_true * inner_estimated
    pub disturbance_estimate_cross: f64,
}

#[derive(Clone, Debug)]
pub struct Trajectory {
    pub policy: Policy,
    /// x(0) .. x(T-1), x(0) = 0
    pub states: Vec<na::DVector<f64>>,
    /// u(0) .. u(T-1); the last one carries no cost
    pub controls: Vec<na::DVector<f64>>,
    pub cost: f64,
}

#[derive(Clone, Debug)]
pub struct SimulationReport {
    pub trajectories: Vec<Trajectory>,
    pub stats: AggregateStatistics,
    /// λ used by the online policy, if it was simulated
    pub online_lambda: Option<TrustEstimate>,
}

impl SimulationReport {
    pub fn trajectory(&self, policy: Policy) -> Option<&Trajectory> {
        self.trajectories.iter().find(|traj| traj.policy == policy)
    }

    pub fn cost(&self, policy: Policy) -> Option<f64> {
        self.trajectory(policy).map(|traj| traj.cost)
    }
}

/// sum_{s=t}^{T-1} (F^(s-t))' P f(s) for every t, using
/// g(t) = P f(t) + F' g(t+1).
pub fn forecast_terms(gains: &GainBundle, forecast: &[na::DVector<f64>]) -> Vec<na::DVector<f64>> {
    let mut terms: Vec<na::DVector<f64>> = Vec::with_capacity(forecast.len());
    for f_t in forecast.iter().rev() {
        let mut g_t = gains.P() * f_t;
        if let Some(g_next) = terms.last() {
            g_t += gains.F().tr_mul(g_next);
        }
        terms.push(g_t);
    }
    terms.reverse();
    terms
}

pub fn aggregate_statistics(
    realization: &DisturbanceRealization,
    gains: &GainBundle,
    f_powers: &[na::DMatrix<f64>],
) -> AggregateStatistics {
    let horizon = realization.horizon();
    assert!(f_powers.len() >= horizon);

    let p_norm = gains.p_norm();
    let f_norms: Vec<f64> = f_powers[..horizon].iter().map(spectral_norm).collect();
    let norms = |seq: &[na::DVector<f64>]| -> Vec<f64> { seq.iter().map(|v| v.norm()).collect() };
    let noise = norms(realization.noise());
    let estimated = norms(realization.estimated_w());
    let truth = norms(realization.w());

    let mut stats = AggregateStatistics::default();
    for t in 0..horizon {
        let mut inner_epsilon = 0.0;
        let mut inner_w = 0.0;
        let mut inner_z = 0.0;
        for s in t..horizon {
            let weight = f_norms[s - t] * p_norm;
            inner_epsilon += weight * noise[s];
            inner_w += weight * estimated[s];
            inner_z += weight * truth[s];
        }
        stats.epsilon += inner_epsilon * inner_epsilon;
        stats.estimate_energy += inner_w * inner_w;
        stats.disturbance_energy += inner_z * inner_z;
        stats.noise_disturbance_cross += inner_epsilon * inner_z;
        stats.disturbance_estimate_cross += inner_z * inner_w;
    }
    stats
}

fn online_lambda(
    config: &LambdaConfig,
    realization: &DisturbanceRealization,
    gains: &GainBundle,
    f_powers: &[na::DMatrix<f64>],
) -> TrustEstimate {
    match config.online {
        OnlineTrust::Constant(lambda) => TrustEstimate::Scalar(lambda),
        OnlineTrust::Estimated(TrustMode::Batch) => {
            BatchEstimator::new(config.initial).estimate(realization, gains, f_powers)
        }
        OnlineTrust::Estimated(TrustMode::Sequence) => {
            SequenceEstimator::new(config.initial).estimate(realization, gains, f_powers)
        }
    }
}

struct PolicyRun<'a> {
    policy: Policy,
    law: PolicyLaw,
    terms: &'a [na::DVector<f64>],
    states: Vec<na::DVector<f64>>,
    controls: Vec<na::DVector<f64>>,
    cost: f64,
}

/// Runs the selected policies in lockstep over one realization.
#[allow(non_snake_case)]
pub fn run_with_gains(
    horizon: usize,
    system: &LinearQuadraticSystem,
    gains: &GainBundle,
    realization: &DisturbanceRealization,
    config: &LambdaConfig,
    policies: &[Policy],
) -> Result<SimulationReport> {
    realization.check_against(system, horizon)?;
    let f_powers = gains.closed_loop_powers(horizon)?;
    let stats = aggregate_statistics(realization, gains, &f_powers);

    let estimated_terms = forecast_terms(gains, realization.estimated_w());
    let true_terms = forecast_terms(gains, realization.w());

    let online = policies
        .contains(&Policy::Online)
        .then(|| online_lambda(config, realization, gains, &f_powers));

    let mut runs: Vec<PolicyRun> = policies
        .iter()
        .map(|&policy| {
            let law = match policy {
                Policy::Myopic => PolicyLaw {
                    forecast: Forecast::Estimated,
                    lambda: TrustEstimate::Scalar(config.myopic),
                },
                Policy::Online => PolicyLaw {
                    forecast: Forecast::Estimated,
                    lambda: online
                        .clone()
                        .unwrap_or(TrustEstimate::Scalar(config.initial)),
                },
                Policy::Optimal => PolicyLaw {
                    forecast: Forecast::True,
                    lambda: TrustEstimate::Scalar(1.0),
                },
            };
            let terms = match law.forecast {
                Forecast::Estimated => &estimated_terms[..],
                Forecast::True => &true_terms[..],
            };
            PolicyRun {
                policy,
                law,
                terms,
                states: vec![na::DVector::zeros(system.nx())],
                controls: Vec::with_capacity(horizon),
                cost: 0.0,
            }
        })
        .collect();

    let (A, B, P, D) = (system.A(), system.B(), gains.P(), gains.D());
    let PA = P * A;

    for t in 0..horizon {
        for run in runs.iter_mut() {
            let x = &run.states[t];
            let feedback_term = &PA * x;
            let lambda_t = run.law.lambda.at(t);
            let u = -(D * (feedback_term + &run.terms[t] * lambda_t));

            if t < horizon - 1 {
                run.cost += system.stage_cost(x, &u);
                let x_next = A * x + B * &u + &realization.w()[t];
                run.states.push(x_next);
            } else {
                run.cost += (x.transpose() * P * x)[(0, 0)];
            }
            run.controls.push(u);

            if !run.cost.is_finite() {
                return Err(Error::NonFinite {
                    what: "accumulated policy cost",
                    step: t,
                });
            }
        }
    }

    let trajectories: Vec<Trajectory> = runs
        .into_iter()
        .map(|run| {
            debug_println!("{:?} cost: {}", run.policy, run.cost);
            Trajectory {
                policy: run.policy,
                states: run.states,
                controls: run.controls,
                cost: run.cost,
            }
        })
        .collect();

    Ok(SimulationReport {
        trajectories,
        stats,
        online_lambda: online,
    })
}

/// Solves the gains for `system` and runs the selected policies.
pub fn run_simulation(
    horizon: usize,
    system: &LinearQuadraticSystem,
    realization: &DisturbanceRealization,
    config: &LambdaConfig,
    policies: &[Policy],
) -> Result<SimulationReport> {
    let gains = solve_gains(system)?;
    run_with_gains(horizon, system, &gains, realization, config, policies)
}
