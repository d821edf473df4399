extern crate nalgebra as na;

use debug_print::debug_println;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bound::compute_bound;
use crate::disturbance::{NoiseModel, Scenario};
use crate::error::{Error, Result};
use crate::gains::{solve_gains, GainBundle};
use crate::models::{DisturbanceRealization, LinearQuadraticSystem};
use crate::rollout::{
    run_with_gains, AggregateStatistics, LambdaConfig, OnlineTrust, Policy, SimulationReport,
};
use crate::trust::{TrustEstimate, TrustMode, DEFAULT_INITIAL_LAMBDA};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExperimentConfig {
    pub horizon: usize,
    pub lambda: LambdaConfig,
    pub scenario: Scenario,
    pub noise: NoiseModel,
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            horizon: 50,
            lambda: LambdaConfig {
                myopic: 0.5,
                online: OnlineTrust::Estimated(TrustMode::Sequence),
                initial: DEFAULT_INITIAL_LAMBDA,
            },
            scenario: Scenario::Tracking,
            noise: NoiseModel::scaled_binomial(0.2),
            seed: 0,
        }
    }
}

impl ExperimentConfig {
    pub fn with_horizon(mut self, horizon: usize) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_myopic_lambda(mut self, lambda: f64) -> Self {
        self.lambda.myopic = lambda;
        self
    }

    pub fn with_online(mut self, online: OnlineTrust) -> Self {
        self.lambda.online = online;
        self
    }

    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.lambda.initial = lambda;
        self
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_noise(mut self, noise: NoiseModel) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(Error::InvalidHorizon {
                horizon: self.horizon,
            });
        }
        let mut lambdas = vec![self.lambda.myopic, self.lambda.initial];
        if let OnlineTrust::Constant(lambda) = self.lambda.online {
            lambdas.push(lambda);
        }
        if lambdas.iter().any(|lambda| !lambda.is_finite()) {
            return Err(Error::Config(format!("λ values must be finite: {lambdas:?}")));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ExperimentReport {
    pub myopic_cost: f64,
    pub online_cost: f64,
    pub optimal_cost: f64,
    pub stats: AggregateStatistics,
    pub online_lambda: TrustEstimate,
    /// Spectral norm of H, enters the bound
    pub h_norm: f64,
}

impl ExperimentReport {
    fn from_simulation(report: SimulationReport, h_norm: f64) -> Result<Self> {
        let cost = |policy: Policy| {
            report.cost(policy).ok_or_else(|| Error::Config(format!("{policy:?} was not simulated")))
        };
        Ok(Self {
            myopic_cost: cost(Policy::Myopic)?,
            online_cost: cost(Policy::Online)?,
            optimal_cost: cost(Policy::Optimal)?,
            stats: report.stats,
            online_lambda: report
                .online_lambda
                .clone()
                .ok_or_else(|| Error::Config("online λ missing".to_string()))?,
            h_norm,
        })
    }

    /// Observed online cost / optimal cost.
    pub fn competitive_ratio(&self) -> Option<f64> {
        (self.optimal_cost > 0.0).then(|| self.online_cost / self.optimal_cost)
    }

    /// Analytic bound for trust parameter `lambda`.
    pub fn bound(&self, lambda: f64) -> Result<f64> {
        compute_bound(self.optimal_cost, lambda, &self.stats, self.h_norm)
    }
}

/// Result for one λ of a sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    pub lambda: f64,
    pub myopic_cost: f64,
    pub bound: f64,
}

/// One system, one configuration; gains and realization are fixed at
/// construction so every run and sweep point sees the same draw.
pub struct Experiment {
    system: LinearQuadraticSystem,
    config: ExperimentConfig,
    gains: GainBundle,
    realization: DisturbanceRealization,
}

impl Experiment {
    pub fn new(system: LinearQuadraticSystem, config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let gains = solve_gains(&system)?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let realization = DisturbanceRealization::draw(
            config.scenario,
            config.noise,
            system.A(),
            config.horizon,
            &mut rng,
        )?;
        Ok(Self {
            system,
            config,
            gains,
            realization,
        })
    }

    /// Uses a caller-provided realization instead of drawing one.
    pub fn with_realization(
        system: LinearQuadraticSystem,
        config: ExperimentConfig,
        realization: DisturbanceRealization,
    ) -> Result<Self> {
        config.validate()?;
        realization.check_against(&system, config.horizon)?;
        let gains = solve_gains(&system)?;
        Ok(Self {
            system,
            config,
            gains,
            realization,
        })
    }

    pub fn gains(&self) -> &GainBundle {
        &self.gains
    }

    pub fn realization(&self) -> &DisturbanceRealization {
        &self.realization
    }

    pub fn run(&self) -> Result<ExperimentReport> {
        let report = run_with_gains(
            self.config.horizon,
            &self.system,
            &self.gains,
            &self.realization,
            &self.config.lambda,
            &Policy::ALL,
        )?;
        let report = ExperimentReport::from_simulation(report, self.gains.h_norm())?;
        debug_println!(
            "online {:.4} myopic {:.4} optimal {:.4}",
            report.online_cost,
            report.myopic_cost,
            report.optimal_cost
        );
        Ok(report)
    }

    /// Myopic cost and bound for each λ, holding the realization fixed.
    pub fn sweep_lambda(&self, lambdas: &[f64]) -> Result<Vec<SweepPoint>> {
        let optimal = run_with_gains(
            self.config.horizon,
            &self.system,
            &self.gains,
            &self.realization,
            &self.config.lambda,
            &[Policy::Optimal],
        )?;
        let opt = optimal.cost(Policy::Optimal).unwrap_or_default();
        let h_norm = self.gains.h_norm();

        lambdas
            .iter()
            .map(|&lambda| {
                let config = LambdaConfig {
                    myopic: lambda,
                    ..self.config.lambda
                };
                let report = run_with_gains(
                    self.config.horizon,
                    &self.system,
                    &self.gains,
                    &self.realization,
                    &config,
                    &[Policy::Myopic],
                )?;
                Ok(SweepPoint {
                    lambda,
                    myopic_cost: report.cost(Policy::Myopic).unwrap_or_default(),
                    bound: compute_bound(opt, lambda, &optimal.stats, h_norm)?,
                })
            })
            .collect()
    }
}
