extern crate nalgebra as na;

use rand::distributions::{Bernoulli, Distribution};
use rand::Rng;
use statrs::distribution::{Binomial, Normal};

use crate::error::{Error, Result};
use crate::models::DisturbanceRealization;

/// Source of the true disturbance sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scenario {
    Zero,
    /// Keep the first two states on a heart-shaped reference curve.
    Tracking,
    /// Each state receives an arrival with probability `rate` per step,
    /// of size N(mean, std).
    Arrivals { rate: f64, mean: f64, std: f64 },
}

impl Scenario {
    pub fn arrivals() -> Self {
        Scenario::Arrivals {
            rate: 0.1,
            mean: 10.0,
            std: 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Zero => "zero",
            Scenario::Tracking => "tracking",
            Scenario::Arrivals { .. } => "arrivals",
        }
    }

    /// T disturbance vectors of length n for state matrix `a`.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        a: &na::DMatrix<f64>,
        horizon: usize,
        rng: &mut R,
    ) -> Result<Vec<na::DVector<f64>>> {
        let nx = a.nrows();
        match *self {
            Scenario::Zero => Ok(vec![na::DVector::zeros(nx); horizon]),
            Scenario::Tracking => {
                if nx < 2 {
                    return Err(Error::UnsupportedScenario {
                        scenario: self.name(),
                        reason: format!("needs at least two states, system has {nx}"),
                    });
                }
                let reference = |t: usize| {
                    let (y_1, y_2) = tracking_coordinates(t as f64);
                    let mut r = na::DVector::<f64>::zeros(nx);
                    r[0] = y_1;
                    r[1] = y_2;
                    r
                };
                Ok((0..horizon)
                    .map(|t| a * reference(t) - reference(t + 1))
                    .collect())
            }
            Scenario::Arrivals { rate, mean, std } => {
                let coin = Bernoulli::new(rate).map_err(|err| Error::UnsupportedScenario {
                    scenario: self.name(),
                    reason: err.to_string(),
                })?;
                let size = Normal::new(mean, std).map_err(|err| Error::UnsupportedScenario {
                    scenario: self.name(),
                    reason: err.to_string(),
                })?;
                Ok((0..horizon)
                    .map(|_| {
                        na::DVector::from_fn(nx, |_, _| {
                            if coin.sample(rng) {
                                size.sample(rng)
                            } else {
                                0.0
                            }
                        })
                    })
                    .collect())
            }
        }
    }
}

/// Heart curve the tracking scenario follows.
pub fn tracking_coordinates(t: f64) -> (f64, f64) {
    let y_1 = 16.0 * (t / 4.0).sin().powi(3);
    let y_2 = 13.0 * (t / 4.0).cos()
        - 5.0 * (2.0 * t / 4.0).cos()
        - 2.0 * (3.0 * t / 4.0).cos()
        - t.cos();
    (y_1, y_2)
}

/// Forecast error added to the true disturbances.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoiseModel {
    None,
    Gaussian { mean: f64, std: f64 },
    /// scale * Binomial(trials, p), elementwise
    ScaledBinomial { trials: u64, p: f64, scale: f64 },
}

impl NoiseModel {
    /// 0.2 * Binomial(10, p)
    pub fn scaled_binomial(p: f64) -> Self {
        NoiseModel::ScaledBinomial {
            trials: 10,
            p,
            scale: 0.2,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            NoiseModel::None => "no noise",
            NoiseModel::Gaussian { .. } => "gaussian noise",
            NoiseModel::ScaledBinomial { .. } => "binomial noise",
        }
    }

    pub fn generate<R: Rng + ?Sized>(
        &self,
        nx: usize,
        horizon: usize,
        rng: &mut R,
    ) -> Result<Vec<na::DVector<f64>>> {
        let invalid = |reason: String| Error::UnsupportedScenario {
            scenario: self.name(),
            reason,
        };
        match *self {
            NoiseModel::None => Ok(vec![na::DVector::zeros(nx); horizon]),
            NoiseModel::Gaussian { mean, std } => {
                let dist = Normal::new(mean, std).map_err(|err| invalid(err.to_string()))?;
                Ok(sample_sequence(&dist, 1.0, nx, horizon, rng))
            }
            NoiseModel::ScaledBinomial { trials, p, scale } => {
                let dist = Binomial::new(p, trials).map_err(|err| invalid(err.to_string()))?;
                Ok(sample_sequence(&dist, scale, nx, horizon, rng))
            }
        }
    }
}

fn sample_sequence<D: Distribution<f64>, R: Rng + ?Sized>(
    dist: &D,
    scale: f64,
    nx: usize,
    horizon: usize,
    rng: &mut R,
) -> Vec<na::DVector<f64>> {
    (0..horizon)
        .map(|_| na::DVector::from_fn(nx, |_, _| scale * dist.sample(rng)))
        .collect()
}

impl DisturbanceRealization {
    /// Draws the disturbances and forecast errors for one run. Both the
    /// rollout and the aggregate statistics must use this same draw.
    pub fn draw<R: Rng + ?Sized>(
        scenario: Scenario,
        noise: NoiseModel,
        a: &na::DMatrix<f64>,
        horizon: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let w = scenario.generate(a, horizon, rng)?;
        let noise = noise.generate(a.nrows(), horizon, rng)?;
        DisturbanceRealization::new(w, noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn tracking_matrix() -> na::DMatrix<f64> {
        na::DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.0, 1.0, 0.0, //
                0.0, 1.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
        )
    }

    #[test]
    fn tracking_reference_offsets() {
        let a = tracking_matrix();
        let mut rng = StdRng::seed_from_u64(0);
        let w = Scenario::Tracking.generate(&a, 3, &mut rng).unwrap();
        assert_eq!(w.len(), 3);

        // with this A the first two entries are y(t) - y(t+1)
        let (y0_1, y0_2) = tracking_coordinates(0.0);
        let (y1_1, y1_2) = tracking_coordinates(1.0);
        approx::assert_relative_eq!(w[0][0], y0_1 - y1_1, epsilon = 1e-12);
        approx::assert_relative_eq!(w[0][1], y0_2 - y1_2, epsilon = 1e-12);
        assert_eq!(w[0][2], 0.0);
        assert_eq!(w[0][3], 0.0);

        approx::assert_relative_eq!(tracking_coordinates(0.0).1, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn tracking_needs_two_states() {
        let a = na::DMatrix::from_element(1, 1, 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            Scenario::Tracking.generate(&a, 3, &mut rng),
            Err(Error::UnsupportedScenario { scenario: "tracking", .. })
        ));
    }

    #[test]
    fn arrivals_are_sparse_and_positive() {
        let a = tracking_matrix();
        let mut rng = StdRng::seed_from_u64(17);
        let w = Scenario::arrivals().generate(&a, 500, &mut rng).unwrap();

        let entries: Vec<f64> = w.iter().flat_map(|w_t| w_t.iter().copied()).collect();
        let arrivals = entries.iter().filter(|x| **x != 0.0).count();
        let share = arrivals as f64 / entries.len() as f64;
        assert!(share > 0.05 && share < 0.15, "arrival share {share}");
        assert!(entries.iter().all(|x| *x == 0.0 || *x > 4.0));
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let a = tracking_matrix();
        let mut rng = StdRng::seed_from_u64(0);
        let scenario = Scenario::Arrivals {
            rate: 1.5,
            mean: 10.0,
            std: 1.0,
        };
        assert!(scenario.generate(&a, 3, &mut rng).is_err());
        let noise = NoiseModel::Gaussian {
            mean: 0.0,
            std: -1.0,
        };
        assert!(noise.generate(4, 3, &mut rng).is_err());
    }

    #[test]
    fn binomial_noise_on_lattice() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = NoiseModel::scaled_binomial(0.3)
            .generate(4, 50, &mut rng)
            .unwrap();
        for v in noise.iter().flat_map(|v_t| v_t.iter()) {
            let steps = v / 0.2;
            assert!((steps - steps.round()).abs() < 1e-9);
            assert!((0.0..=2.0 + 1e-12).contains(v));
        }
    }

    #[test]
    fn same_seed_same_realization() {
        let a = tracking_matrix();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            DisturbanceRealization::draw(
                Scenario::arrivals(),
                NoiseModel::Gaussian {
                    mean: 0.0,
                    std: 0.5,
                },
                &a,
                20,
                &mut rng,
            )
            .unwrap()
        };
        let first = draw(5);
        let second = draw(5);
        assert_eq!(first.w(), second.w());
        assert_eq!(first.noise(), second.noise());
        assert_ne!(draw(6).noise(), first.noise());
    }
}
