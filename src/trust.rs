//! Follow-the-leader estimation of the trust coefficient λ.
//!
//! Both estimators return the λ minimising the observed prediction error so
//! far: the ratio of the "prediction vs. true perturbation" quadratic form
//! to the "prediction vs. prediction" one. For every start step `s < t`
//!
//! ```text
//! a_s = sum_{l=s}^{t-1} (F^(l-s))' P estimated_w[l]
//! b_s = sum_{l=s}^{t-1} (F^(l-s))' P w[l]
//! λ(t) = sum_s b_s' H a_s / sum_s a_s' H a_s
//! ```
//!
//! When the denominator is exactly zero the configured initial λ is used.

extern crate nalgebra as na;

use debug_print::debug_println;

use crate::error::Result;
use crate::gains::GainBundle;
use crate::models::DisturbanceRealization;

/// Default fallback, matching the value the experiments were tuned with.
pub const DEFAULT_INITIAL_LAMBDA: f64 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustMode {
    /// One λ for the whole run, fitted on the complete history.
    Batch,
    /// One λ per step, fitted on the history before that step.
    Sequence,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TrustEstimate {
    Scalar(f64),
    PerStep(Vec<f64>),
}

impl TrustEstimate {
    /// λ in effect at step `t`. Past the end of a per-step sequence the
    /// last λ stays in effect; an empty sequence gives NaN.
    pub fn at(&self, t: usize) -> f64 {
        match self {
            TrustEstimate::Scalar(lambda) => *lambda,
            TrustEstimate::PerStep(lambdas) => lambdas
                .get(t)
                .or_else(|| lambdas.last())
                .copied()
                .unwrap_or(f64::NAN),
        }
    }
}

pub trait TrustEstimator {
    fn estimate(
        &self,
        realization: &DisturbanceRealization,
        gains: &GainBundle,
        f_powers: &[na::DMatrix<f64>],
    ) -> TrustEstimate;
}

/// Out-of-range λ is mapped to its absolute value, so λ > 1 survives.
pub fn fold_into_unit(lambda: f64) -> f64 {
    if (0.0..=1.0).contains(&lambda) {
        lambda
    } else {
        debug_println!("trust coefficient {lambda} folded to {}", lambda.abs());
        lambda.abs()
    }
}

fn ratio_or_fallback(cross: f64, energy: f64, initial_lambda: f64) -> f64 {
    if energy != 0.0 {
        cross / energy
    } else {
        debug_println!("no prediction energy yet, using initial λ {initial_lambda}");
        initial_lambda
    }
}

fn project(p: &na::DMatrix<f64>, vectors: &[na::DVector<f64>], len: usize) -> Vec<na::DVector<f64>> {
    vectors[..len].iter().map(|v| p * v).collect()
}

#[derive(Clone, Copy, Debug)]
pub struct BatchEstimator {
    initial_lambda: f64,
}

impl BatchEstimator {
    pub fn new(initial_lambda: f64) -> Self {
        Self { initial_lambda }
    }

    /// Raw ratio over steps `[0, t)`, recomputed from scratch.
    pub fn estimate_at(
        &self,
        t: usize,
        w: &[na::DVector<f64>],
        estimated_w: &[na::DVector<f64>],
        gains: &GainBundle,
        f_powers: &[na::DMatrix<f64>],
    ) -> f64 {
        assert!(w.len() >= t && estimated_w.len() >= t);
        assert!(f_powers.len() >= t, "need F powers up to {t}");

        let p_w = project(gains.P(), w, t);
        let p_est = project(gains.P(), estimated_w, t);
        let n = gains.P().nrows();

        let mut prediction_perturbation = 0.0;
        let mut prediction_prediction = 0.0;
        for s in 0..t {
            let mut a_s = na::DVector::<f64>::zeros(n);
            let mut b_s = na::DVector::<f64>::zeros(n);
            for l in s..t {
                a_s += f_powers[l - s].tr_mul(&p_est[l]);
                b_s += f_powers[l - s].tr_mul(&p_w[l]);
            }
            let h_a = gains.H() * &a_s;
            prediction_prediction += a_s.dot(&h_a);
            prediction_perturbation += b_s.dot(&h_a);
        }

        ratio_or_fallback(
            prediction_perturbation,
            prediction_prediction,
            self.initial_lambda,
        )
    }
}

impl TrustEstimator for BatchEstimator {
    fn estimate(
        &self,
        realization: &DisturbanceRealization,
        gains: &GainBundle,
        f_powers: &[na::DMatrix<f64>],
    ) -> TrustEstimate {
        let lambda = self.estimate_at(
            realization.horizon(),
            realization.w(),
            realization.estimated_w(),
            gains,
            f_powers,
        );
        TrustEstimate::Scalar(fold_into_unit(lambda))
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SequenceEstimator {
    initial_lambda: f64,
}

impl SequenceEstimator {
    pub fn new(initial_lambda: f64) -> Self {
        Self { initial_lambda }
    }

    /// λ(t) for every t in 0..T in one pass. The partial sums a_s and b_s
    /// are extended by one term per step instead of being rebuilt.
    pub fn estimate_all(
        &self,
        w: &[na::DVector<f64>],
        estimated_w: &[na::DVector<f64>],
        gains: &GainBundle,
        f_powers: &[na::DMatrix<f64>],
    ) -> Vec<f64> {
        let horizon = w.len();
        assert_eq!(estimated_w.len(), horizon);
        assert!(f_powers.len() >= horizon, "need F powers up to {horizon}");

        let p_w = project(gains.P(), w, horizon);
        let p_est = project(gains.P(), estimated_w, horizon);

        // matrix_est_w[s] and matrix_w[s] hold a_s and b_s for the current t
        let mut matrix_est_w: Vec<na::DVector<f64>> = Vec::with_capacity(horizon);
        let mut matrix_w: Vec<na::DVector<f64>> = Vec::with_capacity(horizon);
        let mut lambdas = Vec::with_capacity(horizon);

        for t in 0..horizon {
            let mut prediction_perturbation = 0.0;
            let mut prediction_prediction = 0.0;
            for (a_s, b_s) in matrix_est_w.iter().zip(matrix_w.iter()) {
                let h_a = gains.H() * a_s;
                prediction_prediction += a_s.dot(&h_a);
                prediction_perturbation += b_s.dot(&h_a);
            }
            lambdas.push(ratio_or_fallback(
                prediction_perturbation,
                prediction_prediction,
                self.initial_lambda,
            ));

            matrix_est_w.push(na::DVector::zeros(p_est[t].len()));
            matrix_w.push(na::DVector::zeros(p_w[t].len()));
            for s in 0..=t {
                matrix_est_w[s] += f_powers[t - s].tr_mul(&p_est[t]);
                matrix_w[s] += f_powers[t - s].tr_mul(&p_w[t]);
            }
        }
        lambdas
    }
}

impl TrustEstimator for SequenceEstimator {
    fn estimate(
        &self,
        realization: &DisturbanceRealization,
        gains: &GainBundle,
        f_powers: &[na::DMatrix<f64>],
    ) -> TrustEstimate {
        TrustEstimate::PerStep(self.estimate_all(
            realization.w(),
            realization.estimated_w(),
            gains,
            f_powers,
        ))
    }
}

/// Builds the estimator for `mode` and runs it on one realization.
pub fn estimate_trust(
    mode: TrustMode,
    realization: &DisturbanceRealization,
    gains: &GainBundle,
    initial_lambda: f64,
) -> Result<TrustEstimate> {
    let f_powers = gains.closed_loop_powers(realization.horizon())?;
    let estimator: Box<dyn TrustEstimator> = match mode {
        TrustMode::Batch => Box::new(BatchEstimator::new(initial_lambda)),
        TrustMode::Sequence => Box::new(SequenceEstimator::new(initial_lambda)),
    };
    Ok(estimator.estimate(realization, gains, &f_powers))
}
