//! Exact finite-horizon optimum with full knowledge of the disturbances.
//!
//! Minimises sum_{t<T-1} x'Qx + u'Ru + x(T-1)' P_T x(T-1) subject to
//! x(t+1) = A x(t) + B u(t) + w(t), x(0) = 0, by a backward Riccati
//! recursion with an affine disturbance term. This shares nothing with the
//! rollout's D/H/F gains and is the reference the omniscient policy is
//! checked against.

extern crate nalgebra as na;

use crate::error::{Error, Result};
use crate::models::{DisturbanceRealization, LinearQuadraticSystem};

#[derive(Clone, Debug)]
pub struct OfflineSolution {
    pub states: Vec<na::DVector<f64>>,
    pub controls: Vec<na::DVector<f64>>,
    pub cost: f64,
}

#[allow(non_snake_case)]
pub fn solve_offline(
    system: &LinearQuadraticSystem,
    terminal: &na::DMatrix<f64>,
    realization: &DisturbanceRealization,
) -> Result<OfflineSolution> {
    let horizon = realization.horizon();
    realization.check_against(system, horizon)?;
    let (A, B, Q, R) = (system.A(), system.B(), system.Q(), system.R());
    let w = realization.w();

    // feedback K(t) and feedforward k(t), built back to front
    let steps = horizon - 1;
    let mut feedback = Vec::with_capacity(steps);
    let mut feedforward = Vec::with_capacity(steps);
    let mut P_next = terminal.clone();
    let mut q_next = na::DVector::<f64>::zeros(system.nx());
    for t in (0..steps).rev() {
        let S_inv = (R + B.transpose() * &P_next * B)
            .try_inverse()
            .ok_or_else(|| Error::SingularMatrix {
                matrix: format!("R + B'P(t+1)B at step {t}"),
            })?;
        let K = &S_inv * B.transpose() * &P_next * A;
        let drift = &P_next * &w[t] + &q_next;
        let k = &S_inv * B.transpose() * &drift;

        let P_t = Q + A.transpose() * &P_next * A - A.transpose() * &P_next * B * &K;
        q_next = (A - B * &K).transpose() * drift;
        P_next = (&P_t + P_t.transpose()) * 0.5;

        feedback.push(K);
        feedforward.push(k);
    }
    feedback.reverse();
    feedforward.reverse();

    let mut x = na::DVector::<f64>::zeros(system.nx());
    let mut states = Vec::with_capacity(horizon);
    let mut controls = Vec::with_capacity(steps);
    let mut cost = 0.0;
    for t in 0..steps {
        let u = -(&feedback[t] * &x) - &feedforward[t];
        cost += system.stage_cost(&x, &u);
        let x_next = system.state_model(&x, &u, &w[t]);
        states.push(x);
        controls.push(u);
        x = x_next;
    }
    cost += (x.transpose() * terminal * &x)[(0, 0)];
    states.push(x);

    if !cost.is_finite() {
        return Err(Error::NonFinite {
            what: "offline optimal cost",
            step: steps,
        });
    }
    Ok(OfflineSolution {
        states,
        controls,
        cost,
    })
}

pub fn optimal_cost(
    system: &LinearQuadraticSystem,
    terminal: &na::DMatrix<f64>,
    realization: &DisturbanceRealization,
) -> Result<f64> {
    Ok(solve_offline(system, terminal, realization)?.cost)
}
