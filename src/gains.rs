extern crate nalgebra as na;

use debug_print::{debug_eprintln, debug_println};

use crate::error::{Error, Result};
use crate::linsystheory::{
    is_stabilizable, is_stable, matrix_powers, spectral_norm, spectral_radius,
};
use crate::models::LinearQuadraticSystem;

const DOUBLING_MAX_ITER: usize = 200;
const DOUBLING_TOL: f64 = 1.0e-13;
const NEWTON_MAX_ITER: usize = 50;
const NEWTON_TOL: f64 = 1.0e-11;
const RESIDUAL_TOL: f64 = 1.0e-7;

fn inverse(m: na::DMatrix<f64>, name: &str) -> Result<na::DMatrix<f64>> {
    m.try_inverse().ok_or_else(|| Error::SingularMatrix {
        matrix: name.to_string(),
    })
}

fn all_finite(m: &na::DMatrix<f64>) -> bool {
    m.iter().all(|x| x.is_finite())
}

#[allow(non_snake_case)]
/// Stabilizing solution of the discrete algebraic Riccati equation
/// P = A'PA - A'PB(R + B'PB)^-1 B'PA + Q
/// by the structure-preserving doubling algorithm. When (Q, A) is not
/// detectable doubling can settle on a non-stabilizing solution; the
/// stabilizing one is then found by Newton iteration started from the
/// gain of the regularized problem with Q + δI.
pub fn dare(
    A: &na::DMatrix<f64>,
    B: &na::DMatrix<f64>,
    Q: &na::DMatrix<f64>,
    R: &na::DMatrix<f64>,
) -> Result<na::DMatrix<f64>> {
    if R.clone().cholesky().is_none() {
        return Err(Error::NotPositiveDefinite { matrix: "R" });
    }
    if !is_stabilizable(A, B)? {
        return Err(Error::NoStabilizingSolution {
            reason: "(A, B) is not stabilizable".to_string(),
        });
    }

    match doubling(A, B, Q, R) {
        Ok(P) => {
            let K = riccati_gain(A, B, R, &P)?;
            if is_stable(&(A - B * K))? {
                check_residual(A, B, Q, R, &P)?;
                return Ok(P);
            }
            debug_eprintln!("doubling settled on a non-stabilizing solution");
        }
        Err(_err) => {
            debug_eprintln!("doubling failed: {_err}");
        }
    }

    let n = A.nrows();
    let delta = Q.norm().max(1.0);
    let regularized = Q + na::DMatrix::<f64>::identity(n, n) * delta;
    let P_0 = doubling(A, B, &regularized, R)?;
    let P = newton(A, B, Q, R, riccati_gain(A, B, R, &P_0)?)?;
    check_residual(A, B, Q, R, &P)?;
    Ok(P)
}

#[allow(non_snake_case)]
fn doubling(
    A: &na::DMatrix<f64>,
    B: &na::DMatrix<f64>,
    Q: &na::DMatrix<f64>,
    R: &na::DMatrix<f64>,
) -> Result<na::DMatrix<f64>> {
    let n = A.nrows();
    let identity = na::DMatrix::<f64>::identity(n, n);
    let R_inv = inverse(R.clone(), "R")?;

    let mut A_k = A.clone();
    let mut G_k = B * R_inv * B.transpose();
    let mut H_k = Q.clone();

    for iteration in 0..DOUBLING_MAX_ITER {
        let W_inv = inverse(&identity + &G_k * &H_k, "I + GH")?;
        let A_next = &A_k * &W_inv * &A_k;
        let G_next = &G_k + &A_k * &W_inv * &G_k * A_k.transpose();
        let H_next = &H_k + A_k.transpose() * &H_k * &W_inv * &A_k;

        if !all_finite(&H_next) || !all_finite(&G_next) || !all_finite(&A_next) {
            return Err(Error::NoStabilizingSolution {
                reason: format!("doubling iteration {iteration} diverged"),
            });
        }

        let change = (&H_next - &H_k).norm();
        let scale = H_next.norm().max(1.0);
        A_k = A_next;
        G_k = G_next;
        H_k = H_next;

        if change <= DOUBLING_TOL * scale {
            debug_println!("DARE converged after {} doubling steps", iteration + 1);
            return Ok((&H_k + H_k.transpose()) * 0.5);
        }
    }

    Err(Error::NoStabilizingSolution {
        reason: format!("doubling did not converge in {DOUBLING_MAX_ITER} steps"),
    })
}

#[allow(non_snake_case)]
/// K = (R + B'PB)^-1 B'PA
fn riccati_gain(
    A: &na::DMatrix<f64>,
    B: &na::DMatrix<f64>,
    R: &na::DMatrix<f64>,
    P: &na::DMatrix<f64>,
) -> Result<na::DMatrix<f64>> {
    Ok(inverse(R + B.transpose() * P * B, "R + B'PB")? * B.transpose() * P * A)
}

#[allow(non_snake_case)]
/// Solves P = A_K' P A_K + M through (I - A_K' ⊗ A_K') vec(P) = vec(M).
fn solve_stein(A_K: &na::DMatrix<f64>, M: &na::DMatrix<f64>) -> Result<na::DMatrix<f64>> {
    let n = A_K.nrows();
    let lhs = na::DMatrix::<f64>::identity(n * n, n * n)
        - A_K.transpose().kronecker(&A_K.transpose());
    let rhs = na::DVector::from_column_slice(M.as_slice());
    let vec_P = lhs.lu().solve(&rhs).ok_or_else(|| Error::SingularMatrix {
        matrix: "I - A_K' ⊗ A_K'".to_string(),
    })?;
    Ok(na::DMatrix::from_column_slice(n, n, vec_P.as_slice()))
}

#[allow(non_snake_case)]
/// Kleinman iteration; K must stabilize A - BK.
fn newton(
    A: &na::DMatrix<f64>,
    B: &na::DMatrix<f64>,
    Q: &na::DMatrix<f64>,
    R: &na::DMatrix<f64>,
    mut K: na::DMatrix<f64>,
) -> Result<na::DMatrix<f64>> {
    let mut previous: Option<na::DMatrix<f64>> = None;
    for iteration in 0..NEWTON_MAX_ITER {
        let A_K = A - B * &K;
        let P = solve_stein(&A_K, &(Q + K.transpose() * R * &K))?;
        let P = (&P + P.transpose()) * 0.5;
        if !all_finite(&P) {
            return Err(Error::NoStabilizingSolution {
                reason: format!("Newton iteration {iteration} diverged"),
            });
        }
        K = riccati_gain(A, B, R, &P)?;

        if let Some(previous) = &previous {
            if (&P - previous).norm() <= NEWTON_TOL * P.norm().max(1.0) {
                debug_println!("DARE converged after {} Newton steps", iteration + 1);
                return Ok(P);
            }
        }
        previous = Some(P);
    }

    Err(Error::NoStabilizingSolution {
        reason: format!("Newton iteration did not converge in {NEWTON_MAX_ITER} steps"),
    })
}

#[allow(non_snake_case)]
fn check_residual(
    A: &na::DMatrix<f64>,
    B: &na::DMatrix<f64>,
    Q: &na::DMatrix<f64>,
    R: &na::DMatrix<f64>,
    P: &na::DMatrix<f64>,
) -> Result<()> {
    let S = inverse(R + B.transpose() * P * B, "R + B'PB")?;
    let residual = A.transpose() * P * A
        - A.transpose() * P * B * S * B.transpose() * P * A
        + Q
        - P;
    let relative = residual.norm() / P.norm().max(1.0);
    if relative > RESIDUAL_TOL {
        debug_eprintln!("DARE residual {relative:e} above tolerance");
        return Err(Error::NoStabilizingSolution {
            reason: format!("Riccati residual {relative:e} too large"),
        });
    }
    Ok(())
}

/// Gains derived once per run from the Riccati cost-to-go and shared
/// read-only by every policy.
#[allow(non_snake_case)]
#[derive(Clone, Debug)]
pub struct GainBundle {
    P: na::DMatrix<f64>,
    D: na::DMatrix<f64>,
    H: na::DMatrix<f64>,
    F: na::DMatrix<f64>,
}

#[allow(non_snake_case)]
impl GainBundle {
    /// Cost-to-go
    pub fn P(&self) -> &na::DMatrix<f64> {
        &self.P
    }
    /// Disturbance-rejection gain (R + B'PB)^-1 B'
    pub fn D(&self) -> &na::DMatrix<f64> {
        &self.D
    }
    /// B * D
    pub fn H(&self) -> &na::DMatrix<f64> {
        &self.H
    }
    /// Closed loop A - H*P*A
    pub fn F(&self) -> &na::DMatrix<f64> {
        &self.F
    }

    pub fn h_norm(&self) -> f64 {
        spectral_norm(&self.H)
    }

    pub fn p_norm(&self) -> f64 {
        spectral_norm(&self.P)
    }

    /// F^0 .. F^(horizon-1)
    pub fn closed_loop_powers(&self, horizon: usize) -> Result<Vec<na::DMatrix<f64>>> {
        matrix_powers(&self.F, horizon)
    }
}

#[allow(non_snake_case)]
pub fn solve_gains(system: &LinearQuadraticSystem) -> Result<GainBundle> {
    let (A, B, R) = (system.A(), system.B(), system.R());
    let P = dare(A, B, system.Q(), R)?;

    let D = inverse(R + B.transpose() * &P * B, "R + B'PB")? * B.transpose();
    let H = B * &D;
    let F = A - &H * &P * A;

    let rho = spectral_radius(&F)?;
    if rho >= 1.0 {
        return Err(Error::NoStabilizingSolution {
            reason: format!("closed loop spectral radius {rho} is not below one"),
        });
    }
    if rho < f64::EPSILON {
        debug_eprintln!("closed loop is nilpotent, F powers vanish after n steps");
    }
    debug_println!("closed loop spectral radius {rho:.6}");

    Ok(GainBundle { P, D, H, F })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[allow(non_snake_case)]
    pub(crate) fn double_integrator() -> LinearQuadraticSystem {
        let A = na::DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.0, 1.0, 0.0, //
                0.0, 1.0, 0.0, 1.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ],
        );
        let B = na::DMatrix::from_row_slice(4, 2, &[0.5, 0.0, 0.0, 0.5, 1.0, 0.0, 0.0, 1.0]);
        let Q = na::DMatrix::<f64>::identity(4, 4);
        let R = na::DMatrix::<f64>::identity(2, 2) * 0.1;
        LinearQuadraticSystem::new(A, B, Q, R).unwrap()
    }

    #[test]
    fn scalar_golden_ratio() {
        let one = na::DMatrix::from_element(1, 1, 1.0);
        let system =
            LinearQuadraticSystem::new(one.clone(), one.clone(), one.clone(), one).unwrap();
        let gains = solve_gains(&system).unwrap();

        let p = (1.0 + 5f64.sqrt()) / 2.0;
        approx::assert_relative_eq!(gains.P()[(0, 0)], p, epsilon = 1e-10);
        approx::assert_relative_eq!(gains.D()[(0, 0)], 1.0 / (1.0 + p), epsilon = 1e-10);
        approx::assert_relative_eq!(gains.H()[(0, 0)], 1.0 / (1.0 + p), epsilon = 1e-10);
        approx::assert_relative_eq!(gains.F()[(0, 0)], 1.0 / (1.0 + p), epsilon = 1e-10);
    }

    #[test]
    #[allow(non_snake_case)]
    fn double_integrator_gains() {
        let system = double_integrator();
        let gains = solve_gains(&system).unwrap();

        let P = gains.P();
        approx::assert_relative_eq!(P.clone(), P.transpose(), epsilon = 1e-12);
        let min_eig = P.clone().symmetric_eigen().eigenvalues.min();
        assert!(min_eig >= -1e-9, "P is not positive semi-definite");
        assert!(spectral_radius(gains.F()).unwrap() < 1.0);

        assert_eq!(gains.D().shape(), (2, 4));
        assert_eq!(gains.H().shape(), (4, 4));
    }

    #[test]
    #[allow(non_snake_case)]
    fn doubling_matches_value_iteration() {
        let A = na::DMatrix::from_row_slice(3, 3, &[1.1, 0.2, 0.0, 0.0, 0.8, 0.3, 0.1, 0.0, 0.95]);
        let B = na::DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 0.5, 0.2, 1.0]);
        let Q = na::DMatrix::from_diagonal(&na::DVector::from_vec(vec![1.0, 2.0, 0.5]));
        let R = na::DMatrix::from_row_slice(2, 2, &[0.3, 0.05, 0.05, 0.2]);

        let P = dare(&A, &B, &Q, &R).unwrap();

        let mut P_iter = Q.clone();
        for _ in 0..5000 {
            let S = (&R + B.transpose() * &P_iter * &B).try_inverse().unwrap();
            P_iter = A.transpose() * &P_iter * &A
                - A.transpose() * &P_iter * &B * S * B.transpose() * &P_iter * &A
                + &Q;
        }
        approx::assert_relative_eq!(P, P_iter, epsilon = 1e-8, max_relative = 1e-8);
    }

    #[test]
    fn zero_state_cost_unstable_scalar() {
        // P = 4P - 4P^2 / (1 + P) has roots 0 and 3; only 3 stabilizes
        let a = na::DMatrix::from_element(1, 1, 2.0);
        let b = na::DMatrix::from_element(1, 1, 1.0);
        let q = na::DMatrix::from_element(1, 1, 0.0);
        let r = na::DMatrix::from_element(1, 1, 1.0);
        let system = LinearQuadraticSystem::new(a, b, q, r).unwrap();
        let gains = solve_gains(&system).unwrap();

        approx::assert_relative_eq!(gains.P()[(0, 0)], 3.0, epsilon = 1e-9);
        approx::assert_relative_eq!(gains.D()[(0, 0)], 0.25, epsilon = 1e-9);
        approx::assert_relative_eq!(gains.F()[(0, 0)], 0.5, epsilon = 1e-9);
    }

    #[test]
    #[allow(non_snake_case)]
    fn undetectable_unstable_mode_is_stabilized() {
        // the unstable mode 1.2 is invisible to Q
        let A = na::DMatrix::from_row_slice(2, 2, &[1.2, 1.0, 0.0, 0.5]);
        let B = na::DMatrix::from_row_slice(2, 1, &[0.0, 1.0]);
        let Q = na::DMatrix::from_diagonal(&na::DVector::from_vec(vec![0.0, 1.0]));
        let R = na::DMatrix::from_element(1, 1, 1.0);

        let P = dare(&A, &B, &Q, &R).unwrap();
        approx::assert_relative_eq!(P.clone(), P.transpose(), epsilon = 1e-12);
        assert!(P.clone().symmetric_eigen().eigenvalues.min() >= -1e-9);

        let S = (&R + B.transpose() * &P * &B).try_inverse().unwrap();
        let residual = A.transpose() * &P * &A
            - A.transpose() * &P * &B * &S * B.transpose() * &P * &A
            + &Q
            - &P;
        assert!(residual.norm() < 1e-8, "residual {}", residual.norm());

        let system = LinearQuadraticSystem::new(A, B, Q, R).unwrap();
        let gains = solve_gains(&system).unwrap();
        assert!(spectral_radius(gains.F()).unwrap() < 1.0);
        approx::assert_relative_eq!(gains.P().clone(), P, epsilon = 1e-12);
    }

    #[test]
    #[allow(non_snake_case)]
    fn newton_agrees_with_doubling_when_detectable() {
        let system = double_integrator();
        let (A, B, Q, R) = (system.A(), system.B(), system.Q(), system.R());
        let P = doubling(A, B, Q, R).unwrap();
        let regularized = Q + na::DMatrix::<f64>::identity(4, 4) * 5.0;
        let P_0 = doubling(A, B, &regularized, R).unwrap();
        let K_0 = riccati_gain(A, B, R, &P_0).unwrap();
        let P_newton = newton(A, B, Q, R, K_0).unwrap();
        approx::assert_relative_eq!(P, P_newton, epsilon = 1e-8, max_relative = 1e-8);
    }

    #[test]
    fn unstabilizable_pair_fails() {
        let a = na::DMatrix::from_element(1, 1, 2.0);
        let b = na::DMatrix::from_element(1, 1, 0.0);
        let q = na::DMatrix::from_element(1, 1, 1.0);
        let r = na::DMatrix::from_element(1, 1, 1.0);
        let system = LinearQuadraticSystem::new(a, b, q, r).unwrap();
        assert!(matches!(
            solve_gains(&system),
            Err(Error::NoStabilizingSolution { .. })
        ));
    }

    #[test]
    fn indefinite_control_cost_fails() {
        let one = na::DMatrix::from_element(1, 1, 1.0);
        let r = na::DMatrix::from_element(1, 1, -0.5);
        let system = LinearQuadraticSystem::new(one.clone(), one.clone(), one, r).unwrap();
        assert_eq!(
            solve_gains(&system).unwrap_err(),
            Error::NotPositiveDefinite { matrix: "R" }
        );
    }
}
