extern crate nalgebra as na;

use crate::error::{Error, Result};

/// Linear Time-Invariant System with quadratic cost
/// x(k+1) = A*x(k) + B*u(k) + w(k)
/// J = sum x(k)'*Q*x(k) + u(k)'*R*u(k)
#[allow(non_snake_case)]
#[derive(Clone, Debug)]
pub struct LinearQuadraticSystem {
    A: na::DMatrix<f64>,
    B: na::DMatrix<f64>,
    Q: na::DMatrix<f64>,
    R: na::DMatrix<f64>,
}

fn check_shape(what: &str, m: &na::DMatrix<f64>, expected: (usize, usize)) -> Result<()> {
    if m.shape() != expected {
        return Err(Error::DimensionMismatch {
            what: what.to_string(),
            expected,
            found: m.shape(),
        });
    }
    Ok(())
}

#[allow(non_snake_case)]
impl LinearQuadraticSystem {
    pub fn new(
        A: na::DMatrix<f64>,
        B: na::DMatrix<f64>,
        Q: na::DMatrix<f64>,
        R: na::DMatrix<f64>,
    ) -> Result<Self> {
        let n = A.nrows();
        let m = B.ncols();
        check_shape("A", &A, (n, n))?;
        check_shape("B", &B, (n, m))?;
        check_shape("Q", &Q, (n, n))?;
        check_shape("R", &R, (m, m))?;
        Ok(Self { A, B, Q, R })
    }

    pub fn A(&self) -> &na::DMatrix<f64> {
        &self.A
    }
    pub fn B(&self) -> &na::DMatrix<f64> {
        &self.B
    }
    pub fn Q(&self) -> &na::DMatrix<f64> {
        &self.Q
    }
    pub fn R(&self) -> &na::DMatrix<f64> {
        &self.R
    }

    /// Number of states
    pub fn nx(&self) -> usize {
        self.A.nrows()
    }

    /// Number of inputs
    pub fn nu(&self) -> usize {
        self.B.ncols()
    }

    /// Next state without control cost bookkeeping.
    pub fn state_model(
        &self,
        x: &na::DVector<f64>,
        u: &na::DVector<f64>,
        w: &na::DVector<f64>,
    ) -> na::DVector<f64> {
        &self.A * x + &self.B * u + w
    }

    pub fn stage_cost(&self, x: &na::DVector<f64>, u: &na::DVector<f64>) -> f64 {
        (x.transpose() * &self.Q * x)[(0, 0)] + (u.transpose() * &self.R * u)[(0, 0)]
    }
}

/// One draw of true disturbances together with the forecast error.
/// estimated_w(t) = w(t) + noise(t)
#[derive(Clone, Debug)]
pub struct DisturbanceRealization {
    w: Vec<na::DVector<f64>>,
    noise: Vec<na::DVector<f64>>,
    estimated_w: Vec<na::DVector<f64>>,
}

impl DisturbanceRealization {
    pub fn new(w: Vec<na::DVector<f64>>, noise: Vec<na::DVector<f64>>) -> Result<Self> {
        if w.len() != noise.len() {
            return Err(Error::DimensionMismatch {
                what: "noise sequence".to_string(),
                expected: (w.len(), 1),
                found: (noise.len(), 1),
            });
        }
        let n = w.first().map_or(0, |w_0| w_0.len());
        for (t, (w_t, v_t)) in w.iter().zip(noise.iter()).enumerate() {
            if w_t.len() != n || v_t.len() != n {
                return Err(Error::DimensionMismatch {
                    what: format!("disturbance at step {t}"),
                    expected: (n, n),
                    found: (w_t.len(), v_t.len()),
                });
            }
        }
        let estimated_w = w.iter().zip(noise.iter()).map(|(w_t, v_t)| w_t + v_t).collect();
        Ok(Self {
            w,
            noise,
            estimated_w,
        })
    }

    /// Realization with perfect forecasts.
    pub fn noiseless(w: Vec<na::DVector<f64>>) -> Result<Self> {
        let noise = w.iter().map(|w_t| na::DVector::zeros(w_t.len())).collect();
        Self::new(w, noise)
    }

    pub fn zeros(horizon: usize, nx: usize) -> Self {
        let w = vec![na::DVector::zeros(nx); horizon];
        Self {
            noise: w.clone(),
            estimated_w: w.clone(),
            w,
        }
    }

    pub fn horizon(&self) -> usize {
        self.w.len()
    }

    pub fn w(&self) -> &[na::DVector<f64>] {
        &self.w
    }

    pub fn noise(&self) -> &[na::DVector<f64>] {
        &self.noise
    }

    pub fn estimated_w(&self) -> &[na::DVector<f64>] {
        &self.estimated_w
    }

    /// Checks the realization against a system and horizon before a run.
    pub fn check_against(&self, system: &LinearQuadraticSystem, horizon: usize) -> Result<()> {
        if horizon == 0 {
            return Err(Error::InvalidHorizon { horizon });
        }
        if self.horizon() != horizon {
            return Err(Error::DimensionMismatch {
                what: "disturbance sequence".to_string(),
                expected: (horizon, system.nx()),
                found: (self.horizon(), system.nx()),
            });
        }
        match self.w.first() {
            Some(w_0) if w_0.len() != system.nx() => Err(Error::DimensionMismatch {
                what: "disturbance vector".to_string(),
                expected: (system.nx(), 1),
                found: (w_0.len(), 1),
            }),
            _ => Ok(()),
        }
    }
}
