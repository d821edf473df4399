extern crate nalgebra as na;

use na::ComplexField;

use crate::error::{Error, Result};

fn eigenvalues(m: &na::DMatrix<f64>) -> Result<na::DVector<na::Complex<f64>>> {
    assert!(m.is_square());
    // Convert to complex matrix to solve eigenvalues
    let m_complex = m.map(|x| na::Complex::new(x, 0.0));
    m_complex
        .eigenvalues()
        .ok_or_else(|| Error::NoStabilizingSolution {
            reason: "eigenvalue decomposition did not converge".to_string(),
        })
}

/// Largest eigenvalue magnitude.
pub fn spectral_radius(m: &na::DMatrix<f64>) -> Result<f64> {
    Ok(eigenvalues(m)?
        .iter()
        .map(|eigenvalue| eigenvalue.abs())
        .fold(0.0, f64::max))
}

/// Induced 2-norm, i.e. the largest singular value.
pub fn spectral_norm(m: &na::DMatrix<f64>) -> f64 {
    if m.is_empty() {
        return 0.0;
    }
    m.singular_values().max()
}

#[allow(non_snake_case)]
/// Determine if closed loop system is stable.
/// A_clp: closed loop system. Assumed to be discrete
pub fn is_stable(A_clp: &na::DMatrix<f64>) -> Result<bool> {
    Ok(spectral_radius(A_clp)? < 1.0)
}

#[allow(non_snake_case)]
/// Determine if (A, B) is stabilizable
/// See PHB-test: https://en.wikipedia.org/wiki/Hautus_lemma
pub fn is_stabilizable(A: &na::DMatrix<f64>, B: &na::DMatrix<f64>) -> Result<bool> {
    assert!(A.is_square());
    assert!(A.nrows() == B.nrows());

    let n = A.nrows();
    for eigenvalue in eigenvalues(A)?.iter() {
        if eigenvalue.abs() < 1.0 {
            continue;
        }
        // check that rank [A - eigenvalue*I, B] = n
        let phb_matrix = na::DMatrix::from_fn(n, n + B.ncols(), |i, j| {
            if j < n {
                let a_ij = na::Complex::new(A[(i, j)], 0.0);
                if i == j {
                    a_ij - eigenvalue
                } else {
                    a_ij
                }
            } else {
                na::Complex::new(B[(i, j - n)], 0.0)
            }
        });
        if phb_matrix.rank(1.0e-9) != n {
            return Ok(false);
        }
    }
    Ok(true)
}

/// [I, M, M^2, ..., M^(count-1)]
pub fn matrix_powers(m: &na::DMatrix<f64>, count: usize) -> Result<Vec<na::DMatrix<f64>>> {
    assert!(m.is_square());
    let mut powers = Vec::with_capacity(count);
    let mut current = na::DMatrix::<f64>::identity(m.nrows(), m.ncols());
    for k in 0..count {
        if current.iter().any(|x| !x.is_finite()) {
            return Err(Error::NonFinite {
                what: "closed-loop matrix power",
                step: k,
            });
        }
        let next = m * &current;
        powers.push(current);
        current = next;
    }
    Ok(powers)
}
