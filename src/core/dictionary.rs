//! Dictionary analysis: Gram matrix and Lipschitz constant.
//!
//! For a dictionary `D ∈ R^{n_atoms × n_features}` the smooth part of the
//! LASSO objective `1/2·||x - zD||²` has gradient `zB - xDᵀ` with
//! `B = D·Dᵀ`.  Its Lipschitz constant is the spectral norm of `B`, which
//! sets both the ISTA step size and the shrinkage scale.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView2};

use crate::error::{ListaError, Result};

/// Derived spectral quantities of a dictionary.
#[derive(Clone, Debug)]
pub struct Spectrum {
    /// Gram matrix `B = D·Dᵀ` ∈ R^{n_atoms × n_atoms}.
    pub gram: Array2<f64>,

    /// Largest eigenvalue magnitude of `B`.
    pub lipschitz: f64,
}

impl Spectrum {
    /// Reject dictionaries whose step size `1/L` is undefined or overflows.
    ///
    /// `L` must be a positive normal float: zero and subnormal values are
    /// degenerate.
    pub fn ensure_nondegenerate(&self) -> Result<()> {
        if self.lipschitz.is_normal() && self.lipschitz > 0.0 {
            Ok(())
        } else {
            Err(ListaError::DegenerateDictionary {
                lipschitz: self.lipschitz,
            })
        }
    }
}

/// Compute `B = D·Dᵀ` and `L = ||B||₂`.
pub fn analyze(d: ArrayView2<'_, f64>) -> Result<Spectrum> {
    let (n_atoms, n_features) = d.dim();
    if n_atoms == 0 || n_features == 0 {
        return Err(ListaError::EmptyDictionary {
            n_atoms,
            n_features,
        });
    }
    if !d.iter().all(|v| v.is_finite()) {
        return Err(ListaError::non_finite("dictionary"));
    }

    let gram = gram_matrix(d);
    let lipschitz = spectral_norm(gram.view())?;

    Ok(Spectrum { gram, lipschitz })
}

/// `B = D·Dᵀ`.
pub fn gram_matrix(d: ArrayView2<'_, f64>) -> Array2<f64> {
    d.dot(&d.t())
}

/// Operator 2-norm of a symmetric matrix: the largest |eigenvalue|.
pub fn spectral_norm(b: ArrayView2<'_, f64>) -> Result<f64> {
    let (rows, cols) = b.dim();
    if rows != cols {
        return Err(ListaError::shape("gram matrix", (rows, rows), (rows, cols)));
    }
    if !b.iter().all(|v| v.is_finite()) {
        return Err(ListaError::non_finite("gram matrix"));
    }

    let m = DMatrix::from_fn(rows, cols, |i, j| b[[i, j]]);
    let eig = SymmetricEigen::new(m);
    let norm = eig
        .eigenvalues
        .iter()
        .fold(0.0f64, |acc, &v| acc.max(v.abs()));

    if !norm.is_finite() {
        return Err(ListaError::non_finite("spectral norm"));
    }
    Ok(norm)
}

/// Symmetry check within an absolute tolerance.
pub fn is_symmetric(b: ArrayView2<'_, f64>, tol: f64) -> bool {
    let (rows, cols) = b.dim();
    if rows != cols {
        return false;
    }
    (0..rows).all(|i| (i + 1..cols).all(|j| (b[[i, j]] - b[[j, i]]).abs() <= tol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn random_dictionary(n_atoms: usize, n_features: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        Array2::from_shape_fn((n_atoms, n_features), |_| normal.sample(&mut rng))
    }

    #[test]
    fn test_gram_symmetric() {
        let d = random_dictionary(6, 11, 7);
        let spectrum = analyze(d.view()).unwrap();
        assert_eq!(spectrum.gram.dim(), (6, 6));
        assert!(is_symmetric(spectrum.gram.view(), 1e-12));
    }

    #[test]
    fn test_orthonormal_rows() {
        let d = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let spectrum = analyze(d.view()).unwrap();
        assert_eq!(spectrum.gram, Array2::eye(2));
        assert!((spectrum.lipschitz - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lipschitz_diagonal() {
        // B = diag(4, 9) → L = 9
        let d = array![[2.0, 0.0], [0.0, -3.0]];
        let spectrum = analyze(d.view()).unwrap();
        assert!((spectrum.lipschitz - 9.0).abs() < 1e-10);
    }

    #[test]
    fn test_lipschitz_matches_power_iteration() {
        let d = random_dictionary(5, 8, 42);
        let spectrum = analyze(d.view()).unwrap();

        let mut v = ndarray::Array1::from_elem(5, 1.0);
        let mut lambda = 0.0;
        for _ in 0..500 {
            let w = spectrum.gram.dot(&v);
            lambda = w.dot(&w).sqrt();
            v = w / lambda;
        }
        assert!((spectrum.lipschitz - lambda).abs() / lambda < 1e-8);
    }

    #[test]
    fn test_zero_dictionary_has_zero_norm() {
        let d = Array2::<f64>::zeros((3, 4));
        let spectrum = analyze(d.view()).unwrap();
        assert_eq!(spectrum.lipschitz, 0.0);
    }

    #[test]
    fn test_degenerate_spectrum() {
        let zero = analyze(Array2::<f64>::zeros((3, 4)).view()).unwrap();
        assert!(matches!(
            zero.ensure_nondegenerate(),
            Err(ListaError::DegenerateDictionary { .. })
        ));

        // B = 1e-320 is subnormal; 1/L would overflow
        let tiny = analyze(array![[1e-160]].view()).unwrap();
        assert!(tiny.lipschitz > 0.0);
        assert!(matches!(
            tiny.ensure_nondegenerate(),
            Err(ListaError::DegenerateDictionary { .. })
        ));

        let small = analyze(array![[1e-100]].view()).unwrap();
        assert!(small.ensure_nondegenerate().is_ok());
    }

    #[test]
    fn test_empty_dictionary_rejected() {
        let d = Array2::<f64>::zeros((0, 4));
        let err = analyze(d.view()).unwrap_err();
        assert!(matches!(err, ListaError::EmptyDictionary { n_atoms: 0, .. }));
    }

    #[test]
    fn test_non_finite_dictionary_rejected() {
        let d = array![[1.0, f64::NAN], [0.0, 1.0]];
        let err = analyze(d.view()).unwrap_err();
        assert!(matches!(err, ListaError::NonFinite { .. }));
    }

    #[test]
    fn test_is_symmetric_detects_asymmetry() {
        let b = array![[1.0, 2.0], [2.5, 1.0]];
        assert!(!is_symmetric(b.view(), 1e-9));
        assert!(is_symmetric(b.view(), 1.0));
    }
}
