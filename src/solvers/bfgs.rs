use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::core::spatial;

/// Initial Hessian guess (eV/Å²).
const DEFAULT_ALPHA: f64 = 70.0;

/// Quasi-Newton optimizer for a single image.
///
/// Keeps an approximate Hessian across steps, takes the Newton step through its
/// eigen-decomposition and caps the largest per-atom displacement at `maxstep`.
#[derive(Debug, Clone)]
pub struct Bfgs {
    maxstep: f64,
    alpha: f64,
    hessian: Option<DMatrix<f64>>,
    r0: Option<DVector<f64>>,
    f0: Option<DVector<f64>>,
}

impl Bfgs {
    pub fn new(maxstep: f64) -> Self {
        Self {
            maxstep,
            alpha: DEFAULT_ALPHA,
            hessian: None,
            r0: None,
            f0: None,
        }
    }

    fn update(hessian: &mut DMatrix<f64>, r: &DVector<f64>, f: &DVector<f64>, r0: &DVector<f64>, f0: &DVector<f64>) {
        let dr = r - r0;
        if dr.amax() < 1e-7 {
            return;
        }
        let df = f - f0;
        let a = dr.dot(&df);
        let dg = &*hessian * &dr;
        let b = dr.dot(&dg);
        if a.abs() < 1e-12 || b.abs() < 1e-12 {
            return;
        }
        *hessian -= (&df * df.transpose()) / a + (&dg * dg.transpose()) / b;
    }

    /// New positions from the current positions and forces (both flat).
    pub fn step(&mut self, positions: &[f64], forces: &[f64]) -> Vec<f64> {
        let n = positions.len();
        let r = DVector::from_column_slice(positions);
        let f = DVector::from_column_slice(forces);

        let alpha = self.alpha;
        let hessian = self
            .hessian
            .get_or_insert_with(|| DMatrix::identity(n, n) * alpha);
        if let (Some(r0), Some(f0)) = (&self.r0, &self.f0) {
            Self::update(hessian, &r, &f, r0, f0);
        }

        let eig = SymmetricEigen::new(hessian.clone());
        let projected = eig.eigenvectors.transpose() * &f;
        let scaled = DVector::from_iterator(
            n,
            projected
                .iter()
                .zip(eig.eigenvalues.iter())
                .map(|(p, w)| p / w.abs().max(1e-10)),
        );
        let mut dr = &eig.eigenvectors * scaled;

        let longest = spatial::max_atom_norm(dr.as_slice());
        if longest >= self.maxstep {
            dr *= self.maxstep / longest;
        }

        self.r0 = Some(r.clone());
        self.f0 = Some(f);
        (r + dr).iter().cloned().collect()
    }
}
