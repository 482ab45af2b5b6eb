use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::config::SurrogateConfig;
use crate::core::domain::{Image, TrainingSet};
use crate::core::spatial;
use crate::engine::evaluator::SinglePoint;
use crate::engine::surrogate::{Surrogate, SurrogateFactory};

/// Shortest pair distance covered by the radial basis (Å).
const BASIS_R_MIN: f64 = 0.5;

/// Pairwise radial-basis potential.
///
/// `E = sum_a eps_a * n_a + sum_{i<j} sum_k c_{t(i,j),k} phi_k(r_ij)`, with
/// Gaussian `phi_k` damped by a cosine cutoff and one coefficient block per
/// unordered species pair `t`. Linear in its coefficients, so training is a
/// single least-squares solve over energy and force rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSurrogate {
    pub n_species: usize,
    pub cutoff: f64,
    pub centers: Vec<f64>,
    pub width: f64,
    /// `[eps_0..eps_{S-1}, c_{t0,0..K-1}, c_{t1,0..K-1}, ...]`
    pub coefficients: Vec<f64>,
}

impl PairSurrogate {
    pub fn new(n_species: usize, num_basis: usize, cutoff: f64) -> Self {
        let span = (cutoff - BASIS_R_MIN).max(1e-3);
        let (centers, width) = if num_basis <= 1 {
            (vec![BASIS_R_MIN + 0.5 * span], span)
        } else {
            let step = span / (num_basis - 1) as f64;
            ((0..num_basis).map(|k| BASIS_R_MIN + k as f64 * step).collect(), step)
        };
        let n_coeff = n_species + Self::pair_types(n_species) * centers.len();
        Self {
            n_species,
            cutoff,
            centers,
            width,
            coefficients: vec![0.0; n_coeff],
        }
    }

    fn pair_types(n_species: usize) -> usize {
        n_species * (n_species + 1) / 2
    }

    /// Index of the unordered species pair `(a, b)`.
    fn pair_type(&self, a: usize, b: usize) -> usize {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        // Row-major upper triangle
        lo * self.n_species - lo * (lo + 1) / 2 + hi
    }

    fn num_coefficients(&self) -> usize {
        self.n_species + Self::pair_types(self.n_species) * self.centers.len()
    }

    /// `(phi_k(r), dphi_k/dr)` for every basis function.
    fn basis(&self, r: f64) -> Vec<(f64, f64)> {
        let fc = 0.5 * ((PI * r / self.cutoff).cos() + 1.0);
        let dfc = -0.5 * PI / self.cutoff * (PI * r / self.cutoff).sin();
        let w2 = self.width * self.width;

        self.centers
            .iter()
            .map(|&mu| {
                let g = (-(r - mu).powi(2) / (2.0 * w2)).exp();
                let dg = -g * (r - mu) / w2;
                (g * fc, dg * fc + g * dfc)
            })
            .collect()
    }

    fn check_species(&self, image: &Image) -> Result<()> {
        if let Some(a) = image.atoms.iter().find(|a| a.element_id >= self.n_species) {
            bail!("element_id {} outside the {} trained species", a.element_id, self.n_species);
        }
        Ok(())
    }

    /// Feature rows for one image: the energy row, then one row per force component.
    fn design_rows(&self, image: &Image) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
        self.check_species(image)?;
        let n_coeff = self.num_coefficients();
        let k = self.centers.len();
        let lattice = image.lattice.as_ref();

        let mut energy_row = vec![0.0; n_coeff];
        let mut force_rows = vec![vec![0.0; n_coeff]; 3 * image.len()];

        for atom in &image.atoms {
            energy_row[atom.element_id] += 1.0;
        }

        for (i, j, r) in spatial::neighbor_pairs(image, self.cutoff) {
            let ai = &image.atoms[i];
            let aj = &image.atoms[j];
            let offset = self.n_species + self.pair_type(ai.element_id, aj.element_id) * k;
            let d = spatial::displacement(&ai.position, &aj.position, lattice);
            let unit = d / r.max(1e-12);

            for (kk, (phi, dphi)) in self.basis(r).into_iter().enumerate() {
                let col = offset + kk;
                energy_row[col] += phi;
                // F_i = dphi * d/r, F_j = -F_i
                for c in 0..3 {
                    force_rows[3 * i + c][col] += dphi * unit[c];
                    force_rows[3 * j + c][col] -= dphi * unit[c];
                }
            }
        }

        Ok((energy_row, force_rows))
    }

    /// Fits coefficients to every labeled image in the set.
    pub fn fit(&mut self, training_set: &TrainingSet, ridge: f64, force_weight: f64) -> Result<()> {
        ensure!(!training_set.is_empty(), "training set is empty");

        let n_coeff = self.num_coefficients();
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut targets: Vec<f64> = Vec::new();

        for (idx, image) in training_set.images().iter().enumerate() {
            let (energy, forces) = match (&image.energy, &image.forces) {
                (Some(e), Some(f)) => (*e, f),
                _ => bail!("training image {} is unlabeled", idx),
            };
            let (e_row, f_rows) = self
                .design_rows(image)
                .with_context(|| format!("training image {}", idx))?;

            rows.push(e_row);
            targets.push(energy);
            for (row, target) in f_rows.into_iter().zip(forces.iter().flat_map(|f| [f.x, f.y, f.z])) {
                rows.push(row.into_iter().map(|v| v * force_weight).collect());
                targets.push(target * force_weight);
            }
        }

        // Ridge as extra rows: [A; sqrt(l) I] c = [y; 0]
        let lambda = ridge.max(0.0).sqrt();
        let n_rows = rows.len() + n_coeff;
        let mut a = DMatrix::<f64>::zeros(n_rows, n_coeff);
        let mut b = DVector::<f64>::zeros(n_rows);
        for (r, (row, y)) in rows.iter().zip(&targets).enumerate() {
            for (c, v) in row.iter().enumerate() {
                a[(r, c)] = *v;
            }
            b[r] = *y;
        }
        for c in 0..n_coeff {
            a[(rows.len() + c, c)] = lambda;
        }

        let svd = a.svd(true, true);
        let solution = svd
            .solve(&b, 1e-12)
            .map_err(|e| anyhow::anyhow!("least-squares solve failed: {}", e))?;
        ensure!(
            solution.iter().all(|v| v.is_finite()),
            "least-squares solve produced non-finite coefficients"
        );

        self.coefficients = solution.iter().cloned().collect();
        Ok(())
    }

    fn evaluate(&self, image: &Image) -> Result<SinglePoint> {
        let (e_row, f_rows) = self.design_rows(image)?;
        let c = &self.coefficients;
        ensure!(c.len() == e_row.len(), "model has {} coefficients, expected {}", c.len(), e_row.len());

        let energy = spatial::dot(&e_row, c);
        let flat: Vec<f64> = f_rows.iter().map(|row| spatial::dot(row, c)).collect();
        let forces = flat
            .chunks_exact(3)
            .map(|f| Vector3::new(f[0], f[1], f[2]))
            .collect();
        Ok(SinglePoint { energy, forces })
    }
}

impl Surrogate for PairSurrogate {
    fn predict(&self, image: &Image) -> Result<SinglePoint> {
        self.evaluate(image)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Pair RBF"
    }
}

/// Trains and reloads `PairSurrogate` models.
#[derive(Debug, Clone)]
pub struct PairFactory {
    pub n_species: usize,
    pub config: SurrogateConfig,
}

impl PairFactory {
    pub fn new(n_species: usize, config: SurrogateConfig) -> Self {
        Self { n_species, config }
    }
}

impl SurrogateFactory for PairFactory {
    fn train(&self, training_set: &TrainingSet) -> Result<Box<dyn Surrogate>> {
        let mut model = PairSurrogate::new(self.n_species, self.config.num_basis, self.config.cutoff);
        model.fit(training_set, self.config.ridge, self.config.force_weight)?;
        Ok(Box::new(model))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn Surrogate>> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let model: PairSurrogate = serde_json::from_str(&text)?;
        ensure!(
            model.coefficients.len() == model.num_coefficients(),
            "corrupt model artifact {}",
            path.display()
        );
        Ok(Box::new(model))
    }
}
